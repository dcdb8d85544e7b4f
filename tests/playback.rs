//! End-to-end playback tests: real threads, real pacing, synthetic sources.

use ima_stream::container::{HEADER_LEN, MAGIC};
use ima_stream::output::{CaptureOutput, NullOutput};
use ima_stream::{ImaError, ImaPlayer, PlayerConfig};
use parking_lot::Mutex;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn container_bytes(rate: u32, count: u32, data: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + data.len());
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&rate.to_le_bytes());
    bytes.extend_from_slice(&count.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 12]);
    bytes.extend_from_slice(data);
    bytes
}

fn cursor_source(rate: u32, count: u32, data: &[u8]) -> Cursor<Vec<u8>> {
    Cursor::new(container_bytes(rate, count, data))
}

fn null_player() -> ImaPlayer {
    ImaPlayer::new(Arc::new(Mutex::new(NullOutput)))
}

/// Poll until `predicate` holds or `timeout` elapses.
fn wait_for(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

#[test]
fn test_one_second_source_completes_on_time() {
    let mut player = null_player();
    let state = Arc::clone(player.playback_state());

    // 8000 samples at 8000 Hz: exactly one second, spanning many refills of
    // the 800-byte half-buffers.
    let data = vec![0x39u8; 4000];
    let started = Instant::now();
    player.load_reader(cursor_source(8000, 8000, &data)).unwrap();
    assert!(player.is_playing());

    assert!(
        wait_for(Duration::from_secs(3), || !state.thread_active()),
        "decode engine never finished"
    );
    let elapsed = started.elapsed();

    assert!(state.playback_done());
    assert_eq!(state.current_sample(), 8000);
    assert!(!state.thread_active());
    assert!(
        elapsed >= Duration::from_millis(980),
        "finished early: {elapsed:?}"
    );
    assert!(
        elapsed <= Duration::from_millis(1500),
        "finished late: {elapsed:?}"
    );
}

#[test]
fn test_completion_callback_fires_once_off_the_decode_thread() {
    let mut player = ImaPlayer::with_config(
        Arc::new(Mutex::new(NullOutput)),
        PlayerConfig {
            feeder_period_ms: 5,
            ..PlayerConfig::default()
        },
    );

    let fired = Arc::new(AtomicUsize::new(0));
    let thread_name = Arc::new(Mutex::new(String::new()));
    let fired_clone = Arc::clone(&fired);
    let name_clone = Arc::clone(&thread_name);
    player.set_end_callback(move || {
        fired_clone.fetch_add(1, Ordering::SeqCst);
        *name_clone.lock() = std::thread::current()
            .name()
            .unwrap_or_default()
            .to_string();
    });

    // 400 samples at 8000 Hz: 50 ms of audio.
    player
        .load_reader(cursor_source(8000, 400, &[0x48; 200]))
        .unwrap();

    assert!(
        wait_for(Duration::from_secs(2), || fired.load(Ordering::SeqCst) > 0),
        "completion callback never fired"
    );
    // Give a duplicate invocation a chance to show up.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(
        thread_name.lock().as_str(),
        "ima-callback",
        "user code must run on the deferred timer thread"
    );
    assert!(player.status().callback_fired);
}

#[test]
fn test_explicit_stop_suppresses_completion_callback() {
    let mut player = null_player();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = Arc::clone(&fired);
    player.set_end_callback(move || {
        fired_clone.fetch_add(1, Ordering::SeqCst);
    });

    // Long source so the stop lands mid-playback.
    player
        .load_reader(cursor_source(8000, 80_000, &vec![0x5A; 40_000]))
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    player.stop();

    assert!(!player.is_playing());
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn test_stop_terminates_promptly() {
    let mut player = null_player();
    player
        .load_reader(cursor_source(8000, 1_000_000, &vec![0x11; 4000]))
        .unwrap();
    std::thread::sleep(Duration::from_millis(30));

    let started = Instant::now();
    player.stop();
    assert!(!player.is_playing());
    assert!(started.elapsed() < Duration::from_millis(500));

    // The active source is released; resume has nothing to restart.
    assert!(matches!(player.resume(), Err(ImaError::NoSource)));
}

#[test]
fn test_resume_replays_after_natural_completion() {
    let mut player = null_player();
    let state = Arc::clone(player.playback_state());

    player
        .load_reader(cursor_source(8000, 400, &[0x26; 200]))
        .unwrap();
    assert!(wait_for(Duration::from_secs(2), || !state.thread_active()));
    assert_eq!(state.current_sample(), 400);

    // The source stays bound after a natural end; resume rewinds and runs
    // the whole stream again.
    assert!(player.resume().unwrap());
    assert!(player.is_playing());
    assert!(wait_for(Duration::from_secs(2), || !state.thread_active()));
    assert_eq!(state.current_sample(), 400);
}

#[test]
fn test_loop_keeps_playing_and_preserves_seam_state() {
    let mut player = ImaPlayer::with_config(
        Arc::new(Mutex::new(NullOutput)),
        PlayerConfig {
            feeder_period_ms: 5,
            ..PlayerConfig::default()
        },
    );
    let state = Arc::clone(player.playback_state());

    // 15625 Hz, loop window [400, 2400): one wrap every 128 ms.
    player.set_loop(true, 400, 2400);
    player
        .load_reader(cursor_source(15625, 1_000_000, &vec![0x7B; 4000]))
        .unwrap();

    // First pass reaches the loop start and captures the codec state.
    assert!(
        wait_for(Duration::from_secs(2), || state
            .saved_codec_state()
            .is_some()),
        "loop-seam state never captured"
    );
    let saved = state.saved_codec_state().unwrap();

    // Observe at least two wraps: the sample counter falls back below the
    // loop end each time and the saved pair never changes.
    for _ in 0..2 {
        assert!(
            wait_for(Duration::from_secs(2), || state.current_sample() >= 2000),
            "playback stalled before the loop end"
        );
        assert!(
            wait_for(Duration::from_secs(2), || state.current_sample() < 2000),
            "loop never wrapped"
        );
        assert_eq!(state.saved_codec_state().unwrap(), saved);
    }

    assert!(player.is_playing(), "looping playback must not complete");
    assert!(state.current_sample() >= 400 || state.resync_pending());
    player.stop();
}

#[test]
fn test_zero_volume_pins_output_to_midpoint() {
    let capture = Arc::new(Mutex::new(CaptureOutput::new()));
    let mut player = ImaPlayer::new(capture.clone());
    let state = Arc::clone(player.playback_state());

    player.set_volume(0);
    player
        .load_reader(cursor_source(8000, 800, &[0x7F; 400]))
        .unwrap();
    assert!(wait_for(Duration::from_secs(2), || !state.thread_active()));

    let capture = capture.lock();
    let levels = capture.levels();
    // Everything but the final silence write is pinned to the midpoint.
    assert!(levels.len() > 1);
    assert!(levels[..levels.len() - 1].iter().all(|&level| level == 32768));
    assert_eq!(*levels.last().unwrap(), 0);
}

#[test]
fn test_load_with_bad_magic_fails_without_touching_state() {
    let mut player = null_player();
    player.set_volume(73);
    player.set_loop(true, 100, 200);

    let err = player
        .load_reader(Cursor::new(b"RIFF0000000000000000000000".to_vec()))
        .unwrap_err();
    assert!(matches!(err, ImaError::InvalidMagic));

    let status = player.status();
    assert!(!status.playing);
    assert_eq!(status.volume, 73);
    assert_eq!(status.loop_start, 100);
    assert_eq!(status.total_samples, 0);
}

#[test]
fn test_load_with_unsupported_rate_fails() {
    let mut player = null_player();
    let err = player
        .load_reader(cursor_source(9999, 100, &[0; 50]))
        .unwrap_err();
    assert!(matches!(err, ImaError::UnsupportedRate { rate: 9999 }));
    assert!(!player.is_playing());
}

#[test]
fn test_play_id_switches_between_preopened_sources() {
    let mut player = null_player();
    player
        .open_reader_id(cursor_source(8000, 200_000, &vec![0x13; 4000]), Some(0))
        .unwrap();
    player
        .open_reader_id(cursor_source(12500, 200_000, &vec![0x57; 4000]), Some(1))
        .unwrap();

    player.play_id(0).unwrap();
    assert!(player.is_playing());
    assert_eq!(player.sample_rate(), Some(8000));
    std::thread::sleep(Duration::from_millis(40));

    // Quick switch restarts cleanly at the other source's rate.
    player.play_id(1).unwrap();
    assert!(player.is_playing());
    assert_eq!(player.sample_rate(), Some(12500));
    assert!(player.playback_state().current_sample() < 200_000);

    // Replaying a slot that was already used restarts it from the top.
    player.play_id(0).unwrap();
    assert_eq!(player.sample_rate(), Some(8000));
    player.close_ids();
    assert!(!player.is_playing());
    assert!(matches!(
        player.play_id(0),
        Err(ImaError::UnknownSourceId { id: 0 })
    ));
}

#[test]
fn test_load_from_disk_via_tempfile() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.ima");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&container_bytes(8000, 320, &[0x44; 160]))
        .unwrap();
    drop(file);

    let mut player = null_player();
    let state = Arc::clone(player.playback_state());
    player.load(&path).unwrap();
    approx::assert_relative_eq!(player.duration_seconds(), 0.04);
    assert!(wait_for(Duration::from_secs(2), || !state.thread_active()));
    assert_eq!(state.current_sample(), 320);
}

#[test]
fn test_truncated_data_stalls_instead_of_crashing() {
    let mut player = null_player();
    let state = Arc::clone(player.playback_state());

    // Declares 4000 samples but carries only 100 bytes = 200 samples of
    // data: the feeder runs dry and playback stalls on the last level.
    player
        .load_reader(cursor_source(8000, 4000, &[0x2C; 100]))
        .unwrap();

    std::thread::sleep(Duration::from_millis(300));
    assert!(player.is_playing(), "starved playback stalls, it does not die");
    assert!(state.current_sample() < 4000);

    // A stop still tears the stalled playback down cleanly.
    player.stop();
    assert!(!player.is_playing());
}
