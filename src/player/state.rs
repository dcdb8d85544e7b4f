//! Shared playback state.
//!
//! One record, shared by three execution contexts: the decode engine thread,
//! the periodic buffer feeder, and the caller's control thread. There is no
//! lock around the record itself; correctness rests on a strict single-writer
//! discipline per field, with atomics providing visibility across threads.
//! Every field below documents its writer. A flag only ever moves one way per
//! side within a playback run (e.g. needs-refill is set by the engine and
//! cleared by the feeder, never both ways from the same side), so a stale
//! read is always benign.

use crate::codec::{CodecState, MIDPOINT};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

/// Bytes per half-buffer. Two packed samples per byte, so one buffer holds
/// 1600 samples (0.2 s of audio at 8 kHz), comfortably more than one feeder
/// period.
pub const BUFFER_SIZE: usize = 800;

/// Unity volume.
pub const DEFAULT_VOLUME: u32 = 100;

/// Upper volume bound (200 = +6 dB-ish doubling of deviation from midpoint).
pub const MAX_VOLUME: u32 = 200;

/// Shared mutable playback record.
///
/// # Field ownership
/// - decode engine writes: `active_buffer`, `buffer_pos`, `current_sample`,
///   `needs_refill` (set only), `resync_pending` (set only), the saved codec
///   state, `playback_done` (set), `thread_active` (clear).
/// - buffer feeder writes: `needs_refill` (clear only), `resync_pending`
///   (clear only), `callback_fired` (set), `playback_done` (clear after
///   completion handling).
/// - control API writes: `volume`, loop configuration, `total_samples`,
///   `stop_requested` (set), `thread_active` (set, before spawning the
///   engine), and all fields during `prime_for_start` while no engine runs.
#[derive(Debug)]
pub struct PlaybackState {
    /// Index of the half-buffer currently being decoded (0 or 1). Engine.
    active_buffer: AtomicUsize,
    /// Byte position inside the active half-buffer. Engine.
    buffer_pos: AtomicUsize,
    /// Samples decoded so far this run. Engine.
    current_sample: AtomicU32,
    /// Declared sample count of the bound source. Control API, set at bind.
    total_samples: AtomicU32,
    /// Per-half-buffer refill request. Engine sets, feeder clears.
    needs_refill: [AtomicBool; 2],
    /// Output volume 0..=200, 100 = unity. Control API.
    volume: AtomicU32,
    /// Loop window enable. Control API.
    loop_enabled: AtomicBool,
    /// First sample of the loop window, always even. Control API.
    loop_start: AtomicU32,
    /// One past the last loop sample (0 = use total). Always even. Control API.
    loop_end: AtomicU32,
    /// Set by the engine after a loop wrap; tells the feeder to re-seek the
    /// source before the next refill. Feeder clears.
    resync_pending: AtomicBool,
    /// Predictor captured at first arrival at the loop start. Engine.
    saved_predictor: AtomicU32,
    /// Step index captured at first arrival at the loop start. Engine.
    saved_step_index: AtomicU32,
    /// Whether the saved codec state is valid. Engine sets; control API
    /// clears when the loop window changes.
    saved_state_valid: AtomicBool,
    /// True while a decode engine thread is alive. Control API sets before
    /// spawn; the engine clears it as its very last action.
    thread_active: AtomicBool,
    /// Cooperative cancellation request, polled once per sample. Control API.
    stop_requested: AtomicBool,
    /// Set by the engine when the run ends. Must become observable no later
    /// than the `thread_active` clear; see [`finish_playback`].
    ///
    /// [`finish_playback`]: PlaybackState::finish_playback
    playback_done: AtomicBool,
    /// Completion callback latch for the current run. Feeder sets.
    callback_fired: AtomicBool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackState {
    /// Fresh state: nothing bound, nothing playing, unity volume.
    pub fn new() -> Self {
        PlaybackState {
            active_buffer: AtomicUsize::new(0),
            buffer_pos: AtomicUsize::new(0),
            current_sample: AtomicU32::new(0),
            total_samples: AtomicU32::new(0),
            needs_refill: [AtomicBool::new(true), AtomicBool::new(true)],
            volume: AtomicU32::new(DEFAULT_VOLUME),
            loop_enabled: AtomicBool::new(false),
            loop_start: AtomicU32::new(0),
            loop_end: AtomicU32::new(0),
            resync_pending: AtomicBool::new(false),
            saved_predictor: AtomicU32::new(MIDPOINT as u32),
            saved_step_index: AtomicU32::new(0),
            saved_state_valid: AtomicBool::new(false),
            thread_active: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            playback_done: AtomicBool::new(false),
            callback_fired: AtomicBool::new(false),
        }
    }

    /// Reset the per-run fields before starting the decode engine.
    ///
    /// Must only be called while no engine thread is alive: it touches
    /// engine-owned fields.
    pub fn prime_for_start(&self) {
        self.active_buffer.store(0, Ordering::Relaxed);
        self.buffer_pos.store(0, Ordering::Relaxed);
        self.current_sample.store(0, Ordering::Relaxed);
        self.needs_refill[0].store(true, Ordering::Release);
        self.needs_refill[1].store(true, Ordering::Release);
        self.resync_pending.store(false, Ordering::Relaxed);
        self.saved_predictor.store(MIDPOINT as u32, Ordering::Relaxed);
        self.saved_step_index.store(0, Ordering::Relaxed);
        self.saved_state_valid.store(false, Ordering::Relaxed);
        self.stop_requested.store(false, Ordering::Relaxed);
        self.playback_done.store(false, Ordering::Relaxed);
        self.callback_fired.store(false, Ordering::Relaxed);
    }

    // --- engine-side cursor mirrors -------------------------------------

    pub(crate) fn set_active_buffer(&self, index: usize) {
        self.active_buffer.store(index, Ordering::Relaxed);
    }

    /// Half-buffer currently being decoded.
    pub fn active_buffer(&self) -> usize {
        self.active_buffer.load(Ordering::Relaxed)
    }

    pub(crate) fn set_buffer_pos(&self, pos: usize) {
        self.buffer_pos.store(pos, Ordering::Relaxed);
    }

    /// Byte position inside the active half-buffer.
    pub fn buffer_pos(&self) -> usize {
        self.buffer_pos.load(Ordering::Relaxed)
    }

    pub(crate) fn set_current_sample(&self, sample: u32) {
        self.current_sample.store(sample, Ordering::Relaxed);
    }

    /// Samples decoded so far this run.
    pub fn current_sample(&self) -> u32 {
        self.current_sample.load(Ordering::Relaxed)
    }

    pub(crate) fn set_total_samples(&self, total: u32) {
        self.total_samples.store(total, Ordering::Relaxed);
    }

    /// Declared sample count of the bound source.
    pub fn total_samples(&self) -> u32 {
        self.total_samples.load(Ordering::Relaxed)
    }

    // --- half-buffer handoff --------------------------------------------

    /// Engine side: hand a drained buffer back to the feeder.
    pub(crate) fn mark_needs_refill(&self, index: usize) {
        self.needs_refill[index].store(true, Ordering::Release);
    }

    /// Feeder side: publish a refilled buffer to the engine.
    ///
    /// Release ordering pairs with the engine's acquire load so the filled
    /// bytes are visible before the flag flips.
    pub(crate) fn clear_needs_refill(&self, index: usize) {
        self.needs_refill[index].store(false, Ordering::Release);
    }

    /// Whether half-buffer `index` is waiting on the feeder.
    pub fn needs_refill(&self, index: usize) -> bool {
        self.needs_refill[index].load(Ordering::Acquire)
    }

    // --- volume ----------------------------------------------------------

    /// Set the output volume, clamped to `[0, 200]`.
    pub fn set_volume(&self, volume: u32) {
        self.volume.store(volume.min(MAX_VOLUME), Ordering::Relaxed);
    }

    /// Current output volume.
    pub fn volume(&self) -> u32 {
        self.volume.load(Ordering::Relaxed)
    }

    // --- loop configuration ----------------------------------------------

    /// Configure the loop window. Sample indices are rounded down to even
    /// boundaries (the codec consumes nibble pairs) and any previously saved
    /// codec state is invalidated.
    pub fn set_loop(&self, enabled: bool, start_sample: u32, end_sample: u32) {
        self.loop_enabled.store(enabled, Ordering::Relaxed);
        self.loop_start.store(start_sample & !1, Ordering::Relaxed);
        let end = if end_sample != 0 { end_sample & !1 } else { 0 };
        self.loop_end.store(end, Ordering::Relaxed);
        self.saved_state_valid.store(false, Ordering::Release);
    }

    /// Whether looping is enabled.
    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled.load(Ordering::Relaxed)
    }

    /// First sample of the loop window.
    pub fn loop_start(&self) -> u32 {
        self.loop_start.load(Ordering::Relaxed)
    }

    /// End of the loop window (0 = play to the declared sample count).
    pub fn loop_end(&self) -> u32 {
        self.loop_end.load(Ordering::Relaxed)
    }

    pub(crate) fn set_resync_pending(&self) {
        self.resync_pending.store(true, Ordering::Release);
    }

    pub(crate) fn clear_resync_pending(&self) {
        self.resync_pending.store(false, Ordering::Release);
    }

    /// Whether the feeder must re-seek the source before refilling.
    pub fn resync_pending(&self) -> bool {
        self.resync_pending.load(Ordering::Acquire)
    }

    // --- saved codec state across the loop seam ---------------------------

    /// Engine side: capture codec state at first arrival at the loop start.
    pub(crate) fn save_codec_state(&self, state: CodecState) {
        self.saved_predictor.store(state.predictor as u32, Ordering::Relaxed);
        self.saved_step_index.store(state.step_index as u32, Ordering::Relaxed);
        self.saved_state_valid.store(true, Ordering::Release);
    }

    /// Saved codec state, if a capture happened since the loop was configured.
    pub fn saved_codec_state(&self) -> Option<CodecState> {
        if !self.saved_state_valid.load(Ordering::Acquire) {
            return None;
        }
        Some(CodecState {
            predictor: self.saved_predictor.load(Ordering::Relaxed) as i32,
            step_index: self.saved_step_index.load(Ordering::Relaxed) as i32,
        })
    }

    // --- lifecycle flags ---------------------------------------------------

    pub(crate) fn set_thread_active(&self, active: bool) {
        self.thread_active.store(active, Ordering::Release);
    }

    /// True while a decode engine thread is alive.
    pub fn thread_active(&self) -> bool {
        self.thread_active.load(Ordering::Acquire)
    }

    /// Ask the decode engine to terminate; polled once per sample.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Engine side: the very last two actions of a run, in this order.
    ///
    /// `playback_done` is published before `thread_active` drops so that a
    /// concurrent observer can never see the engine gone while the completion
    /// flag is still unset; completion handling depends on that ordering.
    pub(crate) fn finish_playback(&self) {
        self.playback_done.store(true, Ordering::Release);
        self.thread_active.store(false, Ordering::Release);
    }

    /// Whether the last run ended by itself (sample count reached or stop).
    pub fn playback_done(&self) -> bool {
        self.playback_done.load(Ordering::Acquire)
    }

    /// Feeder side: consume the completion flag after scheduling the callback.
    pub(crate) fn clear_playback_done(&self) {
        self.playback_done.store(false, Ordering::Release);
    }

    /// Feeder side: latch the completion callback for this run.
    ///
    /// Returns false if it was already latched.
    pub(crate) fn latch_callback(&self) -> bool {
        !self.callback_fired.swap(true, Ordering::AcqRel)
    }

    /// Whether the completion callback has fired for the current run.
    pub fn callback_fired(&self) -> bool {
        self.callback_fired.load(Ordering::Acquire)
    }

    /// Control side: re-arm the completion callback (on clear_end_callback).
    pub(crate) fn rearm_callback(&self) {
        self.callback_fired.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_clamps() {
        let state = PlaybackState::new();
        state.set_volume(300);
        assert_eq!(state.volume(), MAX_VOLUME);
        state.set_volume(0);
        assert_eq!(state.volume(), 0);
        state.set_volume(150);
        assert_eq!(state.volume(), 150);
    }

    #[test]
    fn test_loop_rounds_to_even() {
        let state = PlaybackState::new();
        state.set_loop(true, 101, 2001);
        assert!(state.loop_enabled());
        assert_eq!(state.loop_start(), 100);
        assert_eq!(state.loop_end(), 2000);
    }

    #[test]
    fn test_loop_end_zero_means_total() {
        let state = PlaybackState::new();
        state.set_loop(true, 0, 0);
        assert_eq!(state.loop_end(), 0);
    }

    #[test]
    fn test_set_loop_invalidates_saved_state() {
        let state = PlaybackState::new();
        state.save_codec_state(CodecState {
            predictor: 40000,
            step_index: 17,
        });
        assert!(state.saved_codec_state().is_some());

        state.set_loop(true, 0, 400);
        assert!(state.saved_codec_state().is_none());
    }

    #[test]
    fn test_prime_resets_run_fields() {
        let state = PlaybackState::new();
        state.set_current_sample(123);
        state.clear_needs_refill(0);
        state.request_stop();
        state.finish_playback();
        assert!(state.latch_callback());

        state.prime_for_start();
        assert_eq!(state.current_sample(), 0);
        assert!(state.needs_refill(0));
        assert!(state.needs_refill(1));
        assert!(!state.stop_requested());
        assert!(!state.playback_done());
        assert!(!state.callback_fired());
    }

    #[test]
    fn test_prime_preserves_configuration() {
        let state = PlaybackState::new();
        state.set_volume(60);
        state.set_loop(true, 10, 200);
        state.set_total_samples(4000);

        state.prime_for_start();
        assert_eq!(state.volume(), 60);
        assert!(state.loop_enabled());
        assert_eq!(state.loop_start(), 10);
        assert_eq!(state.total_samples(), 4000);
    }

    #[test]
    fn test_finish_publishes_done_before_inactive() {
        let state = PlaybackState::new();
        state.set_thread_active(true);
        state.finish_playback();
        // Both observable after the call; ordering inside is covered by the
        // engine termination integration test.
        assert!(state.playback_done());
        assert!(!state.thread_active());
    }

    #[test]
    fn test_callback_latch_fires_once() {
        let state = PlaybackState::new();
        assert!(state.latch_callback());
        assert!(!state.latch_callback());
        state.rearm_callback();
        assert!(state.latch_callback());
    }
}
