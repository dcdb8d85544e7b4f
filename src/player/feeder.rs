//! Periodic buffer feeder.
//!
//! A small thread, scheduled independently of the sample rate, that keeps the
//! two half-buffers full from the bound source and detects natural end of
//! stream. It never blocks the decode engine: the engine reads only buffers
//! the feeder has published, and the feeder writes only buffers the engine
//! has handed back.
//!
//! The user-facing completion callback is never invoked from the feeder's own
//! tick nor from the engine thread; it is handed to a separate one-shot timer
//! thread so user code runs where blocking and allocation are tolerable.

use super::buffers::HalfBuffers;
use super::state::PlaybackState;
use crate::container::ImaSource;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Registered end-of-playback handler.
pub type EndCallback = Arc<dyn Fn() + Send + Sync>;

/// Shared slot holding the registered handler, if any.
pub(crate) type CallbackSlot = Arc<Mutex<Option<EndCallback>>>;

/// What a tick decided about the feeder's future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// Keep being invoked.
    Continue,
    /// Playback completed; the feeder has nothing left to do.
    Finished,
}

/// Everything the feeder thread needs, moved into the spawn.
pub(crate) struct FeederContext {
    pub state: Arc<PlaybackState>,
    pub buffers: Arc<HalfBuffers>,
    pub source: Arc<Mutex<ImaSource>>,
    pub callback: CallbackSlot,
    pub period: Duration,
    pub callback_delay: Duration,
}

/// Refill pass: resync the source if a loop wrap asked for it, then fill
/// every half-buffer the engine has handed back.
///
/// Also called synchronously by the control API to pre-fill both buffers
/// before the engine starts. Zero-byte reads leave the needs-refill flag set
/// (playback stalls rather than decoding stale bytes); read errors do the
/// same and are logged.
pub(crate) fn refill(state: &PlaybackState, buffers: &HalfBuffers, source: &Mutex<ImaSource>) {
    let mut source = source.lock();

    if state.resync_pending() {
        let loop_start = state.loop_start();
        match source.seek_to_sample(loop_start) {
            Ok(()) => state.clear_resync_pending(),
            Err(e) => {
                warn!(loop_start, error = %e, "loop resync seek failed");
                return;
            }
        }
    }

    for index in 0..2 {
        if !state.needs_refill(index) {
            continue;
        }
        match buffers.fill_from(index, &mut source) {
            Ok(0) => {}
            Ok(_) => state.clear_needs_refill(index),
            Err(e) => warn!(index, error = %e, "half-buffer refill failed"),
        }
    }
}

/// One feeder invocation.
pub(crate) fn tick(
    state: &PlaybackState,
    buffers: &HalfBuffers,
    source: &Mutex<ImaSource>,
    callback: &CallbackSlot,
    callback_delay: Duration,
) -> TickOutcome {
    // Natural end of stream with looping off: fire the completion handler
    // exactly once, deferred. A stop-requested exit also raises
    // playback_done, but an explicit stop is not a completion, so that case
    // falls through and the next prime clears the flag.
    if state.playback_done() && !state.loop_enabled() && !state.stop_requested() {
        if state.latch_callback() {
            state.clear_playback_done();
            let handler = callback.lock().clone();
            if let Some(handler) = handler {
                schedule_deferred(handler, callback_delay);
            }
            debug!("playback complete");
        }
        return TickOutcome::Finished;
    }

    refill(state, buffers, source);
    TickOutcome::Continue
}

/// Hand the completion handler to a one-shot timer thread.
fn schedule_deferred(handler: EndCallback, delay: Duration) {
    let spawned = thread::Builder::new()
        .name("ima-callback".into())
        .spawn(move || {
            thread::sleep(delay);
            handler();
        });
    if let Err(e) = spawned {
        warn!(error = %e, "could not spawn deferred callback timer");
    }
}

/// Handle to a running feeder thread.
pub(crate) struct FeederHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FeederHandle {
    /// Spawn the periodic feeder.
    pub fn spawn(ctx: FeederContext) -> std::io::Result<FeederHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("ima-feeder".into())
            .spawn(move || {
                while !shutdown_flag.load(Ordering::Acquire) {
                    let outcome = tick(
                        &ctx.state,
                        &ctx.buffers,
                        &ctx.source,
                        &ctx.callback,
                        ctx.callback_delay,
                    );
                    if outcome == TickOutcome::Finished {
                        break;
                    }
                    thread::sleep(ctx.period);
                }
                // The source handle drops here; the file closes once the
                // control side releases its clone as well.
            })?;
        Ok(FeederHandle {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stop the feeder and wait for its thread to exit.
    pub fn stop_and_join(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FeederHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        // Detach rather than join: drop may run on a thread that cannot
        // afford a feeder-period wait.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{HEADER_LEN, MAGIC};
    use crate::player::state::BUFFER_SIZE;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    fn shared_source(rate: u32, count: u32, data: &[u8]) -> Arc<Mutex<ImaSource>> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + data.len());
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&rate.to_le_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 12]);
        bytes.extend_from_slice(data);
        Arc::new(Mutex::new(
            ImaSource::from_reader(Cursor::new(bytes)).unwrap(),
        ))
    }

    fn empty_callback_slot() -> CallbackSlot {
        Arc::new(Mutex::new(None))
    }

    #[test]
    fn test_refill_clears_flags_when_data_arrives() {
        let state = PlaybackState::new();
        let buffers = HalfBuffers::new(4);
        let source = shared_source(8000, 32, &[0xAA; 16]);
        state.prime_for_start();

        refill(&state, &buffers, &source);
        assert!(!state.needs_refill(0));
        assert!(!state.needs_refill(1));
        assert_eq!(buffers.byte_at(0, 0), 0xAA);
    }

    #[test]
    fn test_refill_leaves_flag_on_empty_source() {
        let state = PlaybackState::new();
        let buffers = HalfBuffers::new(4);
        let source = shared_source(8000, 32, &[0xBB; 6]);
        state.prime_for_start();

        refill(&state, &buffers, &source);
        // First buffer filled fully, second got the 2-byte tail.
        assert!(!state.needs_refill(0));
        assert!(!state.needs_refill(1));

        state.mark_needs_refill(0);
        refill(&state, &buffers, &source);
        assert!(state.needs_refill(0), "exhausted source must leave the flag");
    }

    #[test]
    fn test_refill_resyncs_before_reading() {
        let state = PlaybackState::new();
        let buffers = HalfBuffers::new(4);
        let source = shared_source(8000, 32, &[0, 1, 2, 3, 4, 5, 6, 7]);
        state.prime_for_start();
        state.set_loop(true, 8, 0);
        state.set_resync_pending();

        refill(&state, &buffers, &source);
        assert!(!state.resync_pending());
        // Loop start sample 8 lives at data byte 4.
        assert_eq!(buffers.byte_at(0, 0), 4);
    }

    #[test]
    fn test_tick_fires_callback_once_deferred() {
        let state = PlaybackState::new();
        let buffers = HalfBuffers::new(BUFFER_SIZE);
        let source = shared_source(8000, 0, &[]);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let callback: CallbackSlot = Arc::new(Mutex::new(Some(Arc::new(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }) as EndCallback)));

        state.prime_for_start();
        state.finish_playback();

        let delay = Duration::from_millis(5);
        assert_eq!(
            tick(&state, &buffers, &source, &callback, delay),
            TickOutcome::Finished
        );
        assert!(state.callback_fired());
        assert!(!state.playback_done(), "completion consumes the done flag");

        // Deferred: not yet fired at return time is allowed, fired soon after.
        thread::sleep(Duration::from_millis(60));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Completion consumed the done flag, so a further manual tick falls
        // through to the refill path and the latch prevents a second fire.
        assert_eq!(
            tick(&state, &buffers, &source, &callback, delay),
            TickOutcome::Continue
        );
        thread::sleep(Duration::from_millis(30));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tick_suppresses_callback_after_explicit_stop() {
        let state = PlaybackState::new();
        let buffers = HalfBuffers::new(BUFFER_SIZE);
        let source = shared_source(8000, 0, &[]);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let callback: CallbackSlot = Arc::new(Mutex::new(Some(Arc::new(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }) as EndCallback)));

        state.prime_for_start();
        state.request_stop();
        state.finish_playback();

        tick(&state, &buffers, &source, &callback, Duration::from_millis(1));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!state.callback_fired());
    }

    #[test]
    fn test_tick_keeps_feeding_while_looping() {
        let state = PlaybackState::new();
        let buffers = HalfBuffers::new(4);
        let source = shared_source(8000, 64, &[0xCC; 32]);
        state.prime_for_start();
        state.set_loop(true, 0, 0);
        state.finish_playback();

        // Looping playback never completes; the tick must fall through to
        // the refill path.
        let callback = empty_callback_slot();
        let outcome = tick(&state, &buffers, &source, &callback, Duration::ZERO);
        assert_eq!(outcome, TickOutcome::Continue);
        assert!(!state.needs_refill(0));
    }

    #[test]
    fn test_feeder_thread_stops_on_shutdown() {
        let state = Arc::new(PlaybackState::new());
        let buffers = Arc::new(HalfBuffers::new(4));
        let source = shared_source(8000, 1000, &[0xDD; 500]);
        state.prime_for_start();

        let feeder = FeederHandle::spawn(FeederContext {
            state: Arc::clone(&state),
            buffers: Arc::clone(&buffers),
            source,
            callback: empty_callback_slot(),
            period: Duration::from_millis(5),
            callback_delay: Duration::from_millis(1),
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(!state.needs_refill(0));
        feeder.stop_and_join();
    }
}
