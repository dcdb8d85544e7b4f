//! Playback engine and control API.
//!
//! [`ImaPlayer`] is the single owned playback object: it binds one source at
//! a time, runs the decode engine on its own thread, keeps a periodic buffer
//! feeder alive beside it, and exposes the load/play/stop/loop/volume surface
//! that game and demo code drives. Up to [`MAX_SOURCE_SLOTS`] sources can be
//! pre-opened into indexed slots for near-instant switching.

mod buffers;
mod engine;
mod feeder;
mod state;

pub use buffers::HalfBuffers;
pub use feeder::EndCallback;
pub use state::{PlaybackState, BUFFER_SIZE, DEFAULT_VOLUME, MAX_VOLUME};

use crate::container::{ImaSource, MediaSource};
use crate::output::SharedOutput;
use crate::{ImaError, Result};
use feeder::{CallbackSlot, FeederContext, FeederHandle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of indexed source slots.
pub const MAX_SOURCE_SLOTS: usize = 16;

/// How long `stop` waits for the decode engine to exit (50 polls of 2 ms).
const STOP_POLLS: u32 = 50;

/// How long `play_id` waits for the old engine before giving up (10 x 2 ms).
const SWITCH_POLLS: u32 = 10;

/// Poll interval while waiting for the engine thread to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Start attempts made by `play_id` before reporting failure.
const START_RETRIES: u32 = 3;

/// Backoff between `play_id` start attempts.
const START_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Tunable playback parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Bytes per half-buffer.
    pub buffer_size: usize,
    /// Feeder invocation period in milliseconds, independent of sample rate.
    pub feeder_period_ms: u64,
    /// Delay before the deferred completion callback runs.
    pub callback_delay_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            buffer_size: BUFFER_SIZE,
            feeder_period_ms: 33,
            callback_delay_ms: 10,
        }
    }
}

/// Point-in-time playback snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerStatus {
    /// Whether a decode engine thread is alive.
    pub playing: bool,
    /// Samples decoded so far this run.
    pub current_sample: u32,
    /// Declared sample count of the bound source (0 when none).
    pub total_samples: u32,
    /// Sample rate of the bound source in Hz (0 when none).
    pub sample_rate: u32,
    /// Output volume, 0..=200.
    pub volume: u32,
    /// Loop window enable.
    pub loop_enabled: bool,
    /// First sample of the loop window.
    pub loop_start: u32,
    /// End of the loop window (0 = declared sample count).
    pub loop_end: u32,
    /// Whether a completion callback is registered.
    pub callback_set: bool,
    /// Whether the completion callback fired for the current run.
    pub callback_fired: bool,
}

/// Current loop configuration, in samples and seconds.
#[derive(Debug, Clone, Serialize)]
pub struct LoopStatus {
    /// Loop window enable.
    pub enabled: bool,
    /// First sample of the loop window.
    pub start_sample: u32,
    /// End of the loop window (0 = play to the declared sample count).
    pub end_sample: u32,
    /// `start_sample` in seconds at the bound source's rate.
    pub start_seconds: f64,
    /// `end_sample` in seconds at the bound source's rate.
    pub end_seconds: f64,
}

/// The source currently bound to playback, plus its header facts so status
/// queries never contend with the feeder for the source lock.
struct ActiveSource {
    source: Arc<Mutex<ImaSource>>,
    sample_rate: u32,
    sample_count: u32,
}

/// Streaming ADPCM player.
///
/// # Example
/// ```no_run
/// use ima_stream::output::{shared, NullOutput};
/// use ima_stream::ImaPlayer;
///
/// let mut player = ImaPlayer::new(shared(NullOutput));
/// player.load("intro.ima").unwrap();
/// player.set_volume(80);
/// while player.is_playing() {
///     std::thread::sleep(std::time::Duration::from_millis(100));
/// }
/// ```
pub struct ImaPlayer {
    state: Arc<PlaybackState>,
    buffers: Arc<HalfBuffers>,
    output: SharedOutput,
    config: PlayerConfig,
    active: Option<ActiveSource>,
    slots: Vec<Option<Arc<Mutex<ImaSource>>>>,
    engine: Option<JoinHandle<()>>,
    feeder: Option<FeederHandle>,
    callback: CallbackSlot,
}

impl std::fmt::Debug for ImaPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImaPlayer")
            .field("playing", &self.is_playing())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImaPlayer {
    /// Create a player emitting to `output` with default parameters.
    pub fn new(output: SharedOutput) -> Self {
        Self::with_config(output, PlayerConfig::default())
    }

    /// Create a player with explicit parameters.
    pub fn with_config(output: SharedOutput, config: PlayerConfig) -> Self {
        let buffer_size = config.buffer_size.max(2);
        ImaPlayer {
            state: Arc::new(PlaybackState::new()),
            buffers: Arc::new(HalfBuffers::new(buffer_size)),
            output,
            config,
            active: None,
            slots: Vec::new(),
            engine: None,
            feeder: None,
            callback: Arc::new(Mutex::new(None)),
        }
    }

    /// Shared playback state, for status displays and tests.
    pub fn playback_state(&self) -> &Arc<PlaybackState> {
        &self.state
    }

    // --- load / play -----------------------------------------------------

    /// Load a container from disk and start playing it.
    ///
    /// The file is opened and validated first; a format or I/O failure
    /// leaves the current playback untouched. On success any current
    /// playback stops, the new source binds, both buffers pre-fill
    /// synchronously, and the decode engine and feeder start.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let source = ImaSource::open(path)?;
        self.bind_and_start(source)
    }

    /// Load a container from any readable, seekable byte source and play it.
    pub fn load_reader<R: MediaSource + 'static>(&mut self, reader: R) -> Result<()> {
        let source = ImaSource::from_reader(reader)?;
        self.bind_and_start(source)
    }

    fn bind_and_start(&mut self, source: ImaSource) -> Result<()> {
        self.stop();
        self.active = Some(ActiveSource {
            sample_rate: source.sample_rate(),
            sample_count: source.sample_count(),
            source: Arc::new(Mutex::new(source)),
        });
        self.start_playback()
    }

    /// Restart playback of the bound source from the beginning.
    ///
    /// Returns `Ok(false)` when the engine is already running, `Ok(true)`
    /// after a restart. Fails with [`ImaError::NoSource`] when nothing is
    /// bound (e.g. after `stop`, which releases the active source).
    pub fn resume(&mut self) -> Result<bool> {
        if self.state.thread_active() {
            return Ok(false);
        }
        let active = self.active.as_ref().ok_or(ImaError::NoSource)?;
        active.source.lock().rewind()?;
        self.start_playback()?;
        Ok(true)
    }

    /// Prime state, pre-fill both buffers, then start the engine and feeder.
    ///
    /// A spawn failure rolls `thread_active` back and reports the error
    /// rather than leaving a half-started playback.
    fn start_playback(&mut self) -> Result<()> {
        self.reap_engine();
        if self.state.thread_active() {
            return Err(ImaError::EngineStart(
                "a decode engine is already running".into(),
            ));
        }
        let (source, sample_rate, sample_count) = {
            let active = self.active.as_ref().ok_or(ImaError::NoSource)?;
            (
                Arc::clone(&active.source),
                active.sample_rate,
                active.sample_count,
            )
        };

        self.state.set_total_samples(sample_count);
        self.state.prime_for_start();

        // Pre-fill synchronously so the engine never starts into an
        // immediate underrun stall.
        feeder::refill(&self.state, &self.buffers, &source);

        let sample_interval = Duration::from_micros(1_000_000 / u64::from(sample_rate));
        self.state.set_thread_active(true);
        let ctx = engine::EngineContext {
            state: Arc::clone(&self.state),
            buffers: Arc::clone(&self.buffers),
            output: Arc::clone(&self.output),
            sample_interval,
        };
        let engine = thread::Builder::new()
            .name("ima-decode".into())
            .spawn(move || engine::run(ctx));
        match engine {
            Ok(handle) => self.engine = Some(handle),
            Err(e) => {
                self.state.set_thread_active(false);
                return Err(ImaError::EngineStart(e.to_string()));
            }
        }

        let feeder = FeederHandle::spawn(FeederContext {
            state: Arc::clone(&self.state),
            buffers: Arc::clone(&self.buffers),
            source,
            callback: Arc::clone(&self.callback),
            period: Duration::from_millis(self.config.feeder_period_ms.max(1)),
            callback_delay: Duration::from_millis(self.config.callback_delay_ms),
        });
        match feeder {
            Ok(handle) => self.feeder = Some(handle),
            Err(e) => {
                // Unwind the engine too; a playback without its feeder would
                // stall as soon as the pre-filled buffers drain.
                self.state.request_stop();
                self.wait_engine_exit(STOP_POLLS);
                self.reap_engine();
                return Err(ImaError::EngineStart(e.to_string()));
            }
        }

        debug!(rate = sample_rate, samples = sample_count, "playback started");
        Ok(())
    }

    // --- indexed quick-switch --------------------------------------------

    /// Pre-open a container into an indexed slot for rapid switching.
    ///
    /// With `id = None` the source is appended and its new index returned.
    /// Re-opening an occupied slot replaces the handle, closing the prior
    /// one. The slot index must stay below [`MAX_SOURCE_SLOTS`].
    pub fn open_id<P: AsRef<Path>>(&mut self, path: P, id: Option<usize>) -> Result<usize> {
        let source = ImaSource::open(path)?;
        self.park_source(source, id)
    }

    /// Pre-open a container from a reader into an indexed slot.
    pub fn open_reader_id<R: MediaSource + 'static>(
        &mut self,
        reader: R,
        id: Option<usize>,
    ) -> Result<usize> {
        let source = ImaSource::from_reader(reader)?;
        self.park_source(source, id)
    }

    fn park_source(&mut self, source: ImaSource, id: Option<usize>) -> Result<usize> {
        let id = id.unwrap_or(self.slots.len());
        if id >= MAX_SOURCE_SLOTS {
            return Err(ImaError::Config(format!(
                "source slot {id} exceeds the {MAX_SOURCE_SLOTS}-slot limit"
            )));
        }
        while self.slots.len() <= id {
            self.slots.push(None);
        }
        // Dropping a previous occupant closes its handle.
        self.slots[id] = Some(Arc::new(Mutex::new(source)));
        Ok(id)
    }

    /// Switch playback to a pre-opened slot.
    ///
    /// Fails with [`ImaError::UnknownSourceId`] (no side effects) when the
    /// slot is empty. Stops any current playback with a bounded wait, then
    /// rebinds and retries the start step a few times on transient failure.
    pub fn play_id(&mut self, id: usize) -> Result<()> {
        let slot = self
            .slots
            .get(id)
            .and_then(|slot| slot.as_ref())
            .ok_or(ImaError::UnknownSourceId { id })?
            .clone();

        if self.state.thread_active() {
            self.state.request_stop();
            if !self.wait_engine_exit(SWITCH_POLLS) {
                return Err(ImaError::StopTimeout {
                    timeout_ms: u64::from(SWITCH_POLLS) * POLL_INTERVAL.as_millis() as u64,
                });
            }
        }
        if let Some(feeder) = self.feeder.take() {
            feeder.stop_and_join();
        }
        self.reap_engine();

        let (sample_rate, sample_count) = {
            let mut source = slot.lock();
            source.rewind()?;
            (source.sample_rate(), source.sample_count())
        };
        self.active = Some(ActiveSource {
            source: slot,
            sample_rate,
            sample_count,
        });

        let mut last_err = ImaError::EngineStart("no start attempt made".into());
        for attempt in 0..START_RETRIES {
            match self.start_playback() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(id, attempt, error = %e, "indexed start attempt failed");
                    last_err = e;
                    thread::sleep(START_RETRY_DELAY);
                }
            }
        }
        Err(last_err)
    }

    /// Stop playback and drop every indexed slot, closing the handles.
    pub fn close_ids(&mut self) {
        self.stop();
        self.slots.clear();
    }

    // --- stop ------------------------------------------------------------

    /// Stop playback and release the active source.
    ///
    /// Requests engine termination, polls its exit for a bounded window,
    /// then tears down the feeder and releases the source regardless. An
    /// engine that overstays the window is logged and detached. It holds
    /// only shared handles, so the teardown cannot free memory out from
    /// under it; the cost is a short-lived zombie thread.
    pub fn stop(&mut self) {
        if self.state.thread_active() {
            self.state.request_stop();
            if !self.wait_engine_exit(STOP_POLLS) {
                warn!(
                    timeout_ms = u64::from(STOP_POLLS) * POLL_INTERVAL.as_millis() as u64,
                    "decode engine did not exit in time; tearing down anyway"
                );
                // Detach the straggler.
                self.engine = None;
            }
        }
        if let Some(feeder) = self.feeder.take() {
            feeder.stop_and_join();
        }
        self.reap_engine();
        self.active = None;
    }

    /// Join the engine thread if it has already exited.
    fn reap_engine(&mut self) {
        if self.state.thread_active() {
            return;
        }
        if let Some(handle) = self.engine.take() {
            let _ = handle.join();
        }
    }

    /// Poll `thread_active` until clear or the attempt budget runs out.
    fn wait_engine_exit(&self, polls: u32) -> bool {
        for _ in 0..polls {
            if !self.state.thread_active() {
                return true;
            }
            thread::sleep(POLL_INTERVAL);
        }
        !self.state.thread_active()
    }

    // --- volume and loop configuration ------------------------------------

    /// Set the output volume, clamped to `[0, 200]`; 100 is unity.
    pub fn set_volume(&self, volume: u32) {
        self.state.set_volume(volume);
    }

    /// Current output volume.
    pub fn volume(&self) -> u32 {
        self.state.volume()
    }

    /// Configure the loop window in samples.
    ///
    /// Boundaries are rounded down to even samples; `end_sample = 0` loops
    /// to the declared sample count. Any saved loop-seam codec state is
    /// invalidated.
    pub fn set_loop(&self, enabled: bool, start_sample: u32, end_sample: u32) {
        self.state.set_loop(enabled, start_sample, end_sample);
    }

    /// Configure the loop window in seconds at the bound source's rate.
    pub fn set_loop_seconds(
        &self,
        enabled: bool,
        start_seconds: f64,
        end_seconds: f64,
    ) -> Result<()> {
        let rate = self.sample_rate().ok_or(ImaError::NoSource)?;
        let start = (start_seconds.max(0.0) * f64::from(rate)) as u32;
        let end = if end_seconds > 0.0 {
            (end_seconds * f64::from(rate)) as u32
        } else {
            0
        };
        self.set_loop(enabled, start, end);
        Ok(())
    }

    /// Current loop configuration.
    pub fn loop_status(&self) -> LoopStatus {
        let rate = self.sample_rate().unwrap_or(0);
        let to_seconds = |sample: u32| {
            if rate > 0 {
                f64::from(sample) / f64::from(rate)
            } else {
                0.0
            }
        };
        LoopStatus {
            enabled: self.state.loop_enabled(),
            start_sample: self.state.loop_start(),
            end_sample: self.state.loop_end(),
            start_seconds: to_seconds(self.state.loop_start()),
            end_seconds: to_seconds(self.state.loop_end()),
        }
    }

    // --- completion callback ----------------------------------------------

    /// Register the end-of-playback handler.
    ///
    /// It runs at most once per playback run, deferred onto a one-shot
    /// timer thread, never on the decode engine or feeder context.
    pub fn set_end_callback<F: Fn() + Send + Sync + 'static>(&self, handler: F) {
        *self.callback.lock() = Some(Arc::new(handler));
    }

    /// Remove the end-of-playback handler and re-arm the completion latch.
    pub fn clear_end_callback(&self) {
        *self.callback.lock() = None;
        self.state.rearm_callback();
    }

    // --- status -----------------------------------------------------------

    /// Whether a decode engine thread is alive.
    pub fn is_playing(&self) -> bool {
        self.state.thread_active()
    }

    /// Sample rate of the bound source, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.active.as_ref().map(|active| active.sample_rate)
    }

    /// Playback position as a fraction in `[0, 1]`.
    pub fn position(&self) -> f64 {
        let total = self.state.total_samples();
        if total == 0 {
            return 0.0;
        }
        f64::from(self.state.current_sample()) / f64::from(total)
    }

    /// Playback position in seconds.
    pub fn position_seconds(&self) -> f64 {
        match self.sample_rate() {
            Some(rate) if rate > 0 => f64::from(self.state.current_sample()) / f64::from(rate),
            _ => 0.0,
        }
    }

    /// Duration of the bound source in seconds.
    pub fn duration_seconds(&self) -> f64 {
        match self.sample_rate() {
            Some(rate) if rate > 0 => f64::from(self.state.total_samples()) / f64::from(rate),
            _ => 0.0,
        }
    }

    /// Full status snapshot.
    pub fn status(&self) -> PlayerStatus {
        PlayerStatus {
            playing: self.is_playing(),
            current_sample: self.state.current_sample(),
            total_samples: self.state.total_samples(),
            sample_rate: self.sample_rate().unwrap_or(0),
            volume: self.state.volume(),
            loop_enabled: self.state.loop_enabled(),
            loop_start: self.state.loop_start(),
            loop_end: self.state.loop_end(),
            callback_set: self.callback.lock().is_some(),
            callback_fired: self.state.callback_fired(),
        }
    }
}

impl Drop for ImaPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}
