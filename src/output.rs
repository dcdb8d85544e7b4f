//! Duty-cycle output boundary.
//!
//! The playback engine emits one unsigned level per sample at the configured
//! rate. On the original hardware this drove a PWM pin's duty register; here
//! the sink is a trait so the engine can target real audio output, a test
//! capture, or nothing at all.

use parking_lot::Mutex;
use std::sync::Arc;

/// A duty-cycle sink accepting one unsigned level per sample.
///
/// Implementations must be cheap in `set_level`: it is called from the decode
/// engine's paced hot loop, once per sample period.
pub trait PulseOutput: Send {
    /// Emit one output level (0..=65535, midpoint 32768 = silence bias).
    fn set_level(&mut self, level: u16);

    /// Drive the output to zero. Called once when playback terminates.
    fn silence(&mut self) {
        self.set_level(0);
    }
}

/// Shared handle to a sink, lockable from the engine thread.
///
/// The engine is the only lock holder while playback runs, so the mutex is
/// uncontended; it exists so callers can retain access to the sink (e.g. to
/// inspect a [`CaptureOutput`]) across playback runs.
pub type SharedOutput = Arc<Mutex<dyn PulseOutput>>;

/// Wrap a sink into a [`SharedOutput`] handle.
pub fn shared<O: PulseOutput + 'static>(output: O) -> SharedOutput {
    Arc::new(Mutex::new(output))
}

/// Sink that discards every level. Headless playback and benchmarks.
#[derive(Debug, Default)]
pub struct NullOutput;

impl PulseOutput for NullOutput {
    fn set_level(&mut self, _level: u16) {}
}

/// Sink that records every emitted level, for tests and offline verification.
#[derive(Debug, Default)]
pub struct CaptureOutput {
    levels: Vec<u16>,
}

impl CaptureOutput {
    /// Create an empty capture sink.
    pub fn new() -> Self {
        CaptureOutput { levels: Vec::new() }
    }

    /// Levels emitted so far, in order.
    pub fn levels(&self) -> &[u16] {
        &self.levels
    }

    /// Number of levels emitted so far.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// True when nothing has been emitted yet.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Drain the captured levels.
    pub fn take(&mut self) -> Vec<u16> {
        std::mem::take(&mut self.levels)
    }
}

impl PulseOutput for CaptureOutput {
    fn set_level(&mut self, level: u16) {
        self.levels.push(level);
    }
}
