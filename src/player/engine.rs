//! Real-time decode engine.
//!
//! Runs on its own thread, parallel to the rest of the system: one output
//! level per sample period, paced against a monotonic deadline that advances
//! by the fixed inter-sample interval (never from "now", so execution jitter
//! cannot accumulate into drift). The engine is the only writer of the decode
//! cursors and the only side that flips a half-buffer to needs-refill.

use super::buffers::HalfBuffers;
use super::state::{PlaybackState, DEFAULT_VOLUME};
use crate::codec::{AdpcmDecoder, MIDPOINT};
use crate::output::SharedOutput;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Margin reserved for the spin tail; sleeps always target this much before
/// the deadline so OS wakeup latency lands inside the spin, not past it.
const SPIN_WINDOW: Duration = Duration::from_micros(100);

/// Smallest sleep worth requesting. Below this the scheduler's overshoot
/// would eat the whole spin margin, so the pacer spins the gap instead.
const MIN_SLEEP: Duration = Duration::from_micros(150);

/// Everything the engine thread needs, moved into the spawn.
pub(crate) struct EngineContext {
    pub state: Arc<PlaybackState>,
    pub buffers: Arc<HalfBuffers>,
    pub output: SharedOutput,
    pub sample_interval: Duration,
}

/// Scale a decoded level by the volume percentage.
///
/// The scale applies to the signed deviation from the midpoint, re-clamped to
/// the signed 16-bit range and re-biased, so volume 0 pins the output at the
/// midpoint and volume 200 doubles the swing.
pub(crate) fn scale_level(level: u16, volume: u32) -> u16 {
    if volume == DEFAULT_VOLUME {
        return level;
    }
    let deviation = i32::from(level) - i32::from(MIDPOINT);
    let scaled = (deviation * volume as i32 / 100).clamp(-32768, 32767);
    (scaled + i32::from(MIDPOINT)) as u16
}

/// Hybrid sleep-then-spin wait until `deadline`.
fn pace_until(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline - now;
        if remaining > SPIN_WINDOW + MIN_SLEEP {
            thread::sleep(remaining - SPIN_WINDOW);
        } else {
            std::hint::spin_loop();
        }
    }
}

/// Engine thread body. Decodes until the declared sample count is reached or
/// a stop is requested, then silences the output and publishes completion.
pub(crate) fn run(ctx: EngineContext) {
    let EngineContext {
        state,
        buffers,
        output,
        sample_interval,
    } = ctx;

    let mut decoder = AdpcmDecoder::new();
    let mut active = state.active_buffer();
    let mut pos = state.buffer_pos();
    let mut first_pass = true;
    let buffer_len = buffers.len();
    let total = state.total_samples();

    debug!(total, interval_us = sample_interval.as_micros() as u64, "decode engine started");

    let mut next_due = Instant::now();

    'playback: while state.current_sample() < total && !state.stop_requested() {
        // Backpressure point: both half-buffers drained. Keep emitting the
        // last decoded level on the pacing grid until the feeder publishes
        // one. An audible stall, never a read past filled content.
        while state.needs_refill(0) && state.needs_refill(1) {
            if state.stop_requested() {
                break 'playback;
            }
            let level = scale_level(decoder.level(), state.volume());
            pace_until(next_due);
            output.lock().set_level(level);
            next_due += sample_interval;
        }

        let sample = state.current_sample();

        // First arrival at the loop start point: capture the codec state so
        // every later wrap resumes with an identical predictor/step pair.
        if first_pass && state.loop_enabled() {
            let loop_start = state.loop_start();
            if loop_start > 0 && sample == loop_start {
                state.save_codec_state(decoder.state());
                first_pass = false;
            }
        }

        // High nibble on even sample indices, low on odd; the byte position
        // advances on odd. A drained buffer flips to needs-refill and decode
        // switches to the other one.
        let byte = buffers.byte_at(active, pos);
        let code = if sample & 1 == 1 {
            pos += 1;
            if pos >= buffer_len {
                state.mark_needs_refill(active);
                active ^= 1;
                pos = 0;
                state.set_active_buffer(active);
            }
            byte & 0x0F
        } else {
            byte >> 4
        };
        state.set_buffer_pos(pos);
        state.set_current_sample(sample + 1);

        // Loop wrap: the fetched code is discarded, the timeline rewinds to
        // the loop start, both buffers drain, and the feeder is told to
        // re-seek the source (sequential position no longer matches).
        if state.loop_enabled() {
            let loop_end = match state.loop_end() {
                0 => total,
                end => end,
            };
            if sample + 1 >= loop_end {
                trace!(loop_end, "loop wrap");
                state.set_current_sample(state.loop_start());
                if let Some(saved) = state.saved_codec_state() {
                    decoder.restore(saved);
                }
                state.mark_needs_refill(0);
                state.mark_needs_refill(1);
                active = 0;
                pos = 0;
                state.set_active_buffer(0);
                state.set_buffer_pos(0);
                state.set_resync_pending();
                continue;
            }
        }

        let level = scale_level(decoder.decode(code), state.volume());

        pace_until(next_due);
        output.lock().set_level(level);
        next_due += sample_interval;
    }

    // Silence the sink, then publish completion. Order matters: a concurrent
    // observer must never see the engine gone while playback_done is unset.
    output.lock().silence();
    state.finish_playback();

    debug!(decoded = state.current_sample(), "decode engine finished");
}
