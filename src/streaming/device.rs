//! Audio device integration using rodio.
//!
//! `StreamOutput` stands in for the PWM pin on a hosted system: the decode
//! engine pushes duty-cycle levels into the ring buffer, and `AudioDevice`
//! drains them into a rodio output stream, mapping the unsigned level range
//! onto normalized samples.

use super::{RingBuffer, StreamConfig, BUFFER_BACKOFF_MICROS};
use crate::output::PulseOutput;
use crate::{ImaError, Result};
use rodio::{OutputStream, Sink, Source};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Map an unsigned duty-cycle level onto a normalized sample.
fn level_to_sample(level: u16) -> f32 {
    f32::from(level) / 32767.5 - 1.0
}

/// Pulse sink backed by the streaming ring buffer.
///
/// `set_level` runs on the decode engine's paced hot loop, so it never
/// blocks: when the ring is full the level is dropped and counted as an
/// overrun instead.
pub struct StreamOutput {
    ring: Arc<RingBuffer>,
    overruns: Arc<AtomicUsize>,
}

impl StreamOutput {
    /// Create a pulse sink with a ring buffer sized from `config`.
    pub fn new(config: StreamConfig) -> Result<Self> {
        let ring = RingBuffer::new(config.ring_buffer_size)
            .map_err(|e| ImaError::Config(e.to_string()))?;
        Ok(StreamOutput {
            ring: Arc::new(ring),
            overruns: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Ring buffer handle for [`AudioDevice`] integration.
    pub fn ring_buffer(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.ring)
    }

    /// Levels dropped because the ring was full.
    pub fn overrun_count(&self) -> usize {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Block until the ring has drained below `target` buffered levels.
    ///
    /// Useful at end of playback to let the device finish what the engine
    /// already produced.
    pub fn drain_to(&self, target: usize) {
        while self.ring.available_read() > target {
            std::thread::sleep(Duration::from_micros(BUFFER_BACKOFF_MICROS));
        }
    }
}

impl PulseOutput for StreamOutput {
    fn set_level(&mut self, level: u16) {
        if self.ring.write(&[level]) == 0 {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Audio source that reads level batches from the ring buffer.
struct LevelSource {
    ring: Arc<RingBuffer>,
    sample_rate: u32,
    channels: u16,
    finished: Arc<AtomicBool>,
    /// Internal batch, refilled from the ring to reduce lock traffic.
    batch: Vec<u16>,
    batch_len: usize,
    batch_pos: usize,
}

impl LevelSource {
    const BATCH: usize = 256;

    fn new(ring: Arc<RingBuffer>, config: &StreamConfig, finished: Arc<AtomicBool>) -> Self {
        LevelSource {
            ring,
            sample_rate: config.sample_rate,
            channels: config.channels,
            finished,
            batch: vec![0u16; Self::BATCH],
            batch_len: 0,
            batch_pos: 0,
        }
    }
}

impl Iterator for LevelSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.batch_pos >= self.batch_len {
            if self.finished.load(Ordering::Relaxed) && self.ring.available_read() == 0 {
                return None;
            }
            self.batch_len = self.ring.read(&mut self.batch);
            self.batch_pos = 0;
            if self.batch_len == 0 {
                // Underrun: keep the stream alive with silence.
                return Some(0.0);
            }
        }

        let level = self.batch[self.batch_pos];
        self.batch_pos += 1;
        Some(level_to_sample(level))
    }
}

impl Source for LevelSource {
    fn current_frame_len(&self) -> Option<usize> {
        match self.ring.available_read() {
            0 => Some(Self::BATCH),
            n => Some(n),
        }
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Audio playback device using rodio
pub struct AudioDevice {
    _stream: OutputStream,
    sink: Sink,
    finished: Arc<AtomicBool>,
}

impl AudioDevice {
    /// Open the default output device and start draining the ring buffer.
    pub fn new(config: &StreamConfig, ring: Arc<RingBuffer>) -> Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| ImaError::AudioDevice(format!("failed to create audio stream: {e}")))?;
        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| ImaError::AudioDevice(format!("failed to create audio sink: {e}")))?;

        let finished = Arc::new(AtomicBool::new(false));
        sink.append(LevelSource::new(ring, config, Arc::clone(&finished)));

        Ok(AudioDevice {
            _stream: stream,
            sink,
            finished,
        })
    }

    /// Pause the output stream.
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume the output stream.
    pub fn play(&self) {
        self.sink.play();
    }

    /// Signal that no more levels will be produced; the stream terminates
    /// once the ring drains instead of playing silence forever.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    /// Block until the stream has fully drained after [`finish`].
    ///
    /// [`finish`]: AudioDevice::finish
    pub fn wait_until_end(&self) {
        self.sink.sleep_until_end();
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.finished.store(true, Ordering::Relaxed);
        self.sink.pause();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_to_sample_range() {
        assert!((level_to_sample(0) + 1.0).abs() < 1e-4);
        assert!((level_to_sample(65535) - 1.0).abs() < 1e-4);
        assert!(level_to_sample(32768).abs() < 1e-4);
    }

    #[test]
    fn test_stream_output_counts_overruns() {
        let config = StreamConfig {
            ring_buffer_size: 4,
            sample_rate: 8000,
            channels: 1,
        };
        let mut output = StreamOutput::new(config).unwrap();
        for level in 0..10u16 {
            output.set_level(level);
        }
        // Capacity 4 leaves 3 usable slots.
        assert_eq!(output.overrun_count(), 7);
    }

    #[test]
    fn test_level_source_silence_on_underrun() {
        let ring = Arc::new(RingBuffer::new(16).unwrap());
        let config = StreamConfig::low_latency(8000);
        let mut source = LevelSource::new(ring, &config, Arc::new(AtomicBool::new(false)));
        assert_eq!(source.next(), Some(0.0));
    }

    #[test]
    fn test_level_source_ends_after_finish_and_drain() {
        let ring = Arc::new(RingBuffer::new(16).unwrap());
        ring.write(&[32768, 65535]);
        let config = StreamConfig::low_latency(8000);
        let finished = Arc::new(AtomicBool::new(true));
        let mut source = LevelSource::new(Arc::clone(&ring), &config, finished);

        assert!(source.next().is_some());
        assert!(source.next().is_some());
        assert_eq!(source.next(), None, "finished + drained ends the stream");
    }

    #[test]
    fn test_level_source_reports_config() {
        let ring = Arc::new(RingBuffer::new(16).unwrap());
        let config = StreamConfig::low_latency(12500);
        let source = LevelSource::new(ring, &config, Arc::new(AtomicBool::new(false)));
        assert_eq!(source.sample_rate(), 12500);
        assert_eq!(source.channels(), 1);
    }
}
