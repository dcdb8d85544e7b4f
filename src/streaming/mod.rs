//! Host audio output for the duty-cycle level stream.
//!
//! On target hardware the decode engine drives a PWM duty register directly.
//! On a hosted system this module stands in for the pin: the engine's levels
//! flow through a ring buffer into a rodio output stream, with memory bounded
//! by the ring size.

pub mod device;
pub mod ring_buffer;

pub use device::{AudioDevice, StreamOutput};
pub use ring_buffer::RingBuffer;

/// Backoff between producer retries when the ring is full, in microseconds.
pub const BUFFER_BACKOFF_MICROS: u64 = 100;

/// Configuration for streaming playback
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Size of the ring buffer (in levels).
    /// Larger buffers = more latency but less chance of underrun.
    pub ring_buffer_size: usize,

    /// Sample rate in Hz. Use the bound source's declared rate; rodio
    /// resamples to the device rate.
    pub sample_rate: u32,

    /// Number of audio channels (the level stream is mono).
    pub channels: u16,
}

impl StreamConfig {
    /// Configuration optimized for low latency.
    /// Buffer = 1024 levels ≈ 128 ms @ 8 kHz.
    pub fn low_latency(sample_rate: u32) -> Self {
        StreamConfig {
            ring_buffer_size: 1024,
            sample_rate,
            channels: 1,
        }
    }

    /// Configuration optimized for stability.
    /// Buffer = 4096 levels ≈ 512 ms @ 8 kHz.
    pub fn stable(sample_rate: u32) -> Self {
        StreamConfig {
            ring_buffer_size: 4096,
            sample_rate,
            channels: 1,
        }
    }

    /// Buffer latency in milliseconds.
    pub fn latency_ms(&self) -> f32 {
        ((self.ring_buffer_size as f32) / (self.sample_rate as f32)) * 1000.0
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::stable(8000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_latency() {
        let config = StreamConfig::low_latency(8000);
        let latency = config.latency_ms();
        assert!(latency > 120.0 && latency < 136.0);
    }

    #[test]
    fn test_stable_config_latency() {
        let config = StreamConfig::stable(8000);
        assert!(config.latency_ms() > 500.0);
    }
}
