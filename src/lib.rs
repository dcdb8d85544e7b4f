//! Real-time IMA ADPCM streaming player.
//!
//! Decodes 4-bit adaptive differential PCM containers and emits them as a
//! duty-cycle level stream at a precise, constant sample rate. A dedicated
//! decode thread paces one sample per interval against a drift-free deadline
//! while a periodic buffer feeder keeps two half-buffers fed from storage, so
//! playback never glitches on I/O latency: it stalls audibly instead of
//! reading unfilled bytes.
//!
//! # Features
//! - IMA/DVI ADPCM decoder with loop-seam state capture and restore
//! - Double-buffered source streaming with lock-free flag handoff
//! - Sample-accurate pacing (deadline advanced from the previous deadline,
//!   never from "now")
//! - Loop windows with automatic source re-seek after each wrap
//! - Indexed pre-opened sources for near-instant track switching
//! - Deferred end-of-playback callback, never run on the decode thread
//!
//! # Crate feature flags
//! - `streaming` (opt-in): host audio output through rodio, plus the
//!   `ima-play` CLI binary
//! - `export-wav` (opt-in): offline container-to-WAV decoding via hound
//!
//! # Quick start
//! ```no_run
//! use ima_stream::output::{shared, NullOutput};
//! use ima_stream::ImaPlayer;
//!
//! let mut player = ImaPlayer::new(shared(NullOutput));
//! player.load("music.ima").unwrap();
//! player.set_loop_seconds(true, 2.0, 10.0).unwrap();
//! ```
//!
//! ## Real-time host audio
//! ```no_run
//! # #[cfg(feature = "streaming")]
//! # {
//! use ima_stream::streaming::{AudioDevice, StreamConfig, StreamOutput};
//! use ima_stream::{ImaPlayer, ImaSource};
//!
//! let source = ImaSource::open("music.ima").unwrap();
//! let config = StreamConfig::low_latency(source.sample_rate());
//! let stream = StreamOutput::new(config).unwrap();
//! let _device = AudioDevice::new(&config, stream.ring_buffer()).unwrap();
//! let mut player = ImaPlayer::new(ima_stream::output::shared(stream));
//! player.load("music.ima").unwrap();
//! # }
//! ```

#![warn(missing_docs)]

pub mod codec; // ADPCM state machine (core)
pub mod container; // Container parsing & source descriptors
pub mod output; // Duty-cycle output boundary
pub mod player; // Playback engine & control API

#[cfg(feature = "export-wav")]
pub mod export; // Offline WAV export
#[cfg(feature = "streaming")]
pub mod streaming; // Host audio output

/// Error types for player operations
#[derive(thiserror::Error, Debug)]
pub enum ImaError {
    /// Container does not start with the expected `IMAA` magic tag.
    #[error("source must start with the IMAA magic tag")]
    InvalidMagic,

    /// Container declares a sample rate outside the supported set.
    #[error("unsupported sample rate {rate} Hz")]
    UnsupportedRate {
        /// Rate declared in the container header.
        rate: u32,
    },

    /// Container ended before the 24-byte header was complete.
    #[error("unexpected end of header")]
    TruncatedHeader,

    /// IO error from filesystem or source reader.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No source is bound to playback.
    #[error("no source loaded")]
    NoSource,

    /// An indexed operation named an empty slot.
    #[error("no source opened for id {id}")]
    UnknownSourceId {
        /// The requested slot index.
        id: usize,
    },

    /// The decode engine thread could not be started.
    #[error("decode engine failed to start: {0}")]
    EngineStart(String),

    /// The decode engine did not exit within the bounded wait.
    #[error("decode engine did not stop within {timeout_ms} ms")]
    StopTimeout {
        /// The wait budget that ran out.
        timeout_ms: u64,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Audio device error.
    #[error("audio device error: {0}")]
    AudioDevice(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl From<String> for ImaError {
    fn from(msg: String) -> Self {
        ImaError::Other(msg)
    }
}

impl From<&str> for ImaError {
    fn from(msg: &str) -> Self {
        ImaError::Other(msg.to_string())
    }
}

/// Result type for player operations
pub type Result<T> = std::result::Result<T, ImaError>;

// Public API exports
pub use codec::{AdpcmDecoder, CodecState};
pub use container::{ImaHeader, ImaSource, MediaSource, VALID_RATES};
pub use output::{CaptureOutput, NullOutput, PulseOutput, SharedOutput};
pub use player::{
    EndCallback, ImaPlayer, LoopStatus, PlaybackState, PlayerConfig, PlayerStatus,
};

#[cfg(feature = "export-wav")]
pub use export::export_wav;
#[cfg(feature = "streaming")]
pub use streaming::{AudioDevice, RingBuffer, StreamConfig, StreamOutput};
