//! IMA container parsing and source descriptors.
//!
//! The container is a thin wrapper around packed 4-bit-pair ADPCM data:
//! a 4-byte `IMAA` magic tag, a little-endian u32 sample rate, a little-endian
//! u32 sample count, 12 reserved bytes, then encoded data to end of stream.
//! Opening validates the header and records where the data begins; nothing is
//! mutated on a failed open.

use crate::{ImaError, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

/// Magic tag at the start of every IMA container.
pub const MAGIC: [u8; 4] = *b"IMAA";

/// Total header length in bytes; encoded data begins at this offset.
pub const HEADER_LEN: usize = 24;

/// Sample rates the playback engine supports, in Hz.
///
/// Any other declared rate is rejected at open time.
pub const VALID_RATES: [u32; 7] = [15625, 12500, 10000, 8000, 6250, 5000, 4000];

/// Abstraction over the byte source backing a container.
///
/// Blanket-implemented for anything readable and seekable that can cross
/// thread boundaries, so production code runs on [`File`] and tests on
/// `io::Cursor`.
pub trait MediaSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> MediaSource for T {}

/// Parsed container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImaHeader {
    /// Declared sample rate in Hz, one of [`VALID_RATES`].
    pub sample_rate: u32,
    /// Total encoded sample count.
    pub sample_count: u32,
}

impl ImaHeader {
    /// Parse and validate a raw 24-byte header.
    ///
    /// # Errors
    /// [`ImaError::InvalidMagic`] when the tag is wrong,
    /// [`ImaError::UnsupportedRate`] when the declared rate is outside
    /// [`VALID_RATES`].
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Result<ImaHeader> {
        if raw[0..4] != MAGIC {
            return Err(ImaError::InvalidMagic);
        }

        let sample_rate = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let sample_count = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
        // raw[12..24] is reserved padding.

        if !VALID_RATES.contains(&sample_rate) {
            return Err(ImaError::UnsupportedRate { rate: sample_rate });
        }

        Ok(ImaHeader {
            sample_rate,
            sample_count,
        })
    }
}

/// An open handle to an IMA container: the validated header, the byte offset
/// where encoded data begins, and the reader positioned inside that data.
///
/// Multiple descriptors may be pre-opened and parked in indexed slots for
/// rapid switching; exactly one is bound to the playback state at a time.
pub struct ImaSource {
    reader: Box<dyn MediaSource>,
    header: ImaHeader,
    data_start: u64,
}

impl std::fmt::Debug for ImaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImaSource")
            .field("header", &self.header)
            .field("data_start", &self.data_start)
            .finish_non_exhaustive()
    }
}

impl ImaSource {
    /// Open a container file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ImaSource> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Open a container from any readable, seekable byte source.
    ///
    /// The reader is consumed; on failure nothing observable has changed for
    /// the caller beyond the lost reader.
    pub fn from_reader<R: MediaSource + 'static>(mut reader: R) -> Result<ImaSource> {
        let mut raw = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut raw)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => ImaError::TruncatedHeader,
                _ => ImaError::Io(e),
            })?;

        let header = ImaHeader::parse(&raw)?;
        let data_start = reader.stream_position()?;

        Ok(ImaSource {
            reader: Box::new(reader),
            header,
            data_start,
        })
    }

    /// Declared sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.header.sample_rate
    }

    /// Total encoded sample count.
    pub fn sample_count(&self) -> u32 {
        self.header.sample_count
    }

    /// Byte offset where encoded data begins.
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Fixed inter-sample interval for the declared rate.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.header.sample_rate))
    }

    /// Duration of the full container in seconds.
    pub fn duration_seconds(&self) -> f64 {
        f64::from(self.header.sample_count) / f64::from(self.header.sample_rate)
    }

    /// Fill `buf` from the current read position.
    ///
    /// Keeps reading until the buffer is full or the underlying source
    /// reports end of stream; returns the number of bytes placed. A return
    /// of 0 means no data was available at all.
    pub fn read_into(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Seek the read position to the byte holding `sample`.
    ///
    /// Two samples pack into each byte, so the target is
    /// `data_start + sample / 2`. Used for loop resync after a wrap.
    pub fn seek_to_sample(&mut self, sample: u32) -> io::Result<()> {
        self.reader
            .seek(SeekFrom::Start(self.data_start + u64::from(sample / 2)))?;
        Ok(())
    }

    /// Seek back to the start of the encoded data.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(self.data_start))?;
        Ok(())
    }
}
