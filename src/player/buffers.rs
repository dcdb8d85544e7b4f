//! Double-buffered byte storage between the feeder and the decode engine.
//!
//! Two fixed, equal-size regions of packed nibble pairs. At any instant each
//! region is either ready-to-decode or needs-refill; the engine drains one
//! while the feeder may concurrently refill the other. Handoff is coordinated
//! through the needs-refill flags in [`PlaybackState`]; the mutexes below only
//! keep the raw storage in safe Rust and are uncontended under that protocol,
//! since a side touches a buffer only while the flag assigns it ownership.
//!
//! [`PlaybackState`]: super::state::PlaybackState

use crate::container::ImaSource;
use parking_lot::Mutex;
use std::io;

/// The two half-buffers.
pub struct HalfBuffers {
    buffers: [Mutex<Box<[u8]>>; 2],
    len: usize,
}

impl std::fmt::Debug for HalfBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HalfBuffers").field("len", &self.len).finish()
    }
}

impl HalfBuffers {
    /// Allocate two zeroed half-buffers of `len` bytes each.
    pub fn new(len: usize) -> Self {
        HalfBuffers {
            buffers: [
                Mutex::new(vec![0u8; len].into_boxed_slice()),
                Mutex::new(vec![0u8; len].into_boxed_slice()),
            ],
            len,
        }
    }

    /// Bytes per half-buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the half-buffers hold no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Engine side: fetch one packed byte from half-buffer `index`.
    pub fn byte_at(&self, index: usize, pos: usize) -> u8 {
        self.buffers[index].lock()[pos]
    }

    /// Feeder side: refill half-buffer `index` from the source.
    ///
    /// Returns the number of bytes placed; 0 means the source had nothing.
    /// A partial fill near end of stream is fine; the engine stops at the
    /// declared sample count and never reads past the filled prefix of the
    /// final buffer.
    pub fn fill_from(&self, index: usize, source: &mut ImaSource) -> io::Result<usize> {
        let mut buffer = self.buffers[index].lock();
        source.read_into(&mut buffer)
    }
}
