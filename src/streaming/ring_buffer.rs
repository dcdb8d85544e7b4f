//! Ring buffer between the decode engine and the audio device.
//!
//! A single-producer single-consumer circular buffer of raw duty-cycle
//! levels: the decode engine writes one level per sample period, the audio
//! device drains batches for the output stream. Storage sits behind a mutex
//! for safe Rust; read/write positions are atomics with acquire/release
//! pairing so each side observes the other's progress without holding locks.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Error type for ring buffer construction
#[derive(Debug, Clone)]
pub struct RingBufferError(
    /// Human-readable reason the buffer could not be created.
    pub String,
);

impl std::fmt::Display for RingBufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RingBufferError {}

/// Ring buffer of duty-cycle levels
///
/// # Thread Safety
/// - One producer (the decode engine, via [`StreamOutput`])
/// - One consumer (the audio device source iterator)
/// - Position tracking uses atomic operations for memory visibility
///
/// [`StreamOutput`]: super::StreamOutput
#[derive(Debug)]
pub struct RingBuffer {
    /// Shared level storage (mutex keeps the byte region in safe Rust)
    levels: Mutex<Vec<u16>>,
    /// Write position (producer)
    write_pos: AtomicUsize,
    /// Read position (consumer)
    read_pos: AtomicUsize,
    /// Capacity (power of 2 for cheap wrap-around)
    capacity: usize,
    /// Capacity mask: `pos & mask == pos % capacity`
    mask: usize,
}

impl RingBuffer {
    /// Maximum capacity guard: 64 MB worth of u16 levels.
    const MAX_CAPACITY: usize = 64 * 1024 * 1024 / std::mem::size_of::<u16>();

    /// Create a ring buffer; capacity rounds up to the next power of two.
    ///
    /// # Errors
    /// Capacity of 0, or a capacity beyond the allocation guard.
    pub fn new(requested_capacity: usize) -> Result<Self, RingBufferError> {
        if requested_capacity == 0 {
            return Err(RingBufferError(
                "ring buffer capacity must be greater than 0".into(),
            ));
        }

        let capacity = requested_capacity.next_power_of_two();
        if capacity > Self::MAX_CAPACITY {
            return Err(RingBufferError(format!(
                "ring buffer capacity {capacity} exceeds maximum safe size {}",
                Self::MAX_CAPACITY
            )));
        }

        Ok(RingBuffer {
            levels: Mutex::new(vec![0u16; capacity]),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        })
    }

    /// Number of levels available to read without blocking.
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Free space available to the producer.
    pub fn available_write(&self) -> usize {
        self.capacity - self.available_read() - 1
    }

    /// Producer side: append levels; returns how many fit.
    pub fn write(&self, levels: &[u16]) -> usize {
        let mut storage = self.levels.lock();

        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let available = self.capacity - write_pos.wrapping_sub(read_pos) - 1;

        let to_write = levels.len().min(available);
        if to_write == 0 {
            return 0;
        }

        let write_idx = write_pos & self.mask;
        if write_idx + to_write <= self.capacity {
            storage[write_idx..write_idx + to_write].copy_from_slice(&levels[..to_write]);
        } else {
            let first = self.capacity - write_idx;
            storage[write_idx..].copy_from_slice(&levels[..first]);
            storage[..to_write - first].copy_from_slice(&levels[first..to_write]);
        }

        drop(storage);

        // Release pairs with the consumer's acquire: data lands before the
        // position moves.
        self.write_pos
            .store(write_pos.wrapping_add(to_write), Ordering::Release);

        to_write
    }

    /// Consumer side: drain levels into `dest`; returns how many were read.
    pub fn read(&self, dest: &mut [u16]) -> usize {
        let storage = self.levels.lock();

        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let available = write_pos.wrapping_sub(read_pos);

        let to_read = dest.len().min(available);
        if to_read == 0 {
            return 0;
        }

        let read_idx = read_pos & self.mask;
        if read_idx + to_read <= self.capacity {
            dest[..to_read].copy_from_slice(&storage[read_idx..read_idx + to_read]);
        } else {
            let first = self.capacity - read_idx;
            dest[..first].copy_from_slice(&storage[read_idx..]);
            dest[first..to_read].copy_from_slice(&storage[..to_read - first]);
        }

        drop(storage);

        self.read_pos
            .store(read_pos.wrapping_add(to_read), Ordering::Release);

        to_read
    }

    /// Discard everything buffered.
    pub fn flush(&self) {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write_pos, Ordering::Release);
    }

    /// Fill level, 0.0 to 1.0.
    pub fn fill_percentage(&self) -> f32 {
        (self.available_read() as f32) / (self.capacity as f32)
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
