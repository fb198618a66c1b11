//! Lock-free ring buffer between the capture callback and the detector
//!
//! The cpal callback runs on a real-time thread and must not allocate or
//! block, so it writes into pre-allocated storage indexed by two atomics.
//! The detector drains it from the async side.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default capacity: ~1.4 seconds of 48kHz stereo
pub const DEFAULT_CAPACITY: usize = 131_072;

/// Single-producer single-consumer ring buffer of f32 samples
pub struct AudioRingBuffer {
    slots: Box<[UnsafeCell<f32>]>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

// Safety: one producer advances write_pos, one consumer advances read_pos, and
// a slot is only touched by the side that currently owns it.
unsafe impl Send for AudioRingBuffer {}
unsafe impl Sync for AudioRingBuffer {}

impl Default for AudioRingBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl AudioRingBuffer {
    /// Create a buffer holding up to `capacity - 1` samples
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        let slots = (0..capacity).map(|_| UnsafeCell::new(0.0)).collect();
        Self {
            slots,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of samples ready to be read
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        (write + self.capacity() - read) % self.capacity()
    }

    /// Push samples from the audio callback.
    ///
    /// Never allocates. Returns how many samples fit; the rest are dropped.
    pub fn write(&self, samples: &[f32]) -> usize {
        let cap = self.capacity();
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);

        // One slot stays empty so full and empty are distinguishable
        let free = cap - 1 - (write + cap - read) % cap;
        let count = samples.len().min(free);

        for (i, &sample) in samples[..count].iter().enumerate() {
            // Safety: slots in [write, write + free) belong to the producer
            unsafe { *self.slots[(write + i) % cap].get() = sample };
        }

        self.write_pos.store((write + count) % cap, Ordering::Release);
        count
    }

    /// Pop samples into `output`, returning how many were read
    pub fn read(&self, output: &mut [f32]) -> usize {
        let cap = self.capacity();
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);

        let count = output.len().min((write + cap - read) % cap);

        for (i, slot) in output[..count].iter_mut().enumerate() {
            // Safety: slots in [read, write) belong to the consumer
            *slot = unsafe { *self.slots[(read + i) % cap].get() };
        }

        self.read_pos.store((read + count) % cap, Ordering::Release);
        count
    }

    /// Drop everything currently buffered
    pub fn clear(&self) {
        self.read_pos
            .store(self.write_pos.load(Ordering::Acquire), Ordering::Release);
    }
}
