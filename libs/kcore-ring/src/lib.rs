// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A bounded ring buffer of fixed-size slots with an allocate/write/free
//! protocol: `allocate` reserves the next free slot (blocking or not),
//! `write` fills it, `free` returns it to the pool.
//!
//! Slot storage is generic over `T` rather than a raw `base` pointer plus an
//! `obj_size` byte count, so callers get normal Rust typing instead of
//! `memcpy`-ing into an untyped blob.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod error;

pub use error::Error;

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};
use kcore_sync::Mutex;

struct Head {
    /// Monotonically increasing allocation counter; the returned slot index
    /// is always `next % capacity`.
    next: usize,
    /// Slots handed out by `allocate` that have not yet been `free`d.
    outstanding: usize,
}

/// A bounded pool of `capacity` slots of type `T`.
///
/// The allocation head is guarded by an internal mutex (so only one thread
/// reserves a given index at a time); the tail — the index of the most
/// recently freed slot — is a plain atomic, advanced independently by
/// whichever consumer calls [`RingBuffer::free`].
pub struct RingBuffer<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    capacity: usize,
    head: Mutex<Head>,
    tail: AtomicUsize,
}

// Safety: `slots` is only ever accessed for a given index by the single
// thread that currently holds it (between a successful `allocate` and the
// matching `free`); `head`/`tail` synchronize which thread that is.
unsafe impl<T: Send> Send for RingBuffer<T> {}
// Safety: see above; shared access never aliases a live slot.
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Creates a ring buffer of `capacity` slots, each initialized with
    /// `T::default()`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self
    where
        T: Default,
    {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::new(T::default())))
            .collect();
        Self {
            slots,
            capacity,
            head: Mutex::new(Head {
                next: 0,
                outstanding: 0,
            }),
            tail: AtomicUsize::new(0),
        }
    }

    /// The number of slots in the pool.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserves the next free slot, advancing the allocation head.
    ///
    /// If the pool is full (every slot outstanding), `block = true` busy-waits
    /// until a slot is freed; `block = false` fails immediately with
    /// [`Error::WouldBlock`].
    pub fn allocate(&self, block: bool) -> Result<usize, Error> {
        loop {
            {
                let mut head = self.head.lock();
                if head.outstanding < self.capacity {
                    let idx = head.next % self.capacity;
                    head.next += 1;
                    head.outstanding += 1;
                    return Ok(idx);
                }
            }

            if !block {
                return Err(Error::WouldBlock);
            }
            core::hint::spin_loop();
        }
    }

    /// Writes `data` into slot `idx`, or zeroes it (via `T::default()`) when
    /// `data` is `None`.
    pub fn write(&self, idx: usize, data: Option<T>) -> Result<(), Error>
    where
        T: Default,
    {
        if idx >= self.capacity {
            return Err(Error::InvalidArg);
        }
        let value = data.unwrap_or_default();
        // Safety: `idx` is in range, and by the allocate/free protocol the
        // caller holding `idx` has exclusive access to this slot.
        unsafe {
            (*self.slots[idx].get()).write(value);
        }
        Ok(())
    }

    /// Returns the current value stored in slot `idx` without freeing it.
    pub fn peek(&self, idx: usize) -> Result<&T, Error>
    where
        T: Sized,
    {
        if idx >= self.capacity {
            return Err(Error::InvalidArg);
        }
        // Safety: `idx` is in range; slot was written by a prior `write` and
        // is exclusively owned by the caller per the allocate/free protocol.
        Ok(unsafe { (*self.slots[idx].get()).assume_init_ref() })
    }

    /// Returns slot `idx` to the pool, advancing the tail.
    pub fn free(&self, idx: usize) -> Result<(), Error> {
        if idx >= self.capacity {
            return Err(Error::InvalidArg);
        }
        let mut head = self.head.lock();
        head.outstanding = head.outstanding.saturating_sub(1);
        drop(head);
        self.tail.store(idx, Ordering::Release);
        Ok(())
    }

    /// The index most recently passed to [`RingBuffer::free`].
    #[must_use]
    pub fn tail(&self) -> usize {
        self.tail.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_and_drain() {
        let ring: RingBuffer<u32> = RingBuffer::new(4);
        let mut indices = Vec::new();
        for _ in 0..4 {
            let idx = ring.allocate(false).unwrap();
            ring.write(idx, Some(idx as u32)).unwrap();
            indices.push(idx);
        }
        assert_eq!(indices, vec![0, 1, 2, 3]);

        assert!(matches!(ring.allocate(false), Err(Error::WouldBlock)));

        ring.free(0).unwrap();
        let idx = ring.allocate(false).unwrap();
        assert_eq!(idx, 4 % ring.capacity());
    }

    #[test]
    fn write_none_zeroes_slot() {
        let ring: RingBuffer<u32> = RingBuffer::new(2);
        let idx = ring.allocate(false).unwrap();
        ring.write(idx, Some(42)).unwrap();
        assert_eq!(*ring.peek(idx).unwrap(), 42);
        ring.write(idx, None).unwrap();
        assert_eq!(*ring.peek(idx).unwrap(), 0);
    }

    #[test]
    fn out_of_range_index_is_invalid_arg() {
        let ring: RingBuffer<u32> = RingBuffer::new(2);
        assert!(matches!(ring.write(5, Some(1)), Err(Error::InvalidArg)));
        assert!(matches!(ring.free(5), Err(Error::InvalidArg)));
    }

    #[test]
    fn blocking_allocate_unblocks_after_free() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let ring = Arc::new(RingBuffer::<u32>::new(1));
        let idx = ring.allocate(false).unwrap();
        assert_eq!(idx, 0);

        let ring2 = ring.clone();
        let handle = thread::spawn(move || ring2.allocate(true).unwrap());

        thread::sleep(Duration::from_millis(20));
        ring.free(0).unwrap();

        let idx2 = handle.join().unwrap();
        assert_eq!(idx2, 0);
    }
}
