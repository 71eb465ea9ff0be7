// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use kcore_util::loom::{Ordering, UnsafeCell};
use kcore_util::loom_const_fn;

/// A test-and-set spinlock: one bit of state, unconditional busy-wait
/// acquire, atomic clear to release.
///
/// Unlike [`crate::Mutex`], `Spinlock` issues no backoff in its spin body —
/// it is the bare primitive that [`crate::Mutex`] builds an architectural
/// pause hint on top of.
pub struct Spinlock<T: ?Sized> {
    lock: kcore_util::loom::AtomicBool,
    data: UnsafeCell<T>,
}

#[clippy::has_significant_drop]
#[must_use = "if unused the Spinlock will immediately unlock"]
pub struct SpinlockGuard<'a, T: ?Sized> {
    lock: &'a Spinlock<T>,
    marker: PhantomData<&'a mut T>,
}

// Safety: `Spinlock<T>` only exposes `T` through a guard that requires the
// lock bit to be held, so sharing the lock across threads is sound whenever
// `T: Send`.
unsafe impl<T: ?Sized + Send> Send for Spinlock<T> {}
// Safety: see above.
unsafe impl<T: ?Sized + Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    loom_const_fn! {
        pub const fn new(val: T) -> Spinlock<T> {
            Spinlock {
                lock: kcore_util::loom::AtomicBool::new(false),
                data: UnsafeCell::new(val),
            }
        }
    }

    /// Consumes the spinlock, returning the underlying data.
    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Spinlock<T> {
    /// # Safety
    ///
    /// Must only be called while the calling thread logically holds the
    /// lock bit.
    #[inline]
    unsafe fn make_guard_unchecked(&self) -> SpinlockGuard<'_, T> {
        SpinlockGuard {
            lock: self,
            marker: PhantomData,
        }
    }

    /// Acquires the lock, busy-waiting until it is available. There is no
    /// timeout and no fairness guarantee.
    #[inline]
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.is_locked() {
                core::hint::spin_loop();
            }
        }

        // Safety: the compare_exchange above established that we hold the lock.
        unsafe { self.make_guard_unchecked() }
    }

    /// Attempts to acquire the lock without blocking.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        if self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            // Safety: the compare_exchange above established that we hold the lock.
            Some(unsafe { self.make_guard_unchecked() })
        } else {
            None
        }
    }

    /// Returns `true` if some thread currently holds the lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }

    /// Returns a mutable reference to the protected data, bypassing the lock
    /// since the `&mut self` borrow already guarantees exclusivity.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.with_mut(|data| unsafe { &mut *data })
    }
}

impl<T: Default> Default for Spinlock<T> {
    fn default() -> Self {
        Spinlock::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Spinlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Spinlock").field("data", &&*guard).finish(),
            None => f.debug_struct("Spinlock").field("data", &"<locked>").finish(),
        }
    }
}

// Safety: a `SpinlockGuard` only exists while the lock is held, so sharing
// `&SpinlockGuard` is sound whenever `T: Sync`.
unsafe impl<T: ?Sized + Sync> Sync for SpinlockGuard<'_, T> {}

impl<'a, T: ?Sized> Deref for SpinlockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.lock.data.with(|data| unsafe { &*data })
    }
}

impl<'a, T: ?Sized> DerefMut for SpinlockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.lock.data.with_mut(|data| unsafe { &mut *data })
    }
}

impl<T: ?Sized> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.lock.store(false, Ordering::Release);
    }
}

impl<T: fmt::Debug + ?Sized> fmt::Debug for SpinlockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke() {
        let lock = Spinlock::new(5);
        assert_eq!(*lock.lock(), 5);
        *lock.lock() = 6;
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = Spinlock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn contended_increment() {
        use std::sync::Arc;
        use std::thread;

        let lock = Arc::new(Spinlock::new(0_i32));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*lock.lock(), 8000);
    }
}
