// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::{Deref, DerefMut};
use kcore_util::loom::{Ordering, UnsafeCell};
use kcore_util::loom_const_fn;
use kcore_util::Backoff;

/// A test-and-set mutex with an exponential-backoff spin body — a stand-in
/// for a future blocking mutex, with the same acquire/release semantics as
/// [`crate::Spinlock`], just friendlier under contention. Callers must not
/// assume fairness; for a fair lock use [`crate::TicketLock`] or
/// [`crate::ListMutex`].
pub struct Mutex<T: ?Sized> {
    lock: kcore_util::loom::AtomicBool,
    data: UnsafeCell<T>,
}

#[clippy::has_significant_drop]
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    marker: PhantomData<&'a mut T>,
}

// Safety: `Mutex<T>` only exposes `T` through a guard requiring the lock bit
// to be held, so sharing across threads is sound whenever `T: Send`.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
// Safety: see above.
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    loom_const_fn! {
        pub const fn new(val: T) -> Mutex<T> {
            Mutex {
                lock: kcore_util::loom::AtomicBool::new(false),
                data: UnsafeCell::new(val),
            }
        }
    }

    /// Consumes the mutex, returning the underlying data.
    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// # Safety
    ///
    /// Must only be called while the calling thread logically holds the
    /// lock bit.
    #[inline]
    unsafe fn make_guard_unchecked(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            mutex: self,
            marker: PhantomData,
        }
    }

    /// Acquires the mutex, blocking the current thread until it is able to
    /// do so. Reentrance is undefined behavior.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let mut boff = Backoff::default();
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.is_locked() {
                boff.spin();
            }
        }

        // Safety: the compare_exchange above established that we hold the lock.
        unsafe { self.make_guard_unchecked() }
    }

    /// Attempts to acquire the mutex without blocking.
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
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

    /// Returns `true` if some thread currently holds the mutex.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.with_mut(|data| unsafe { &mut *data })
    }

    /// Forcibly unlocks the mutex.
    ///
    /// # Safety
    ///
    /// Must only be called when the current thread logically owns a
    /// `MutexGuard` that has been leaked with `mem::forget`.
    #[inline]
    pub unsafe fn force_unlock(&self) {
        self.lock.store(false, Ordering::Release);
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Mutex<T> {
        Mutex::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Mutex").field("data", &&*guard).finish(),
            None => f.debug_struct("Mutex").field("data", &"<locked>").finish(),
        }
    }
}

// Safety: a `MutexGuard` only exists while the lock is held, so sharing
// `&MutexGuard` is sound whenever `T: Sync`.
unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<'a, T: ?Sized> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.mutex.data.with(|data| unsafe { &*data })
    }
}

impl<'a, T: ?Sized> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.mutex.data.with_mut(|data| unsafe { &mut *data })
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        // Safety: a MutexGuard always holds the lock.
        unsafe { self.mutex.force_unlock() }
    }
}

impl<T: fmt::Debug + ?Sized> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(feature = "lock_api")]
// Safety: the contract of `lock_api::RawMutex` matches `Mutex`'s own.
unsafe impl lock_api::RawMutex for Mutex<()> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Mutex::new(());
    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {
        mem::forget(Mutex::lock(self));
    }

    fn try_lock(&self) -> bool {
        let g = Mutex::try_lock(self);
        let ok = g.is_some();
        mem::forget(g);
        ok
    }

    unsafe fn unlock(&self) {
        // Safety: ensured by caller.
        unsafe { Mutex::force_unlock(self) }
    }

    fn is_locked(&self) -> bool {
        Mutex::is_locked(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke() {
        let m = Mutex::new(());
        drop(m.lock());
        drop(m.lock());
    }

    #[test]
    fn try_lock() {
        let mutex = Mutex::new(42);
        let a = mutex.try_lock();
        assert_eq!(a.as_deref().copied(), Some(42));
        assert!(mutex.try_lock().is_none());
        drop(a);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn basic_multi_threaded() {
        use std::sync::Arc;
        use std::thread;

        let lock = Arc::new(Mutex::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*lock.lock(), 2000);
    }
}
