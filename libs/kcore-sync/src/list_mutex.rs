// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr;
use kcore_hal::{InterruptGuard, NoopInterruptGuard, NoopScheduler, Scheduler, ThreadId};
use kcore_util::loom::{AtomicPtr, Ordering, UnsafeCell};
use kcore_util::loom_const_fn;

/// The intrusive wait-list element a caller supplies to [`ListMutex::lock`].
///
/// The mutex never allocates: every node lives in the caller's stack frame
/// (or wherever the caller owns it) for the entire duration of the critical
/// section, as an intrusive record the caller supplies rather than one the
/// lock allocates on its behalf. Because `lock` borrows the node for as long
/// as the returned guard lives, the node's address is guaranteed stable for
/// exactly as long as other threads might hold a raw pointer to it.
pub struct ListMutexNode {
    next: AtomicPtr<ListMutexNode>,
    wake: UnsafeCell<ThreadId>,
}

// Safety: access to `wake` and `next` is always synchronized through the
// owning `ListMutex`'s head/tail handoff.
unsafe impl Send for ListMutexNode {}
// Safety: see above.
unsafe impl Sync for ListMutexNode {}

impl ListMutexNode {
    loom_const_fn! {
        #[must_use]
        pub const fn new() -> Self {
            Self {
                next: AtomicPtr::new(ptr::null_mut()),
                wake: UnsafeCell::new(ThreadId(0)),
            }
        }
    }
}

impl Default for ListMutexNode {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListMutexNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListMutexNode")
            .field("next", &self.next.load(Ordering::Relaxed))
            .finish()
    }
}

/// An unbounded FIFO mutex that never busy-waits unconditionally: a blocked
/// caller yields its timeslice to the thread recorded in the current head
/// node instead of spinning.
pub struct ListMutex<T: ?Sized, S: Scheduler = NoopScheduler, G: InterruptGuard = NoopInterruptGuard>
{
    head: AtomicPtr<ListMutexNode>,
    tail: AtomicPtr<ListMutexNode>,
    scheduler: S,
    _guard: PhantomData<G>,
    data: UnsafeCell<T>,
}

#[clippy::has_significant_drop]
#[must_use = "if unused the ListMutex will immediately unlock"]
pub struct ListMutexGuard<'a, T: ?Sized, S: Scheduler = NoopScheduler, G: InterruptGuard = NoopInterruptGuard>
{
    mutex: &'a ListMutex<T, S, G>,
    node: *mut ListMutexNode,
    marker: PhantomData<&'a mut T>,
}

// Safety: `ListMutex<T>` only exposes `T` through a guard requiring list
// ownership, so sharing across threads is sound whenever `T: Send`.
unsafe impl<T: ?Sized + Send, S: Scheduler + Send, G: InterruptGuard> Send for ListMutex<T, S, G> {}
// Safety: see above.
unsafe impl<T: ?Sized + Send, S: Scheduler + Sync, G: InterruptGuard> Sync for ListMutex<T, S, G> {}

impl<T> ListMutex<T, NoopScheduler, NoopInterruptGuard> {
    /// Creates a list mutex that busy-spins instead of cooperatively
    /// yielding — suitable for `#[cfg(test)]` where no real scheduler is
    /// wired in.
    #[must_use]
    pub fn new(val: T) -> Self {
        Self::with_scheduler(NoopScheduler, val)
    }
}

impl<T, S: Scheduler, G: InterruptGuard> ListMutex<T, S, G> {
    #[must_use]
    pub fn with_scheduler(scheduler: S, val: T) -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            scheduler,
            _guard: PhantomData,
            data: UnsafeCell::new(val),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized, S: Scheduler, G: InterruptGuard> ListMutex<T, S, G> {
    /// Acquires the mutex, enqueueing `node` into the wait list and blocking
    /// (by yielding to the current head's thread) until `node` reaches the
    /// head.
    ///
    /// `node` must stay alive — unmoved — until the returned guard is
    /// dropped; the borrow checker enforces this via the shared lifetime
    /// `'a`.
    pub fn lock<'a>(&'a self, node: &'a mut ListMutexNode) -> ListMutexGuard<'a, T, S, G> {
        let node_ptr: *mut ListMutexNode = node;
        node.next.store(ptr::null_mut(), Ordering::Relaxed);
        node.wake
            .with_mut(|w| unsafe { *w = self.scheduler.current_thread() });

        {
            let _ig = G::disable();
            let prev = self.tail.swap(node_ptr, Ordering::AcqRel);
            if prev.is_null() {
                self.head.store(node_ptr, Ordering::Release);
            } else {
                // Safety: `prev` was the tail we just displaced; its owner
                // is still blocked inside this function (its node borrow is
                // still live), so the pointee remains valid to write through.
                unsafe { (*prev).next.store(node_ptr, Ordering::Release) };
            }
        }

        loop {
            let head = self.head.load(Ordering::Acquire);
            if head == node_ptr {
                break;
            }
            if head.is_null() {
                // Momentary gap between an unlocker clearing `head` and the
                // next enqueue publishing itself; spin rather than yield to
                // a thread we don't have a handle for.
                core::hint::spin_loop();
                continue;
            }
            // Safety: `head` names a node whose owner is blocked in this
            // same loop (or about to enter it), so it is still live.
            let wake = unsafe { (*head).wake.with(|w| *w) };
            self.scheduler.yield_to(wake);
        }

        ListMutexGuard {
            mutex: self,
            node: node_ptr,
            marker: PhantomData,
        }
    }
}

impl<'a, T: ?Sized, S: Scheduler, G: InterruptGuard> Deref for ListMutexGuard<'a, T, S, G> {
    type Target = T;

    fn deref(&self) -> &T {
        self.mutex.data.with(|data| unsafe { &*data })
    }
}

impl<'a, T: ?Sized, S: Scheduler, G: InterruptGuard> DerefMut for ListMutexGuard<'a, T, S, G> {
    fn deref_mut(&mut self) -> &mut T {
        self.mutex.data.with_mut(|data| unsafe { &mut *data })
    }
}

impl<T: ?Sized, S: Scheduler, G: InterruptGuard> Drop for ListMutexGuard<'_, T, S, G> {
    fn drop(&mut self) {
        let _ig = G::disable();
        // Safety: `self.node` is the current head (we own the critical
        // section) and stays valid for the duration of this function.
        let next = unsafe { (*self.node).next.load(Ordering::Acquire) };

        if !next.is_null() {
            self.mutex.head.store(next, Ordering::Release);
            return;
        }

        // No successor observed yet. Try to clear `tail` so the next
        // enqueue sees an empty list instead of racing to dereference our
        // (possibly about-to-be-deallocated) node — the standard MCS-lock
        // hardening, required because safe Rust cannot tolerate a stale
        // pointer being written through once our node's borrow ends.
        if self
            .mutex
            .tail
            .compare_exchange(self.node, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.mutex.head.store(ptr::null_mut(), Ordering::Release);
            return;
        }

        // A concurrent enqueue raced us and is about to publish the link
        // from our node to theirs; wait for it to land before handing off.
        let mut next = unsafe { (*self.node).next.load(Ordering::Acquire) };
        while next.is_null() {
            core::hint::spin_loop();
            next = unsafe { (*self.node).next.load(Ordering::Acquire) };
        }
        self.mutex.head.store(next, Ordering::Release);
    }
}

impl<T: fmt::Debug + ?Sized, S: Scheduler, G: InterruptGuard> fmt::Debug for ListMutexGuard<'_, T, S, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_threaded_roundtrip() {
        let mutex = ListMutex::new(0);
        let mut node = ListMutexNode::new();
        {
            let mut guard = mutex.lock(&mut node);
            *guard += 1;
        }
        let mut node2 = ListMutexNode::new();
        assert_eq!(*mutex.lock(&mut node2), 1);
    }

    #[test]
    fn contended_increment() {
        let mutex = Arc::new(ListMutex::new(0_i32));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let mutex = mutex.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        let mut node = ListMutexNode::new();
                        *mutex.lock(&mut node) += 1;
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let mut node = ListMutexNode::new();
        assert_eq!(*mutex.lock(&mut node), 1200);
    }

    #[test]
    fn sequential_acquisitions_reuse_empty_queue() {
        // Exercises the tail-CAS-clear path repeatedly: each lock/unlock
        // pair should leave head and tail both null again.
        let mutex = ListMutex::new(());
        for _ in 0..50 {
            let mut node = ListMutexNode::new();
            drop(mutex.lock(&mut node));
        }
        assert!(mutex.head.load(Ordering::Relaxed).is_null());
        assert!(mutex.tail.load(Ordering::Relaxed).is_null());
    }
}
