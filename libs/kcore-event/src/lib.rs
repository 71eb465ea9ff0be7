// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A one-shot event dispatcher: handlers register once and fire on the next
//! [`EventDispatcher::trigger`] call, after which they are no longer linked
//! into the dispatcher (re-registering is the caller's job if a handler
//! wants to observe future triggers too).
//!
//! Registration is interrupt-safe and wait-free — a single atomic exchange
//! of the tail pointer, the same technique the intrusive MPSC queue uses for
//! multi-producer enqueue. Triggering walks the chain invoking each handler
//! in registration order, then detaches everything it walked through by
//! publishing a sentinel terminator and advancing the head past it.

#![cfg_attr(not(test), no_std)]

use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
use kcore_hal::{InterruptGuard, NoopInterruptGuard};
use kcore_sync::Spinlock;

/// An intrusive handler record. Callers own the storage (typically a
/// `'static`) and supply it to [`EventDispatcher::register`]; the dispatcher
/// never allocates.
pub struct EventHandler<Arg: ?Sized> {
    func: Option<fn(&Arg)>,
    next: AtomicPtr<EventHandler<Arg>>,
}

impl<Arg: ?Sized> EventHandler<Arg> {
    #[must_use]
    pub const fn new(func: fn(&Arg)) -> Self {
        Self {
            func: Some(func),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    const fn terminator() -> Self {
        Self {
            func: None,
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// A handler chain: `register` appends under the dispatcher's internal
/// interrupt guard; `trigger` invokes every handler registered since the
/// last trigger, in order.
///
/// # Invariant
///
/// `EventDispatcher` embeds its own sentinel node and takes its address
/// during `trigger`; the dispatcher must not be moved after the first call
/// to `register` or `trigger` (in practice it lives in a `static` or is
/// `Box`-pinned by the embedding kernel).
pub struct EventDispatcher<Arg: ?Sized, G: InterruptGuard = NoopInterruptGuard> {
    head: AtomicPtr<EventHandler<Arg>>,
    tail: AtomicPtr<EventHandler<Arg>>,
    terminator: EventHandler<Arg>,
    trigger_lock: Spinlock<()>,
    _guard: PhantomData<G>,
}

// Safety: all mutable access to the chain goes through the atomic
// head/tail/next handoff; `trigger_lock` serializes concurrent triggers.
unsafe impl<Arg: ?Sized, G: InterruptGuard> Send for EventDispatcher<Arg, G> {}
// Safety: see above.
unsafe impl<Arg: ?Sized, G: InterruptGuard> Sync for EventDispatcher<Arg, G> {}

impl<Arg: ?Sized> EventDispatcher<Arg, NoopInterruptGuard> {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_guard()
    }
}

impl<Arg: ?Sized> Default for EventDispatcher<Arg, NoopInterruptGuard> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Arg: ?Sized, G: InterruptGuard> EventDispatcher<Arg, G> {
    #[must_use]
    pub const fn with_guard() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            terminator: EventHandler::terminator(),
            trigger_lock: Spinlock::new(()),
            _guard: PhantomData,
        }
    }

    /// Appends `handler` to the chain. Wait-free: a single atomic exchange
    /// of the tail pointer, performed with interrupts disabled.
    pub fn register(&self, handler: &'static EventHandler<Arg>) {
        handler.next.store(ptr::null_mut(), Ordering::Relaxed);
        let node = handler as *const EventHandler<Arg> as *mut EventHandler<Arg>;

        let _ig = G::disable();
        let prev = self.tail.swap(node, Ordering::AcqRel);
        if prev.is_null() {
            self.head.store(node, Ordering::Release);
        } else {
            // Safety: `prev` was the tail we just displaced and is a handler
            // or terminator this dispatcher still owns a pointer to, so it
            // remains valid to write through.
            unsafe { (*prev).next.store(node, Ordering::Release) };
        }
    }

    /// Invokes every handler registered since the last trigger, in order,
    /// then detaches them from the chain.
    pub fn trigger(&self, arg: &Arg) {
        let _lock = self.trigger_lock.lock();

        let terminator =
            &self.terminator as *const EventHandler<Arg> as *mut EventHandler<Arg>;
        self.terminator.next.store(ptr::null_mut(), Ordering::Relaxed);

        {
            let _ig = G::disable();
            let prev = self.tail.swap(terminator, Ordering::AcqRel);
            if prev.is_null() {
                self.head.store(terminator, Ordering::Release);
            } else {
                // Safety: `prev` is a live node in this chain.
                unsafe { (*prev).next.store(terminator, Ordering::Release) };
            }
        }

        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() && cur != terminator {
            // Safety: `cur` is a live node (caller-owned, `'static`) reachable
            // from `head`.
            let node = unsafe { &*cur };
            let next = node.next.load(Ordering::Acquire);
            if let Some(func) = node.func {
                func(arg);
            }
            cur = next;
        }

        if cur == terminator {
            let after = self.terminator.next.load(Ordering::Acquire);
            self.head.store(after, Ordering::Release);
            if after.is_null() {
                // No more handlers: also reset tail to null so the next
                // register starts a fresh chain instead of appending after
                // this now-unreachable terminator.
                let _ = self.tail.compare_exchange(
                    terminator,
                    ptr::null_mut(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn bump(_: &()) {
        CALLS.fetch_add(1, StdOrdering::SeqCst);
    }

    #[test]
    fn trigger_with_no_handlers_is_a_noop() {
        let dispatcher: EventDispatcher<()> = EventDispatcher::new();
        dispatcher.trigger(&());
    }

    #[test]
    fn handlers_fire_once_in_order() {
        CALLS.store(0, StdOrdering::SeqCst);

        static ORDER: Spinlock<Vec<u32>> = Spinlock::new(Vec::new());
        fn record_1(_: &()) {
            ORDER.lock().push(1);
        }
        fn record_2(_: &()) {
            ORDER.lock().push(2);
        }

        static H1: EventHandler<()> = EventHandler::new(record_1);
        static H2: EventHandler<()> = EventHandler::new(record_2);

        let dispatcher: EventDispatcher<()> = EventDispatcher::new();
        dispatcher.register(&H1);
        dispatcher.register(&H2);

        dispatcher.trigger(&());
        assert_eq!(*ORDER.lock(), vec![1, 2]);

        ORDER.lock().clear();
        dispatcher.trigger(&());
        assert!(ORDER.lock().is_empty(), "handlers must not re-fire");
    }

    #[test]
    fn reregistering_after_trigger_fires_again() {
        static H: EventHandler<()> = EventHandler::new(bump);
        CALLS.store(0, StdOrdering::SeqCst);

        let dispatcher: EventDispatcher<()> = EventDispatcher::new();
        dispatcher.register(&H);
        dispatcher.trigger(&());
        assert_eq!(CALLS.load(StdOrdering::SeqCst), 1);

        dispatcher.register(&H);
        dispatcher.trigger(&());
        assert_eq!(CALLS.load(StdOrdering::SeqCst), 2);
    }
}
