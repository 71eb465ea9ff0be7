// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The intrusive, doubly linked list of external references a [`crate::
//! Resource`] tracks, and the teardown handshake ([`Event`]/[`SignalFn`])
//! used to drain it.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use kcore_sync::Spinlock;

use crate::resource::Resource;

/// The one event `kcore-resource` ever signals a reference with: "the
/// resource you're pointing at is tearing down — let go now, or refuse."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Close,
}

/// Invoked by [`crate::uninit_resource`] for every live reference. Returning
/// `true` accepts the close (the reference is unlinked and freed); `false`
/// refuses it, aborting the whole teardown.
pub type SignalFn = fn(owner: u64, event: Event) -> bool;

/// One entry in a [`Resource`]'s reference list: who is holding the resource
/// open, and how to ask them to let go.
///
/// `prev`/`next` are guarded by this node's own `branch_mutex` rather than a
/// single list-wide lock, so [`crate::unreference_resource`] only ever locks
/// the (at most three) nodes an unlink actually touches.
pub struct Reference {
    pub(crate) resource: NonNull<Resource>,
    pub(crate) signal: SignalFn,
    /// Caller-defined identity (thread id, process id, file descriptor
    /// owner...) handed back to `signal` untouched.
    pub(crate) owner: u64,
    pub(crate) branch_mutex: Spinlock<()>,
    pub(crate) prev: UnsafeCell<Option<NonNull<Reference>>>,
    pub(crate) next: UnsafeCell<Option<NonNull<Reference>>>,
}

// Safety: `prev`/`next` are only read or written while holding this node's
// `branch_mutex` (see `reference.rs`'s module docs and `resource.rs`'s
// `reference_resource`/`unreference_resource`).
unsafe impl Send for Reference {}
// Safety: see above.
unsafe impl Sync for Reference {}

impl Reference {
    pub(crate) fn new(resource: NonNull<Resource>, signal: SignalFn, owner: u64) -> Self {
        Self {
            resource,
            signal,
            owner,
            branch_mutex: Spinlock::new(()),
            prev: UnsafeCell::new(None),
            next: UnsafeCell::new(None),
        }
    }

    pub(crate) fn prev(&self) -> Option<NonNull<Reference>> {
        // Safety: caller holds `branch_mutex` (enforced by every call site
        // in `resource.rs`, all of which take the lock first).
        unsafe { *self.prev.get() }
    }

    fn set_prev(&self, prev: Option<NonNull<Reference>>) {
        // Safety: see `prev`.
        unsafe { *self.prev.get() = prev };
    }

    pub(crate) fn next(&self) -> Option<NonNull<Reference>> {
        // Safety: see `prev`.
        unsafe { *self.next.get() }
    }

    fn set_next(&self, next: Option<NonNull<Reference>>) {
        // Safety: see `prev`.
        unsafe { *self.next.get() = next };
    }

    /// The resource this reference points at.
    #[must_use]
    pub fn resource(&self) -> NonNull<Resource> {
        self.resource
    }

    /// The caller-supplied owner identity.
    #[must_use]
    pub fn owner(&self) -> u64 {
        self.owner
    }
}

pub(crate) unsafe fn splice_at_head(
    head: &mut Option<NonNull<Reference>>,
    node: NonNull<Reference>,
) {
    // Safety: forwarded from the caller, which holds the resource's
    // `refs_head` mutex for the duration of this call (see
    // `Resource::reference`).
    let node_ref = unsafe { node.as_ref() };
    node_ref.set_prev(None);
    node_ref.set_next(*head);

    if let Some(old_head) = *head {
        // Safety: `old_head`'s branch mutex is held by the caller before
        // this function is invoked.
        let old_head_ref = unsafe { old_head.as_ref() };
        old_head_ref.set_prev(Some(node));
    }

    *head = Some(node);
}

/// Unlinks `node` from whatever list it's in, given its own, and its
/// neighbors', branch mutexes are already held by the caller in that order
/// (self, then prev, then next — see `resource.rs::unreference_resource`).
///
/// Returns the previous and next pointers observed, so the caller can update
/// the resource's `refs_head` if `node` was the head.
pub(crate) unsafe fn unlink(node: NonNull<Reference>) -> (Option<NonNull<Reference>>, Option<NonNull<Reference>>) {
    // Safety: forwarded from the caller.
    let node_ref = unsafe { node.as_ref() };
    let prev = node_ref.prev();
    let next = node_ref.next();

    if let Some(prev) = prev {
        // Safety: caller holds `prev`'s branch mutex.
        unsafe { prev.as_ref() }.set_next(next);
    }
    if let Some(next) = next {
        // Safety: caller holds `next`'s branch mutex.
        unsafe { next.as_ref() }.set_prev(prev);
    }

    (prev, next)
}
