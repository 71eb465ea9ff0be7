// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use crate::Error;

/// A node in the graph: a caller-chosen payload `T` plus the child/parent/
/// sibling links and the bookkeeping `find`/`remove` need to stay correct
/// under concurrent access.
///
/// `GraphNode` is never touched directly by callers — every operation goes
/// through [`NodeHandle`], which owns the raw pointer and is the thing
/// `create`/`add`/`find`/... actually hand back and forth.
pub struct GraphNode<T> {
    /// Next sibling under the same parent, or the removed-node tombstone
    /// (`next == self`) once this node has been detached.
    next: AtomicPtr<GraphNode<T>>,
    /// Head of this node's owned child list.
    child: AtomicPtr<GraphNode<T>>,
    /// Non-owning back-pointer, fixed at `add` time and never mutated again.
    parent: UnsafeCell<Option<NonNull<GraphNode<T>>>>,
    /// Fixed at `add`/`create` time; `None` is the shared empty-string
    /// sentinel rather than an owned empty allocation.
    name: UnsafeCell<Option<Box<str>>>,
    ref_count: AtomicUsize,
    child_count: AtomicUsize,
    /// Set for the duration of an in-flight `remove` so a second, concurrent
    /// `remove` on the same node observes `Busy` instead of racing the first.
    removing: AtomicBool,
    payload: T,
}

// Safety: every field but `payload` is either atomic or is written exactly
// once, by the thread that calls `add`, strictly before the node is
// published into any parent's child list (see `set_parent`/`set_name`);
// every reader reaches the node only via an Acquire load that happens-after
// that publish.
unsafe impl<T: Send + Sync> Send for GraphNode<T> {}
// Safety: see above.
unsafe impl<T: Send + Sync> Sync for GraphNode<T> {}

impl<T> GraphNode<T> {
    fn parent_ptr(&self) -> Option<NonNull<GraphNode<T>>> {
        // Safety: see the crate-level note above `unsafe impl Sync`.
        unsafe { *self.parent.get() }
    }

    fn set_parent(&self, parent: Option<NonNull<GraphNode<T>>>) {
        // Safety: see the crate-level note above `unsafe impl Sync`.
        unsafe { *self.parent.get() = parent };
    }

    fn name_str(&self) -> &str {
        // Safety: see the crate-level note above `unsafe impl Sync`.
        unsafe { &*self.name.get() }.as_deref().unwrap_or("")
    }

    fn set_name(&self, name: Option<Box<str>>) {
        // Safety: see the crate-level note above `unsafe impl Sync`.
        unsafe { *self.name.get() = name };
    }
}

/// A handle to a [`GraphNode`]. Cheap to copy, like a raw pointer — because
/// it is one. Every graph operation is a method on `NodeHandle`.
///
/// # Safety contract
///
/// A handle must not be used again after a [`NodeHandle::remove`] call that
/// actually frees the node (`free: true` and the node turned out to be
/// freeable). Using a handle past that point is the Rust-level equivalent of
/// the original C API's dangling-pointer hazard; this crate does not (and,
/// short of a full epoch-based reclamation scheme, cannot) catch it for you.
pub struct NodeHandle<T> {
    pub(crate) ptr: NonNull<GraphNode<T>>,
}

// Safety: a `NodeHandle` is a thin, copyable wrapper around a `GraphNode`
// pointer; it is sound to send or share across threads under the same
// conditions as the `GraphNode` it points to (see the `unsafe impl`s above).
unsafe impl<T: Send + Sync> Send for NodeHandle<T> {}
// Safety: see above.
unsafe impl<T: Send + Sync> Sync for NodeHandle<T> {}

impl<T> Clone for NodeHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NodeHandle<T> {}

impl<T> PartialEq for NodeHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for NodeHandle<T> {}

impl<T> NodeHandle<T> {
    fn node(&self) -> &GraphNode<T> {
        // Safety: per this type's safety contract, a live handle always
        // refers to a node that either hasn't been removed, or was removed
        // with `free: false` (and so is merely detached, not deallocated).
        unsafe { self.ptr.as_ref() }
    }

    fn alloc_node(
        payload: T,
        parent: Option<NonNull<GraphNode<T>>>,
        name: Option<Box<str>>,
    ) -> Result<Self, Error> {
        let boxed = Box::try_new(GraphNode {
            next: AtomicPtr::new(core::ptr::null_mut()),
            child: AtomicPtr::new(core::ptr::null_mut()),
            parent: UnsafeCell::new(parent),
            name: UnsafeCell::new(name),
            ref_count: AtomicUsize::new(0),
            child_count: AtomicUsize::new(0),
            removing: AtomicBool::new(false),
            payload,
        })?;
        Ok(Self {
            ptr: NonNull::from(Box::leak(boxed)),
        })
    }

    /// Creates a new, detached node holding `payload`. The node has no name
    /// and no parent until it is handed to [`NodeHandle::add`].
    pub fn create(payload: T) -> Result<Self, Error> {
        Self::alloc_node(payload, None, None)
    }

    /// Creates the root of a graph: a node with no parent whose ref-count is
    /// seeded to 1 so it is never mistaken for unreferenced and torn down.
    pub fn init_root(payload: T) -> Result<Self, Error> {
        let root = Self::alloc_node(payload, None, None)?;
        root.node().ref_count.store(1, Ordering::Release);
        Ok(root)
    }

    /// The node's name, or `""` if it was never given one.
    #[must_use]
    pub fn name(&self) -> &str {
        self.node().name_str()
    }

    /// The caller's payload.
    #[must_use]
    pub fn payload(&self) -> &T {
        &self.node().payload
    }

    /// The node's current ref-count.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.node().ref_count.load(Ordering::Acquire)
    }

    /// Releases one reference taken by [`NodeHandle::find`] or
    /// [`path::traverse`](crate::traverse) once the caller is done with the
    /// returned node.
    pub fn release(&self) {
        self.node().ref_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Pins this node for the duration of a path-algebra walk. Crate-private
    /// twin of [`NodeHandle::release`], used by `path.rs`.
    pub(crate) fn pin(&self) {
        self.node().ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Crate-private twin of [`NodeHandle::pin`].
    pub(crate) fn unpin(&self) {
        self.node().ref_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// The node's parent, or `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.node().parent_ptr().map(|ptr| Self { ptr })
    }

    /// Attaches `child` under `self` with the given name. Lock-free: a
    /// single atomic exchange of `self`'s child-list head.
    ///
    /// Name resolution: an explicit `name` always wins; otherwise `child`
    /// keeps whatever name it already has (from [`NodeHandle::duplicate`],
    /// say); a brand new, never-named node falls back to the shared
    /// empty-string sentinel (`name()` returning `""`).
    pub fn add(&self, child: Self, name: Option<&str>) -> Result<(), Error> {
        if let Some(name) = name {
            child.node().set_name(Some(Box::from(name)));
        }
        // Safety: `child` was just created (or duplicated) by this thread
        // and has not yet been published into any parent's child list, so
        // this write cannot race with any reader.
        child.node().set_parent(Some(self.ptr));

        let child_ptr = child.ptr.as_ptr();
        let prev = self.node().child.swap(child_ptr, Ordering::AcqRel);
        child.node().next.store(prev, Ordering::Release);
        self.node().child_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Shallow-copies this node's payload and name into a new, detached node
    /// (no children, no parent). The caller attaches it with
    /// [`NodeHandle::add`] wherever it belongs.
    pub fn duplicate(&self) -> Result<Self, Error>
    where
        T: Clone,
    {
        let node = self.node();
        let name = {
            // Safety: see the crate-level note above `unsafe impl Sync`.
            let name = unsafe { &*node.name.get() };
            name.clone()
        };
        Self::alloc_node(node.payload.clone(), None, name)
    }

    /// Detaches this node from its parent's child list and, if `free` is
    /// `true`, recursively reclaims it and every descendant whose ref-count
    /// allows it (see [`NodeHandle::remove`]'s module docs for the exact
    /// rule).
    ///
    /// Fails with [`Error::Busy`] if another `remove` on this same node is
    /// already in flight, or [`Error::InUse`] if some other walker
    /// (`find`/`traverse`/`absolute_path`) currently holds a reference.
    pub fn remove(self, free: bool) -> Result<(), Error> {
        let node = self.node();

        if node.removing.swap(true, Ordering::AcqRel) {
            return Err(Error::Busy);
        }

        // The increment-and-check-for-exactly-one dance: any other live
        // reference (a walker's pin, or the root's permanent self-pin)
        // makes the post-increment value land above 1.
        let observed = node.ref_count.fetch_add(1, Ordering::AcqRel) + 1;
        if observed != 1 {
            node.ref_count.fetch_sub(1, Ordering::AcqRel);
            node.removing.store(false, Ordering::Release);
            return Err(Error::InUse);
        }

        if let Some(parent_ptr) = node.parent_ptr() {
            // Safety: a parent is never freed while it still has children
            // reachable through its `child` list, and this node is (until
            // the unlink below) one of them.
            let parent = unsafe { parent_ptr.as_ref() };
            unlink_sibling(parent, self.ptr.as_ptr());
            parent.child_count.fetch_sub(1, Ordering::AcqRel);
        }

        // Tombstone: `next == self` tells any walker holding a stale
        // pointer to this node (from before the unlink above) that it must
        // restart instead of trusting the next link it reads.
        node.next.store(self.ptr.as_ptr(), Ordering::Release);

        if free {
            // Safety: `self` was just detached above, and `observed == 1`
            // means no other pin (and so no other live handle reading
            // through it) exists.
            unsafe { recursive_free(self.ptr) };
        }

        Ok(())
    }

    /// Looks up a direct child by name, using the `child_count`-delta retry
    /// protocol described in the module docs so a concurrent sibling
    /// insert/remove can't hand back a stale or freed pointer.
    pub fn find(&self, name: &str) -> Option<Self> {
        let parent = self.node();
        parent.ref_count.fetch_add(1, Ordering::AcqRel);

        let result = self.find_inner(name);

        parent.ref_count.fetch_sub(1, Ordering::AcqRel);
        result.map(|ptr| Self { ptr })
    }

    #[allow(clippy::too_many_lines)]
    fn find_inner(&self, name: &str) -> Option<NonNull<GraphNode<T>>> {
        let parent = self.node();

        'restart: loop {
            let count_before = parent.child_count.load(Ordering::Acquire);
            let head = parent.child.load(Ordering::Acquire);

            let mut current = head;
            let mut pinned: Option<*mut GraphNode<T>> = None;
            let mut found: Option<*mut GraphNode<T>> = None;

            while !current.is_null() {
                // Safety: `current` was reached via an Acquire load from
                // `child`/`next` of a node this walk still holds a pin on
                // (the parent itself, for the head; the previous sibling,
                // otherwise).
                let node = unsafe { &*current };
                node.ref_count.fetch_add(1, Ordering::AcqRel);
                if let Some(prev) = pinned.take() {
                    // Safety: `prev` was pinned on the previous iteration.
                    unsafe { &*prev }.ref_count.fetch_sub(1, Ordering::AcqRel);
                }
                pinned = Some(current);

                if node.name_str() == name {
                    found = Some(current);
                    break;
                }

                let next = node.next.load(Ordering::Acquire);
                if next == current {
                    // Cycle sentinel: `current` was removed out from under
                    // us. Release our pin on it and restart from the top.
                    node.ref_count.fetch_sub(1, Ordering::AcqRel);
                    continue 'restart;
                }
                current = next;
            }

            if let Some(found) = found {
                if pinned != Some(found) {
                    if let Some(prev) = pinned {
                        // Safety: `prev` still pinned by this walk.
                        unsafe { &*prev }.ref_count.fetch_sub(1, Ordering::AcqRel);
                    }
                }
                return Some(unsafe { NonNull::new_unchecked(found) });
            }

            if let Some(prev) = pinned {
                // Safety: `prev` still pinned by this walk.
                unsafe { &*prev }.ref_count.fetch_sub(1, Ordering::AcqRel);
            }

            let count_after = parent.child_count.load(Ordering::Acquire);

            if count_after == count_before {
                // One sibling may have been added, another removed: a single
                // recheck of the (possibly new) head is enough.
                let head_now = parent.child.load(Ordering::Acquire);
                if head_now.is_null() {
                    return None;
                }
                // Safety: `head_now` is a live head of `parent`'s child list.
                let node = unsafe { &*head_now };
                node.ref_count.fetch_add(1, Ordering::AcqRel);
                if node.name_str() == name {
                    return Some(unsafe { NonNull::new_unchecked(head_now) });
                }
                node.ref_count.fetch_sub(1, Ordering::AcqRel);
                return None;
            }

            if count_after < count_before {
                // Something was removed concurrently; in-flight pointers may
                // be stale. Start over.
                continue 'restart;
            }

            // count_after > count_before: only the newly inserted head
            // nodes need rechecking, up to `delta` of them or until we reach
            // the previously-seen head.
            let delta = count_after - count_before;
            let mut cur = parent.child.load(Ordering::Acquire);
            let mut steps = 0;
            while steps < delta && !cur.is_null() && cur != head {
                // Safety: `cur` reached via an Acquire load from `child`/
                // `next` of a node this parent still owns.
                let node = unsafe { &*cur };
                node.ref_count.fetch_add(1, Ordering::AcqRel);
                if node.name_str() == name {
                    return Some(unsafe { NonNull::new_unchecked(cur) });
                }
                let next = node.next.load(Ordering::Acquire);
                node.ref_count.fetch_sub(1, Ordering::AcqRel);
                if next == cur {
                    continue 'restart;
                }
                cur = next;
                steps += 1;
            }
            return None;
        }
    }
}

fn unlink_sibling<T>(parent: &GraphNode<T>, target: *mut GraphNode<T>) {
    // Safety: `target` is the caller's own node, detached here for the
    // first and only time (guarded by its `removing` flag), so its `next`
    // is stable for the duration of this call.
    let target_next = unsafe { &*target }.next.load(Ordering::Acquire);

    if parent
        .child
        .compare_exchange(target, target_next, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        return;
    }

    let mut prev = parent.child.load(Ordering::Acquire);
    while !prev.is_null() {
        // Safety: `prev` is a live sibling reachable from `parent.child`.
        let next = unsafe { &*prev }.next.load(Ordering::Acquire);
        if next == target {
            // Safety: `prev`'s `next` is only ever rewritten by a remove of
            // the sibling it currently points at, and only one remove can
            // be targeting `target` at a time.
            unsafe { &*prev }.next.store(target_next, Ordering::Release);
            return;
        }
        prev = next;
    }
}

/// Returns `true` if `ptr` (and every descendant under it) was freed.
///
/// A node frees only if every child recursively freed *and* its own
/// ref-count is at most 1 — the `1` accounts for the pin [`NodeHandle::
/// remove`] takes on the node being removed itself, not for an outstanding
/// external reference. This is a boolean AND over descendants, not the
/// arithmetic sum of child results: one non-freeable grandchild must block
/// freeing its parent even if a sibling grandchild's result would otherwise
/// cancel it out.
unsafe fn recursive_free<T>(ptr: NonNull<GraphNode<T>>) -> bool {
    // Safety: forwarded from the caller.
    let node = unsafe { ptr.as_ref() };

    let mut all_children_freed = true;
    let mut child = node.child.load(Ordering::Acquire);
    while !child.is_null() {
        // Safety: `child` is reachable from `node.child` and `node` has not
        // been freed yet, so its children remain valid.
        let next = unsafe { &*child }.next.load(Ordering::Acquire);
        // Safety: `child` came from a live link in this still-intact
        // subtree.
        let freed = unsafe { recursive_free(NonNull::new_unchecked(child)) };
        all_children_freed &= freed;
        child = next;
    }

    if !all_children_freed || node.ref_count.load(Ordering::Acquire) > 1 {
        return false;
    }

    // Safety: every child is freed (or there were none) and this node's
    // ref-count permits reclamation; `ptr` is the same pointer `alloc_node`
    // leaked, so reconstructing and dropping the `Box` is sound.
    unsafe { drop(Box::from_raw(ptr.as_ptr())) };
    true
}
