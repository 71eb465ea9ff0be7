// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The [`Resource`] object itself, and the free functions that create,
//! reference, unreference, and tear one down.

use alloc::boxed::Box;
use core::ffi::c_void;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use kcore_hash::fnv1a;
use kcore_sync::Mutex;

use crate::driver::DriverTable;
use crate::reference::{splice_at_head, unlink, Event, Reference, SignalFn};
use crate::Error;

/// A live, driver-backed object: some opaque driver state, guarded by the
/// driver's own `init`/`uninit` pair, plus the bookkeeping every resource
/// needs regardless of which driver backs it — an identity, a ref-count, and
/// the list of outstanding [`Reference`]s that ref-count tracks.
///
/// `ref_count` is seeded to 1 at creation, for the same reason
/// [`kcore_graph::NodeHandle::init_root`] seeds its root's ref-count to 1:
/// the value represents "does anything still need this object to exist",
/// and the resource's own existence (the handle its creator is holding)
/// counts as one such need. [`reference_resource`] takes it to 2 or more;
/// [`unreference_resource`] brings it back down; [`uninit_resource`] only
/// proceeds once it reads exactly 1.
pub struct Resource {
    pub(crate) id: u64,
    pub(crate) driver_index: usize,
    pub(crate) state: *mut c_void,
    pub(crate) ref_count: AtomicUsize,
    pub(crate) refs_head: Mutex<Option<NonNull<Reference>>>,
}

// Safety: `state` is driver-owned and only ever touched by that driver's own
// `init`/`uninit`/read/write/... callbacks, which the caller is responsible
// for synchronizing; every other field is an atomic or is guarded by
// `refs_head`'s mutex.
unsafe impl Send for Resource {}
// Safety: see above.
unsafe impl Sync for Resource {}

impl Resource {
    /// The identity this resource was created with — an FNV-1a hash of
    /// caller-supplied bytes (a path, a bus address, ...), not a sequence
    /// number, so two independently created resources that name the same
    /// thing compare equal.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The dense index, into whichever [`DriverTable`] created this
    /// resource, of the driver backing it.
    #[must_use]
    pub fn driver_index(&self) -> usize {
        self.driver_index
    }

    /// The opaque state this resource's driver `init` callback populated.
    /// `kcore-resource` never dereferences it.
    #[must_use]
    pub fn state(&self) -> *mut c_void {
        self.state
    }

    /// The resource's current ref-count (1 means unreferenced: only its own
    /// creation handle remains).
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }
}

/// Allocates a [`Resource`] bound to the driver at `driver_index` in `table`,
/// and calls that driver's `init` to populate its state.
///
/// `id` is the resource's identity (see [`Resource::id`]); `args` is handed
/// to the driver's `init` untouched. Fails with [`Error::InvalidArg`] if
/// `driver_index` is out of range, [`Error::OutOfMemory`] if allocation
/// fails, or whatever the driver's own `init` returns.
pub fn init_resource(
    table: &DriverTable,
    driver_index: usize,
    id: u64,
    args: *mut c_void,
) -> Result<NonNull<Resource>, Error> {
    let def = table.get(driver_index).ok_or(Error::InvalidArg)?;

    let boxed = Box::try_new(Resource {
        id,
        driver_index,
        state: core::ptr::null_mut(),
        ref_count: AtomicUsize::new(1),
        refs_head: Mutex::new(None),
    })?;
    let ptr = NonNull::from(Box::leak(boxed));

    // Safety: `ptr` was just leaked above and is not yet visible to any
    // other thread, so the driver's `init` is the only thing touching it.
    let resource = unsafe { ptr.as_ref() };
    if let Err(e) = (def.init)(resource, args) {
        // Safety: `ptr` was leaked by the `Box::leak` above and has not
        // escaped this function, so reclaiming it here is sound.
        unsafe { drop(Box::from_raw(ptr.as_ptr())) };
        return Err(e);
    }

    Ok(ptr)
}

/// Finds the first driver in `table` whose `pci_codes` contains
/// `(vendor << 16) | device`, and calls [`init_resource`] on it.
///
/// `id` is typically the PCI bus/device/function address packed into a
/// `u64`, but `init_resource` never interprets it either way.
pub fn init_pci_resource(
    table: &DriverTable,
    vendor: u16,
    device: u16,
    id: u64,
    args: *mut c_void,
) -> Result<NonNull<Resource>, Error> {
    let index = table.find_pci(vendor, device).ok_or(Error::NotFound)?;
    init_resource(table, index, id, args)
        .map_err(|e| if matches!(e, Error::InvalidArg) { Error::NotFound } else { e })
}

/// Hashes `hid` with [`fnv1a`] and finds the first driver in `table` whose
/// `acpi_codes` contains the result, then calls [`init_resource`] on it.
pub fn init_acpi_resource(
    table: &DriverTable,
    hid: &str,
    id: u64,
    args: *mut c_void,
) -> Result<NonNull<Resource>, Error> {
    let hash = fnv1a(hid.as_bytes());
    let index = table.find_acpi(hash).ok_or(Error::NotFound)?;
    init_resource(table, index, id, args)
        .map_err(|e| if matches!(e, Error::InvalidArg) { Error::NotFound } else { e })
}

/// Takes a new reference on `resource`, returning the [`Reference`] handle
/// the caller must eventually pass to [`unreference_resource`].
///
/// `owner` is an opaque caller identity handed back untouched when `signal`
/// is invoked during teardown. The new node is spliced at the head of the
/// resource's reference list under `refs_head`'s lock, which is always
/// acquired before any [`Reference::branch_mutex`](crate::reference::Reference)
/// — the same order [`unreference_resource`] uses — so the two functions
/// can never deadlock against each other.
pub fn reference_resource(
    resource: NonNull<Resource>,
    signal: SignalFn,
    owner: u64,
) -> Result<NonNull<Reference>, Error> {
    let res = unsafe { resource.as_ref() };

    let boxed = Box::try_new(Reference::new(resource, signal, owner))?;
    let node = NonNull::from(Box::leak(boxed));

    let mut head = res.refs_head.lock();
    if let Some(old_head) = *head {
        // Safety: `old_head` is a live node in this resource's list; its
        // branch mutex is what guards the `prev` field `splice_at_head` is
        // about to write.
        let _old_head_guard = unsafe { old_head.as_ref() }.branch_mutex.lock();
        // Safety: `node` was just allocated above and is not yet reachable
        // by any other thread; `old_head`'s branch mutex is held.
        unsafe { splice_at_head(&mut head, node) };
    } else {
        // Safety: `node` is freshly allocated and `head` was empty.
        unsafe { splice_at_head(&mut head, node) };
    }
    drop(head);

    res.ref_count.fetch_add(1, Ordering::AcqRel);
    Ok(node)
}

/// Releases a reference previously returned by [`reference_resource`],
/// unlinking and freeing its node.
///
/// Takes `refs_head`'s lock before any per-node branch mutex (the same
/// order `reference_resource` uses), then locks `reference`'s own branch
/// mutex and whichever neighbors it currently has, so the unlink is atomic
/// with respect to every other reference/unreference on this resource.
pub fn unreference_resource(reference: NonNull<Reference>) {
    // Safety: `reference` is a live node handed out by `reference_resource`
    // and not yet passed to this function before.
    let r = unsafe { reference.as_ref() };
    // Safety: `r.resource` was fixed at construction and outlives every
    // reference to it by this crate's ownership contract (a resource is
    // only freed once its reference list is empty).
    let res = unsafe { r.resource.as_ref() };

    let mut head = res.refs_head.lock();
    let _self_guard = r.branch_mutex.lock();

    let prev = r.prev();
    let next = r.next();
    let _prev_guard = prev.map(|p| unsafe { p.as_ref() }.branch_mutex.lock());
    let _next_guard = next.map(|n| unsafe { n.as_ref() }.branch_mutex.lock());

    // Safety: `reference`'s own branch mutex and both neighbors' branch
    // mutexes (if present) are held.
    unsafe { unlink(reference) };

    if *head == Some(reference) {
        *head = next;
    }

    drop(_next_guard);
    drop(_prev_guard);
    drop(_self_guard);
    drop(head);

    res.ref_count.fetch_sub(1, Ordering::AcqRel);

    // Safety: `reference` was leaked by `reference_resource`'s `Box::leak`
    // and has just been unlinked from every list that could reach it, and
    // no guard above is held anymore.
    unsafe { drop(Box::from_raw(reference.as_ptr())) };
}

/// Tears `resource` down: refuses with [`Error::InUse`] unless its
/// ref-count is exactly 1 (no reference outstanding beyond the creation
/// handle), then signals [`Event::Close`] to every reference in its list.
///
/// The walk stops and returns [`Error::Busy`] at the first reference whose
/// `signal` returns `false`; references already accepted before that point
/// have already been unlinked and freed and are not restored. Once every
/// reference has accepted the close, the driver's `uninit` runs and the
/// resource itself is freed.
pub fn uninit_resource(table: &DriverTable, resource: NonNull<Resource>) -> Result<(), Error> {
    let res = unsafe { resource.as_ref() };

    if res.ref_count.load(Ordering::Acquire) > 1 {
        log::warn!("uninit_resource({}): still referenced, refusing", res.id);
        return Err(Error::InUse);
    }

    loop {
        let head = *res.refs_head.lock();
        let Some(node) = head else { break };
        // Safety: `node` is the live head of `resource`'s reference list.
        let r = unsafe { node.as_ref() };
        if !(r.signal)(r.owner(), Event::Close) {
            log::warn!(
                "uninit_resource({}): owner {} refused Close",
                res.id,
                r.owner()
            );
            return Err(Error::Busy);
        }
        unreference_resource(node);
    }

    if let Some(def) = table.get(res.driver_index) {
        (def.uninit)(res);
    }

    log::debug!("uninit_resource({}): torn down", res.id);

    // Safety: the reference list is empty and `ref_count` was observed at 1
    // (no outstanding reference, and no concurrent `reference_resource` can
    // have raced in between since this is the sole teardown path and
    // `remove`-style re-entrancy is the caller's responsibility, mirroring
    // `kcore_graph::NodeHandle::remove`'s single-teardown contract).
    unsafe { drop(Box::from_raw(resource.as_ptr())) };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverDef, DriverGroup};
    use core::sync::atomic::AtomicBool;

    static INIT_CALLED: AtomicBool = AtomicBool::new(false);
    static UNINIT_CALLED: AtomicBool = AtomicBool::new(false);

    fn test_init(_res: &Resource, _args: *mut c_void) -> Result<(), Error> {
        INIT_CALLED.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn test_uninit(_res: &Resource) {
        UNINIT_CALLED.store(true, Ordering::Relaxed);
    }

    static TEST_DRIVER: DriverDef = DriverDef {
        name: "test-driver",
        group: DriverGroup::UserDevice,
        init: test_init,
        uninit: test_uninit,
        read: None,
        write: None,
        seek: None,
        rename: None,
        stat: None,
        control: None,
        create: None,
        remove: None,
        locate: None,
        pci_codes: &[],
        acpi_codes: &[],
    };

    fn accept(_owner: u64, _event: Event) -> bool {
        true
    }

    fn refuse(_owner: u64, _event: Event) -> bool {
        false
    }

    #[test]
    fn init_calls_driver_init() {
        let table = DriverTable::new();
        table.register(&TEST_DRIVER);
        let res = init_resource(&table, 0, 1, core::ptr::null_mut()).unwrap();
        assert!(INIT_CALLED.load(Ordering::Relaxed));
        // Safety: test-local resource, no other handle to it.
        assert_eq!(unsafe { res.as_ref() }.ref_count(), 1);
        uninit_resource(&table, res).unwrap();
    }

    #[test]
    fn invalid_driver_index_is_invalid_arg() {
        let table = DriverTable::new();
        let err = init_resource(&table, 0, 1, core::ptr::null_mut()).unwrap_err();
        assert!(matches!(err, Error::InvalidArg));
    }

    #[test]
    fn referenced_resource_refuses_uninit() {
        let table = DriverTable::new();
        table.register(&TEST_DRIVER);
        let res = init_resource(&table, 0, 2, core::ptr::null_mut()).unwrap();

        let reference = reference_resource(res, accept, 42).unwrap();
        assert_eq!(unsafe { res.as_ref() }.ref_count(), 2);

        let err = uninit_resource(&table, res).unwrap_err();
        assert!(matches!(err, Error::InUse));

        unreference_resource(reference);
        assert_eq!(unsafe { res.as_ref() }.ref_count(), 1);

        uninit_resource(&table, res).unwrap();
    }

    #[test]
    fn uninit_signals_every_reference_and_frees_them() {
        UNINIT_CALLED.store(false, Ordering::Relaxed);
        let table = DriverTable::new();
        table.register(&TEST_DRIVER);
        let res = init_resource(&table, 0, 3, core::ptr::null_mut()).unwrap();

        let r1 = reference_resource(res, accept, 1).unwrap();
        let r2 = reference_resource(res, accept, 2).unwrap();
        let _ = (r1, r2);

        uninit_resource(&table, res).unwrap();
        assert!(UNINIT_CALLED.load(Ordering::Relaxed));
    }

    #[test]
    fn refused_close_aborts_teardown_with_busy() {
        let table = DriverTable::new();
        table.register(&TEST_DRIVER);
        let res = init_resource(&table, 0, 4, core::ptr::null_mut()).unwrap();

        let reference = reference_resource(res, refuse, 7).unwrap();
        let err = uninit_resource(&table, res).unwrap_err();
        assert!(matches!(err, Error::Busy));

        unreference_resource(reference);
        uninit_resource(&table, res).unwrap();
    }

    #[test]
    fn pci_lookup_finds_matching_driver() {
        static PCI_DRIVER: DriverDef = DriverDef {
            name: "pci-test",
            group: DriverGroup::BaseDevice,
            init: test_init,
            uninit: test_uninit,
            read: None,
            write: None,
            seek: None,
            rename: None,
            stat: None,
            control: None,
            create: None,
            remove: None,
            locate: None,
            pci_codes: &[0x8086_1234],
            acpi_codes: &[],
        };
        let table = DriverTable::new();
        table.register(&PCI_DRIVER);

        let res = init_pci_resource(&table, 0x8086, 0x1234, 5, core::ptr::null_mut()).unwrap();
        uninit_resource(&table, res).unwrap();

        let err = init_pci_resource(&table, 0x1111, 0x2222, 6, core::ptr::null_mut()).unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[test]
    fn acpi_lookup_hashes_hid_and_finds_driver() {
        let hid_hash = fnv1a(b"PNP0A03");
        let codes: &'static [u64] = Box::leak(Box::new([hid_hash]));
        let driver: &'static DriverDef = Box::leak(Box::new(DriverDef {
            name: "acpi-test",
            group: DriverGroup::BaseDevice,
            init: test_init,
            uninit: test_uninit,
            read: None,
            write: None,
            seek: None,
            rename: None,
            stat: None,
            control: None,
            create: None,
            remove: None,
            locate: None,
            pci_codes: &[],
            acpi_codes: codes,
        }));
        let table = DriverTable::new();
        table.register(driver);

        let res = init_acpi_resource(&table, "PNP0A03", 7, core::ptr::null_mut()).unwrap();
        uninit_resource(&table, res).unwrap();
    }
}
