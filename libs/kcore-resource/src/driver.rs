// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The driver vtable and the table that maps a dense driver index to one.

use alloc::vec::Vec;
use core::ffi::c_void;

use kcore_hal::{Mode, Stat};
use kcore_sync::Mutex;

use crate::resource::Resource;

/// Which corner of the driver-index space a [`DriverDef`] occupies. Purely
/// informational — `kcore-resource` does not gate any behavior on it — kept
/// because the original core's `resource.c` documents the same four-way
/// split in a comment above its driver table and downstream tooling
/// (driver-index allocators, debug dumps) wants the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverGroup {
    BaseFilesystem,
    UserFilesystem,
    UserDevice,
    BaseDevice,
}

/// Called by [`crate::init_resource`] to let the driver populate its state
/// for a freshly allocated [`Resource`]. `args` is an opaque, driver-defined
/// blob — `kcore-resource` never dereferences it.
pub type InitFn = fn(&Resource, args: *mut c_void) -> Result<(), crate::Error>;
/// Called by [`crate::uninit_resource`] once the reference list has drained;
/// the driver releases whatever `init` allocated.
pub type UninitFn = fn(&Resource);
/// Below this line: vtable slots `kcore-resource` stores and hands back but
/// never itself calls — they belong to the VFS/driver-model layer built on
/// top of this crate, out of scope per spec's non-goals.
pub type ReadFn = fn(res: &Resource, buf: *mut u8, len: usize) -> isize;
pub type WriteFn = fn(res: &Resource, buf: *const u8, len: usize) -> isize;
pub type SeekFn = fn(res: &Resource, offset: i64) -> isize;
pub type RenameFn = fn(res: &Resource, from: &str, to: &str) -> i32;
pub type StatFn = fn(res: &Resource) -> Stat;
pub type ControlFn = fn(res: &Resource, buf: *mut c_void, size: usize) -> *mut c_void;
pub type CreateFn = fn(res: &Resource, path: &str, mode: Mode) -> i32;
pub type RemoveFn = fn(res: &Resource, path: &str) -> i32;
pub type LocateFn = fn(res: &Resource, path: &str) -> *mut c_void;

/// A driver's function table plus the hardware-match arrays
/// [`init_pci_resource`](crate::init_pci_resource)/
/// [`init_acpi_resource`](crate::init_acpi_resource) scan.
///
/// Every `DriverDef` a kernel registers is `&'static`: drivers are known at
/// link time even when the table itself is populated at runtime (see
/// [`DriverTable::register`]).
pub struct DriverDef {
    pub name: &'static str,
    pub group: DriverGroup,
    pub init: InitFn,
    pub uninit: UninitFn,
    pub read: Option<ReadFn>,
    pub write: Option<WriteFn>,
    pub seek: Option<SeekFn>,
    pub rename: Option<RenameFn>,
    pub stat: Option<StatFn>,
    pub control: Option<ControlFn>,
    pub create: Option<CreateFn>,
    pub remove: Option<RemoveFn>,
    pub locate: Option<LocateFn>,
    /// `(vendor << 16) | device` codes this driver claims, scanned by
    /// [`init_pci_resource`](crate::init_pci_resource). Empty if the driver
    /// isn't PCI-enumerable.
    pub pci_codes: &'static [u32],
    /// FNV-1a hashes of the ACPI `_HID` strings this driver claims, scanned
    /// by [`init_acpi_resource`](crate::init_acpi_resource). Empty if the
    /// driver isn't ACPI-enumerable.
    pub acpi_codes: &'static [u64],
}

/// An append-only, runtime-populated table mapping a dense driver index to
/// its [`DriverDef`].
///
/// spec.md §9 allows either a link-time (linker-section) table or a runtime
/// one built by explicit registration; portable `no_std` Rust has no
/// standard linker-section mechanism, so `kcore-resource` takes the
/// registration route. Once registered, entries are never replaced or
/// removed — reads never observe a torn or half-initialized slot.
pub struct DriverTable {
    slots: Mutex<Vec<&'static DriverDef>>,
}

impl DriverTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Appends `def`, returning the dense index it was assigned.
    pub fn register(&self, def: &'static DriverDef) -> usize {
        let mut slots = self.slots.lock();
        slots.push(def);
        let index = slots.len() - 1;
        log::debug!("registered driver {:?} at index {index}", def.name);
        index
    }

    /// The number of registered drivers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up the driver at `index`, or `None` if it's out of range.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&'static DriverDef> {
        self.slots.lock().get(index).copied()
    }

    /// Scans every registered driver's `pci_codes` for `(vendor << 16) |
    /// device`, returning the index of the first match.
    #[must_use]
    pub fn find_pci(&self, vendor: u16, device: u16) -> Option<usize> {
        let target = (u32::from(vendor) << 16) | u32::from(device);
        let slots = self.slots.lock();
        slots
            .iter()
            .position(|def| def.pci_codes.contains(&target))
    }

    /// Scans every registered driver's `acpi_codes` for `hid_hash`, returning
    /// the index of the first match.
    #[must_use]
    pub fn find_acpi(&self, hid_hash: u64) -> Option<usize> {
        let slots = self.slots.lock();
        slots
            .iter()
            .position(|def| def.acpi_codes.contains(&hid_hash))
    }
}

impl Default for DriverTable {
    fn default() -> Self {
        Self::new()
    }
}
