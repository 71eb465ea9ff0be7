// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Resource and driver objects: a [`DriverDef`] vtable bound to opaque
//! driver state, wired into a [`DriverTable`], and a [`Resource`] that
//! tracks who holds it open through an intrusive list of [`Reference`]s.
//!
//! Teardown is a cooperative handshake rather than a forced free:
//! [`uninit_resource`] signals [`Event::Close`] to every outstanding
//! reference and only proceeds once every one of them agrees to let go.
#![cfg_attr(not(test), no_std)]
#![feature(allocator_api)]

extern crate alloc;

mod driver;
mod error;
mod reference;
mod resource;

pub use driver::{
    ControlFn, CreateFn, DriverDef, DriverGroup, DriverTable, InitFn, LocateFn, ReadFn, RemoveFn,
    RenameFn, SeekFn, StatFn, UninitFn, WriteFn,
};
pub use error::Error;
pub use reference::{Event, Reference, SignalFn};
pub use resource::{
    init_acpi_resource, init_pci_resource, init_resource, reference_resource, uninit_resource,
    unreference_resource, Resource,
};
