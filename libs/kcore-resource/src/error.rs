// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::alloc::AllocError;

#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// `init_resource` was given a driver index outside the registered
    /// table, or the slot at that index names a [`crate::DriverDef`] with no
    /// `init` function.
    #[error("invalid driver index")]
    InvalidArg,
    /// Allocation failed while creating the resource or a reference to it.
    #[error("allocation failed")]
    OutOfMemory,
    /// `uninit_resource` observed `ref_count > 1`: some reference is still
    /// live.
    #[error("resource is still referenced")]
    InUse,
    /// A reference refused the `Close` signal during teardown, aborting it.
    #[error("a reference refused to close")]
    Busy,
    /// No registered driver's match-code list contains the requested PCI or
    /// ACPI code, or the matched driver's `init` callback itself failed.
    #[error("no driver matched, or its init callback failed")]
    NotFound,
}

impl From<AllocError> for Error {
    fn from(_: AllocError) -> Self {
        Self::OutOfMemory
    }
}
