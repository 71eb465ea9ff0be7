// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

/// The subset of the kernel-wide error taxonomy `kcore-sync` can actually
/// return.
///
/// `InvalidArg` ("null handle") is omitted: every primitive here takes `&self`
/// rather than a nullable pointer, so that failure mode is unrepresentable by
/// construction instead of a runtime check.
#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// Acquisition was attempted on a [`crate::TicketLock`] that is
    /// currently frozen.
    #[error("ticket lock is frozen")]
    Frozen,
}
