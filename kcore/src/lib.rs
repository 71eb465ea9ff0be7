// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `kcore` is the concurrency and object-lifecycle layer underneath
//! everything else in the kernel: the synchronization primitives
//! ([`sync`]), the concurrent named graph and its path algebra
//! ([`graph`]), the bounded ring buffer ([`ring`]), the resource/driver
//! object model ([`resource`]), the event dispatcher ([`event`]), and the
//! hardware-abstraction traits and non-cryptographic hashing everything
//! else is built on ([`hal`], [`hash`]).
//!
//! Each subsystem lives in its own `kcore-*` crate and is re-exported here
//! as a module, so a consumer depends on one crate (`kcore`) rather than
//! wiring up eight path dependencies by hand. Crates that only need one
//! subsystem (a bootloader stage that just wants [`sync::Spinlock`], say)
//! can depend on the underlying `kcore-*` crate directly instead.
#![cfg_attr(not(test), no_std)]

pub use kcore_util as util;

/// Hardware-abstraction traits ([`hal::Scheduler`], [`hal::InterruptGuard`])
/// and POSIX-style permission checking.
pub mod hal {
    pub use kcore_hal::*;
}

/// Non-cryptographic hashing: 64-bit FNV-1a and reflected CRC-32.
pub mod hash {
    pub use kcore_hash::*;
}

/// Spinlocks, a backoff mutex, a ticket lock, and a FIFO-fair list-based
/// mutex.
pub mod sync {
    pub use kcore_sync::*;
}

/// A bounded, multi-producer/multi-consumer ring buffer.
pub mod ring {
    pub use kcore_ring::*;
}

/// A wait-free, one-shot event dispatcher.
pub mod event {
    pub use kcore_event::*;
}

/// The concurrent named graph and the path algebra built on top of it.
pub mod graph {
    pub use kcore_graph::*;
}

/// Resource and driver objects: a vtable bound to opaque driver state,
/// wired into a runtime-registered table, with reference-counted lifetime
/// and a signal-then-free teardown protocol.
pub mod resource {
    pub use kcore_resource::*;
}
