// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Synchronization primitives: a test-and-set [`Spinlock`], a backoff-spinning
//! [`Mutex`], an intrusive FIFO [`ListMutex`], and a heap-queued [`TicketLock`].
//!
//! All four share the same acquire/release shape — a guard type whose `Drop`
//! releases the lock — but trade off differently between fairness, spin
//! cost, and allocation. `Spinlock` and `Mutex` wrap arbitrary `T`; `ListMutex`
//! additionally requires the caller to supply wait-list storage; `TicketLock`
//! has no payload of its own and is meant to guard access to something else
//! entirely (a branch of the resource graph, for instance).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod error;
mod list_mutex;
mod mutex;
mod spinlock;
mod ticket;

pub use error::Error;
pub use list_mutex::{ListMutex, ListMutexGuard, ListMutexNode};
pub use mutex::{Mutex, MutexGuard};
pub use spinlock::{Spinlock, SpinlockGuard};
pub use ticket::{TicketGuard, TicketLock};
