// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A shim over `core`/`std` synchronization types that swaps in `loom`'s
//! instrumented equivalents under `cfg(loom)`, so the same primitive source
//! runs both on bare metal and under loom's concurrency model checker.

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub use loom::sync;
        pub use loom::cell;
        pub use loom::thread;
    } else {
        #[cfg(test)]
        pub use std::thread;

        #[cfg(test)]
        #[inline(always)]
        pub fn model<F>(f: F)
        where
            F: Fn() + Sync + Send + 'static,
        {
            f()
        }

        pub mod sync {
            pub use core::sync::*;

            #[cfg(test)]
            pub use std::sync::*;
        }

        pub mod cell {
            #[derive(Debug)]
            #[repr(transparent)]
            pub struct UnsafeCell<T: ?Sized>(core::cell::UnsafeCell<T>);

            impl<T> UnsafeCell<T> {
                pub const fn new(data: T) -> UnsafeCell<T> {
                    UnsafeCell(core::cell::UnsafeCell::new(data))
                }
            }

            impl<T: ?Sized> UnsafeCell<T> {
                #[inline(always)]
                pub fn with<F, R>(&self, f: F) -> R
                where
                    F: FnOnce(*const T) -> R,
                {
                    f(self.0.get())
                }

                #[inline(always)]
                pub fn with_mut<F, R>(&self, f: F) -> R
                where
                    F: FnOnce(*mut T) -> R,
                {
                    f(self.0.get())
                }
            }

            impl<T> UnsafeCell<T> {
                #[inline(always)]
                #[must_use]
                pub fn into_inner(self) -> T {
                    self.0.into_inner()
                }
            }
        }
    }
}

// Flat re-exports so callers can write `kcore_util::loom::AtomicBool` etc.
// instead of reaching through `sync::atomic`.
pub use cell::UnsafeCell;
pub use sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

#[cfg(test)]
pub use sync::Arc;
