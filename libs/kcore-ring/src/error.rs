// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// A slot index was out of range for the buffer's capacity.
    #[error("invalid ring buffer slot index")]
    InvalidArg,
    /// Non-blocking `allocate` found every slot in use.
    #[error("ring buffer is full")]
    WouldBlock,
}
