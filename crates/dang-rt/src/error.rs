// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type for the subset of runtime operations that surface failure
//! to callers rather than degrading silently.
//!
//! Most runtime error conditions are defined behaviours instead (stack
//! underflow pops Undef, div/mod by zero yields 0, would-block is a
//! status the VM opcode already handles) and never produce an `Err`
//! here. `RtError` exists for the minority of operations — pool
//! exhaustion and explicit handle/type checks used outside the VM's own
//! best-effort opcode handlers — where the caller needs to distinguish
//! failure from success.

use std::fmt;

/// Errors surfaced by the pool/scalar/aggregate/channel APIs.
#[derive(Debug)]
pub enum RtError {
    /// The pool could not grow (allocator failure) while servicing an
    /// allocation request.
    PoolExhausted,
    /// A handle was null (0) or did not name a currently in-use slot.
    InvalidHandle,
    /// A scalar held a tag other than the one the caller required.
    TypeMismatch,
    /// A non-blocking channel read found the channel empty.
    ChannelWouldBlock,
    /// A pop was attempted against an empty stack.
    StackUnderflow,
}

impl fmt::Display for RtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtError::PoolExhausted => write!(f, "pool exhausted"),
            RtError::InvalidHandle => write!(f, "invalid handle"),
            RtError::TypeMismatch => write!(f, "scalar type mismatch"),
            RtError::ChannelWouldBlock => write!(f, "channel would block"),
            RtError::StackUnderflow => write!(f, "stack underflow"),
        }
    }
}

impl std::error::Error for RtError {}

/// Convenience alias for APIs in this crate that can fail.
pub type Result<T> = std::result::Result<T, RtError>;
