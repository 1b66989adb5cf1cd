// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded MPMC channel of scalars.
//!
//! Mirrors `examples/original_source/channel.c`'s ring buffer: a mutex
//! plus two condvars (`has_items`, `has_space`), a blocking `read` that
//! waits on `has_items`, and a blocking `write` that waits on
//! `has_space` with a timeout and doubles capacity in place when the
//! wait times out rather than blocking forever. `VecDeque::push_back`/
//! `pop_front` replace the original's manual `start`/`count`/`%`
//! indexing, but the wait/signal/grow-on-stall structure is unchanged.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::config::ChannelConfig;
use crate::error::RtError;
use crate::scalar::Scalar;

struct State {
    items: VecDeque<Scalar>,
    capacity: usize,
}

/// A bounded FIFO of scalars shared between VM threads. Values are
/// deep-cloned on write so sender and receiver own independent scalars.
pub struct Channel {
    state: Mutex<State>,
    has_items: Condvar,
    has_space: Condvar,
    config: ChannelConfig,
}

impl Default for Channel {
    fn default() -> Self {
        Self::with_config(ChannelConfig::default())
    }
}

impl Channel {
    #[must_use]
    pub fn with_config(config: ChannelConfig) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(config.initial_capacity),
                capacity: config.initial_capacity.max(1),
            }),
            has_items: Condvar::new(),
            has_space: Condvar::new(),
            config,
        }
    }

    /// Block until an item is available, then pop and return it.
    pub fn read(&self) -> Scalar {
        let mut state = self.state.lock();
        while state.items.is_empty() {
            self.has_items.wait(&mut state);
        }
        let v = state.items.pop_front().expect("just checked non-empty");
        drop(state);
        self.has_space.notify_one();
        v
    }

    /// Pop an item without blocking, or report that the channel is
    /// currently empty.
    pub fn try_read(&self) -> Result<Scalar, RtError> {
        let mut state = self.state.lock();
        match state.items.pop_front() {
            Some(v) => {
                drop(state);
                self.has_space.notify_one();
                Ok(v)
            }
            None => Err(RtError::ChannelWouldBlock),
        }
    }

    /// Deep-clone `v` into the channel, blocking while full. A writer
    /// that times out waiting for space doubles capacity in place
    /// instead of waiting indefinitely.
    pub fn write(&self, v: &Scalar) {
        let mut state = self.state.lock();
        while state.items.len() >= state.capacity {
            let timed_out = self
                .has_space
                .wait_for(&mut state, self.config.write_stall_timeout)
                .timed_out();
            if timed_out && state.items.len() >= state.capacity {
                let new_cap = state.capacity.saturating_mul(2).max(1);
                state.capacity = new_cap;
            }
        }
        state.items.push_back(v.clone());
        drop(state);
        self.has_items.notify_one();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }
}
