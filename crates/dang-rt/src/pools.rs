// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide pool singletons, initialised before any VM thread
//! starts running bytecode. Grounded in
//! `crates/hdds/src/core/rt/mod.rs`'s `init_slab_pool`/`get_slab_pool`
//! `OnceLock<Arc<SlabPool>>` pattern — scalars, arrays, hashes, and
//! channels all reference each other purely by handle, so a Rust
//! ownership graph can't thread pool access down through every value;
//! a lazily-initialized global plays the role a slab pool singleton
//! plays for zero-copy buffers.

use std::sync::OnceLock;

use crate::array::RtArray;
use crate::channel::Channel;
use crate::hash::RtHash;
use crate::pool::{ArrayHandle, ChannelHandle, HashHandle, Pool, ScalarHandle};
use crate::scalar::Scalar;

static SCALAR_POOL: OnceLock<Pool<Scalar, ScalarHandle>> = OnceLock::new();
static ARRAY_POOL: OnceLock<Pool<RtArray, ArrayHandle>> = OnceLock::new();
static HASH_POOL: OnceLock<Pool<RtHash, HashHandle>> = OnceLock::new();
static CHANNEL_POOL: OnceLock<Pool<Channel, ChannelHandle>> = OnceLock::new();

/// The global scalar pool, created on first use.
pub fn scalars() -> &'static Pool<Scalar, ScalarHandle> {
    SCALAR_POOL.get_or_init(Pool::new)
}

/// The global array pool, created on first use.
pub fn arrays() -> &'static Pool<RtArray, ArrayHandle> {
    ARRAY_POOL.get_or_init(Pool::new)
}

/// The global hash pool, created on first use.
pub fn hashes() -> &'static Pool<RtHash, HashHandle> {
    HASH_POOL.get_or_init(Pool::new)
}

/// The global channel pool, created on first use.
pub fn channels() -> &'static Pool<Channel, ChannelHandle> {
    CHANNEL_POOL.get_or_init(Pool::new)
}
