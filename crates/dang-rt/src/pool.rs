// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Generic slab allocator with stable handles.
//!
//! Mirrors the shape of `crates/hdds/src/core/rt/slabpool.rs`'s
//! size-classed slab pool: slots live in append-only segments so a
//! handle's address never moves once issued, and a thread-safe free list
//! threads released slots back together for reuse. Where the slab pool
//! guards exclusivity with an atomic bitmap, `Pool<T>` guards each slot
//! with its own `parking_lot::RawMutex` since payloads here are mutated
//! in place rather than claimed wholesale.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use lock_api::RawMutex as _;
use parking_lot::{Mutex, RawMutex, RwLock};

use crate::config::PoolConfig;
use crate::logging::rt_warn;

/// Sentinel marking "no next free slot" / "null handle".
const NONE: u32 = u32::MAX;

/// Flags accepted by [`Pool::allocate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocFlags {
    /// Whether this slot is reachable from more than one thread. Purely
    /// advisory bookkeeping in this implementation (every slot carries a
    /// real lock so cross-thread access is always sound) but preserved
    /// as a first-class flag because the symbol table and VM opcodes
    /// branch on it.
    pub shared: bool,
}

impl AllocFlags {
    pub const PLAIN: AllocFlags = AllocFlags { shared: false };
    pub const SHARED: AllocFlags = AllocFlags { shared: true };
}

macro_rules! define_handle {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u32);

        impl $name {
            /// The reserved null handle.
            pub const NULL: $name = $name(0);

            /// True unless this is the null handle. Does not check
            /// liveness against any particular pool.
            #[must_use]
            pub fn is_null(self) -> bool {
                self.0 == 0
            }

            fn index(self) -> Option<usize> {
                if self.0 == 0 {
                    None
                } else {
                    Some((self.0 - 1) as usize)
                }
            }

            fn from_index(idx: usize) -> Self {
                $name(u32::try_from(idx + 1).expect("pool index overflow"))
            }
        }
    };
}

define_handle!(ScalarHandle, "Handle into the scalar pool.");
define_handle!(ArrayHandle, "Handle into the array pool.");
define_handle!(HashHandle, "Handle into the hash pool.");
define_handle!(ChannelHandle, "Handle into the channel pool.");

/// Trait every pooled payload type implements. A blanket impl covers any
/// `Default + Send` type; `Pool::allocate` runs `Default::default()` as
/// the init hook, and ordinary `Drop` runs as the destroy hook when a
/// slot's payload is overwritten on release.
pub trait PoolItem: Default + Send {}
impl<T: Default + Send> PoolItem for T {}

struct Slot<T> {
    raw: RawMutex,
    payload: UnsafeCell<T>,
    refcount: AtomicU32,
    in_use: std::sync::atomic::AtomicBool,
    shared: std::sync::atomic::AtomicBool,
    next_free: AtomicU32,
}

// SAFETY: `payload` is only ever dereferenced while `raw` is held (see
// `Pool::with`, `Pool::lock`/`Pool::unlock`), or during `allocate`/
// `release` where the free-list mutex guarantees the slot is not
// reachable from any other handle yet/anymore.
unsafe impl<T: Send> Sync for Slot<T> {}

impl<T: Default> Default for Slot<T> {
    fn default() -> Self {
        Self {
            raw: RawMutex::INIT,
            payload: UnsafeCell::new(T::default()),
            refcount: AtomicU32::new(0),
            in_use: std::sync::atomic::AtomicBool::new(false),
            shared: std::sync::atomic::AtomicBool::new(false),
            next_free: AtomicU32::new(NONE),
        }
    }
}

struct Segment<T> {
    slots: Box<[Slot<T>]>,
    base: usize,
}

/// A growable slab of `T`, addressed by handle `H`.
///
/// Growth appends a new segment rather than reallocating existing
/// storage, so a handle's slot reference is valid for the pool's
/// lifetime once issued.
pub struct Pool<T: PoolItem, H> {
    segments: RwLock<Vec<Segment<T>>>,
    free_head: Mutex<Option<u32>>,
    population: AtomicU32,
    config: PoolConfig,
    _handle: std::marker::PhantomData<H>,
}

trait Handle: Copy {
    const NULL: Self;
    fn is_null(self) -> bool;
    fn index_of(self) -> Option<usize>;
    fn from_index(idx: usize) -> Self;
}

macro_rules! impl_handle_trait {
    ($name:ident) => {
        impl Handle for $name {
            const NULL: Self = $name::NULL;
            fn is_null(self) -> bool {
                $name::is_null(self)
            }
            fn index_of(self) -> Option<usize> {
                $name::index(self)
            }
            fn from_index(idx: usize) -> Self {
                $name::from_index(idx)
            }
        }
    };
}
impl_handle_trait!(ScalarHandle);
impl_handle_trait!(ArrayHandle);
impl_handle_trait!(HashHandle);
impl_handle_trait!(ChannelHandle);

impl<T: PoolItem, H: Handle> Pool<T, H> {
    /// Build a pool with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Build a pool with an explicit [`PoolConfig`].
    #[must_use]
    pub fn with_config(config: PoolConfig) -> Self {
        let pool = Self {
            segments: RwLock::new(Vec::new()),
            free_head: Mutex::new(None),
            population: AtomicU32::new(0),
            config,
            _handle: std::marker::PhantomData,
        };
        pool.grow(config.initial_capacity.max(1));
        pool
    }

    /// Append a new segment of `additional` slots and thread them onto
    /// the free list. Returns the base index of the new segment.
    fn grow(&self, additional: usize) -> usize {
        let mut segments = self.segments.write();
        let base = segments.iter().map(|s| s.slots.len()).sum();
        let mut new_slots = Vec::with_capacity(additional);
        new_slots.resize_with(additional, Slot::default);

        let mut free_head = self.free_head.lock();
        for (i, slot) in new_slots.iter().enumerate() {
            let global_idx = base + i;
            let next = if i + 1 < additional {
                u32::try_from(global_idx + 1).expect("pool index overflow")
            } else {
                free_head.map_or(NONE, |h| h)
            };
            slot.next_free.store(next, Ordering::Relaxed);
        }
        *free_head = Some(u32::try_from(base).expect("pool index overflow"));
        drop(free_head);

        segments.push(Segment {
            slots: new_slots.into_boxed_slice(),
            base,
        });
        base
    }

    /// Append a new segment of exactly `n` slots, already marked in-use
    /// and never threaded onto the free list. Used by
    /// [`Pool::allocate_many`] so a contiguous-slot request never races
    /// with ordinary `allocate`/`release` traffic on the free list.
    /// Returns the base index of the new segment.
    fn grow_dedicated(&self, n: usize, flags: AllocFlags) -> usize {
        let mut segments = self.segments.write();
        let base = segments.iter().map(|s| s.slots.len()).sum();
        let mut new_slots = Vec::with_capacity(n);
        new_slots.resize_with(n, Slot::default);
        for slot in &new_slots {
            slot.in_use.store(true, Ordering::Release);
            slot.shared.store(flags.shared, Ordering::Relaxed);
            slot.refcount.store(1, Ordering::Release);
        }
        segments.push(Segment {
            slots: new_slots.into_boxed_slice(),
            base,
        });
        self.population.fetch_add(n as u32, Ordering::Relaxed);
        base
    }

    fn total_capacity(segments: &[Segment<T>]) -> usize {
        segments.iter().map(|s| s.slots.len()).sum()
    }

    /// Run `f` with a reference to the slot at `idx`, holding the
    /// segments lock only long enough to resolve the segment.
    fn with_slot<R>(&self, idx: usize, f: impl FnOnce(&Slot<T>) -> R) -> Option<R> {
        let segments = self.segments.read();
        for seg in segments.iter() {
            if idx >= seg.base && idx - seg.base < seg.slots.len() {
                // Slots never move once a segment is pushed (segments
                // are stored as `Box<[Slot<T>]>` and never reallocated),
                // so holding this reference for the duration of `f` is
                // sound even though `f` may itself block on the slot's
                // own lock.
                let slot: &Slot<T> = &seg.slots[idx - seg.base];
                return Some(f(slot));
            }
        }
        None
    }

    /// Allocate a fresh slot. Returns the null handle on resource
    /// exhaustion.
    pub fn allocate(&self, flags: AllocFlags) -> H {
        loop {
            let mut free_head = self.free_head.lock();
            match *free_head {
                Some(idx) => {
                    let idx = idx as usize;
                    // Pop the head while still holding `free_head`, so a
                    // racing allocator can never observe and claim the
                    // same slot.
                    let next = self
                        .with_slot(idx, |slot| slot.next_free.load(Ordering::Relaxed))
                        .unwrap_or(NONE);
                    *free_head = if next == NONE { None } else { Some(next) };
                    drop(free_head);

                    self.with_slot(idx, |slot| {
                        slot.in_use.store(true, Ordering::Release);
                        slot.shared.store(flags.shared, Ordering::Relaxed);
                        slot.refcount.store(1, Ordering::Release);
                        // SAFETY: slot was just unlinked from the free
                        // list under `free_head`, so no other handle can
                        // be reading/writing its payload yet.
                        unsafe {
                            *slot.payload.get() = T::default();
                        }
                    });
                    self.population.fetch_add(1, Ordering::Relaxed);
                    return H::from_index(idx);
                }
                None => {
                    drop(free_head);
                    let segments = self.segments.read();
                    let current = Self::total_capacity(&segments);
                    drop(segments);
                    if current == 0 {
                        rt_warn!("pool exhausted: zero capacity");
                        return H::NULL;
                    }
                    self.grow(current.saturating_mul(self.config.growth_factor.max(2)) - current);
                }
            }
        }
    }

    /// Allocate `n` contiguous slots, returning the first handle. Always
    /// bump-allocates a dedicated fresh segment
    /// rather than searching the free list for a contiguous run — the
    /// free list is reused only by ordinary single-slot `allocate`
    /// calls. See DESIGN.md for the rationale.
    pub fn allocate_many(&self, n: usize, flags: AllocFlags) -> H {
        if n == 0 {
            return H::NULL;
        }
        let base = self.grow_dedicated(n, flags);
        H::from_index(base)
    }

    /// Increment the refcount on `handle`.
    pub fn reference(&self, handle: H) -> H {
        if handle.is_null() {
            rt_warn!("reference() called on null handle");
            return handle;
        }
        let Some(idx) = handle.index_of() else {
            return handle;
        };
        self.with_slot(idx, |slot| {
            debug_assert!(slot.in_use.load(Ordering::Acquire), "reference on freed slot");
            slot.refcount.fetch_add(1, Ordering::AcqRel);
        });
        handle
    }

    /// Decrement the refcount on `handle`; drops the payload and returns
    /// the slot to the free list at zero.
    pub fn release(&self, handle: H) {
        if handle.is_null() {
            return;
        }
        let Some(idx) = handle.index_of() else {
            return;
        };
        let became_zero = self.with_slot(idx, |slot| {
            if !slot.in_use.load(Ordering::Acquire) {
                rt_warn!("release() on slot not in use");
                return false;
            }
            let prev = slot.refcount.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(prev != 0, "refcount underflow");
            prev == 1
        });
        if became_zero == Some(true) {
            self.with_slot(idx, |slot| {
                // SAFETY: refcount just hit zero and no handle aliases
                // this slot anymore, so exclusive access is ours.
                unsafe {
                    *slot.payload.get() = T::default();
                }
                slot.in_use.store(false, Ordering::Release);
            });
            self.link_into_free_list(idx);
            self.population.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Thread `idx` onto the free list. Walks backward one slot for the
    /// nearest in-use neighbour: if `idx - 1` is itself free, splice
    /// `idx` in right after it so a run of slots released together
    /// (e.g. an array being destroyed) stays contiguous on the free
    /// list, which makes later allocations out of that run contiguous
    /// too. Otherwise `idx` becomes the new free-list head.
    fn link_into_free_list(&self, idx: usize) {
        let mut free_head = self.free_head.lock();
        let predecessor = (idx > 0)
            .then(|| idx - 1)
            .filter(|&p| !self.with_slot(p, |slot| slot.in_use.load(Ordering::Acquire)).unwrap_or(true));
        let idx_u32 = u32::try_from(idx).expect("pool index overflow");
        match predecessor {
            Some(pred) => {
                let pred_next = self
                    .with_slot(pred, |slot| slot.next_free.load(Ordering::Relaxed))
                    .unwrap_or(NONE);
                self.with_slot(idx, |slot| slot.next_free.store(pred_next, Ordering::Relaxed));
                self.with_slot(pred, |slot| slot.next_free.store(idx_u32, Ordering::Relaxed));
            }
            None => {
                self.with_slot(idx, |slot| {
                    slot.next_free
                        .store(free_head.map_or(NONE, |h| h), Ordering::Relaxed);
                });
                *free_head = Some(idx_u32);
            }
        }
    }

    /// Current refcount, or 0 for an invalid/unused handle.
    #[must_use]
    pub fn refcount(&self, handle: H) -> u32 {
        handle
            .index_of()
            .and_then(|idx| self.with_slot(idx, |slot| slot.refcount.load(Ordering::Acquire)))
            .unwrap_or(0)
    }

    /// Lock the slot's mutex. A precondition violation (null/invalid
    /// handle) is a no-op in release builds.
    pub fn lock(&self, handle: H) {
        if let Some(idx) = handle.index_of() {
            self.with_slot(idx, |slot| slot.raw.lock());
        }
    }

    /// Unlock the slot's mutex.
    ///
    /// # Safety
    /// The caller must currently hold the lock acquired by a matching
    /// [`Pool::lock`] call on this handle.
    pub unsafe fn unlock(&self, handle: H) {
        if let Some(idx) = handle.index_of() {
            self.with_slot(idx, |slot| unsafe { slot.raw.unlock() });
        }
    }

    /// Run `f` with exclusive access to the slot's payload, taking and
    /// releasing the slot's own lock around the call: every read/write
    /// of a pooled payload is a lock, operate, unlock triple.
    pub fn with<R>(&self, handle: H, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let idx = handle.index_of()?;
        self.with_slot(idx, |slot| {
            slot.raw.lock();
            // SAFETY: we hold `slot.raw` for the duration of this call.
            let result = f(unsafe { &mut *slot.payload.get() });
            unsafe {
                slot.raw.unlock();
            }
            result
        })
    }

    /// Run `f` with a shared reference to the slot's payload, without
    /// taking the slot's own mutex. Sound only for payload types that
    /// provide their own interior synchronization for concurrent
    /// `&self` access (the channel pool's `Channel` wraps a mutex and
    /// two condvars internally); callers must never mix this with
    /// [`Pool::with`] on the same pool, since that hands out `&mut T`
    /// through the same `UnsafeCell`.
    pub fn with_ref<R>(&self, handle: H, f: impl FnOnce(&T) -> R) -> Option<R> {
        let idx = handle.index_of()?;
        self.with_slot(idx, |slot| {
            // SAFETY: see doc comment above — this pool's payload type
            // is never accessed through `Pool::with`'s `&mut T` path.
            f(unsafe { &*slot.payload.get() })
        })
    }

    /// Whether `handle` was allocated with [`AllocFlags::SHARED`].
    #[must_use]
    pub fn is_shared(&self, handle: H) -> bool {
        handle
            .index_of()
            .and_then(|idx| self.with_slot(idx, |slot| slot.shared.load(Ordering::Relaxed)))
            .unwrap_or(false)
    }

    /// Number of currently in-use slots.
    #[must_use]
    pub fn population(&self) -> u32 {
        self.population.load(Ordering::Relaxed)
    }
}

impl<T: PoolItem, H: Handle> Default for Pool<T, H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_release_roundtrip() {
        let pool: Pool<i64, ScalarHandle> = Pool::with_config(PoolConfig {
            initial_capacity: 4,
            growth_factor: 2,
        });
        let h1 = pool.allocate(AllocFlags::PLAIN);
        assert!(!h1.is_null());
        assert_eq!(pool.refcount(h1), 1);
        pool.with(h1, |v| *v = 42);
        assert_eq!(pool.with(h1, |v| *v), Some(42));
        pool.release(h1);
        assert_eq!(pool.refcount(h1), 0);
    }

    #[test]
    fn reference_then_release_is_observationally_identical() {
        let pool: Pool<i64, ScalarHandle> = Pool::new();
        let h = pool.allocate(AllocFlags::PLAIN);
        pool.with(h, |v| *v = 7);
        let before = pool.with(h, |v| *v);
        pool.reference(h);
        pool.release(h);
        let after = pool.with(h, |v| *v);
        assert_eq!(before, after);
        assert_eq!(pool.refcount(h), 1);
    }

    #[test]
    fn grows_past_initial_capacity_without_invalidating_handles() {
        let pool: Pool<i64, ScalarHandle> = Pool::with_config(PoolConfig {
            initial_capacity: 2,
            growth_factor: 2,
        });
        let mut handles = Vec::new();
        for i in 0..50 {
            let h = pool.allocate(AllocFlags::PLAIN);
            pool.with(h, |v| *v = i);
            handles.push(h);
        }
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(pool.with(*h, |v| *v), Some(i as i64));
        }
    }

    #[test]
    fn null_handle_operations_are_safe_no_ops() {
        let pool: Pool<i64, ScalarHandle> = Pool::new();
        pool.release(ScalarHandle::NULL);
        pool.lock(ScalarHandle::NULL);
        assert_eq!(pool.refcount(ScalarHandle::NULL), 0);
        assert_eq!(pool.with(ScalarHandle::NULL, |v| *v), None);
    }

    #[test]
    fn releasing_a_contiguous_run_in_order_stays_contiguous_on_reuse() {
        let pool: Pool<i64, ScalarHandle> = Pool::with_config(PoolConfig {
            initial_capacity: 4,
            growth_factor: 2,
        });
        let original: Vec<ScalarHandle> = (0..4).map(|_| pool.allocate(AllocFlags::PLAIN)).collect();
        for h in &original {
            pool.release(*h);
        }
        let reallocated: Vec<ScalarHandle> = (0..4).map(|_| pool.allocate(AllocFlags::PLAIN)).collect();
        assert_eq!(
            reallocated, original,
            "releasing ascending handles together should hand them back out in the same order"
        );
    }

    #[test]
    fn freed_slots_are_reused() {
        let pool: Pool<i64, ScalarHandle> = Pool::with_config(PoolConfig {
            initial_capacity: 1,
            growth_factor: 2,
        });
        let h1 = pool.allocate(AllocFlags::PLAIN);
        pool.release(h1);
        let h2 = pool.allocate(AllocFlags::PLAIN);
        assert_eq!(h1, h2, "released slot should be recycled");
    }

    #[test]
    fn concurrent_allocation_yields_unique_handles() {
        use std::collections::HashSet;
        use std::sync::Arc;
        let pool: Arc<Pool<i64, ScalarHandle>> = Arc::new(Pool::with_config(PoolConfig {
            initial_capacity: 4,
            growth_factor: 2,
        }));
        let mut threads = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            threads.push(std::thread::spawn(move || {
                let mut local = Vec::new();
                for _ in 0..200 {
                    local.push(pool.allocate(AllocFlags::PLAIN));
                }
                local
            }));
        }
        let mut all = HashSet::new();
        for t in threads {
            for h in t.join().unwrap() {
                assert!(all.insert(h), "duplicate handle issued under contention");
            }
        }
    }

    /// Randomized alloc/write/release churn across threads: every handle
    /// a thread currently holds must keep reading back whatever value
    /// that thread last wrote, even while other threads are freeing and
    /// recycling unrelated slots out from under the free list.
    #[test]
    fn randomized_churn_never_observes_another_threads_value() {
        use std::sync::Arc;
        let pool: Arc<Pool<i64, ScalarHandle>> = Arc::new(Pool::with_config(PoolConfig {
            initial_capacity: 4,
            growth_factor: 2,
        }));
        let mut threads = Vec::new();
        for t in 0..6 {
            let pool = Arc::clone(&pool);
            threads.push(std::thread::spawn(move || {
                let mut rng = fastrand::Rng::with_seed(t as u64);
                let mut held: Vec<(ScalarHandle, i64)> = Vec::new();
                for _ in 0..500 {
                    if held.is_empty() || rng.bool() {
                        let v = rng.i64(..);
                        let h = pool.allocate(AllocFlags::PLAIN);
                        pool.with(h, |slot| *slot = v);
                        held.push((h, v));
                    } else {
                        let i = rng.usize(..held.len());
                        let (h, expected) = held.swap_remove(i);
                        assert_eq!(pool.with(h, |slot| *slot), Some(expected));
                        pool.release(h);
                    }
                }
                for (h, expected) in &held {
                    assert_eq!(pool.with(*h, |slot| *slot), Some(*expected));
                    pool.release(*h);
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
    }
}
