// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pooled-scalar hash aggregate.
//!
//! Two keys are the same key iff their string coercions are byte-equal,
//! so every key is stored internally as the `String` it coerces to.
//! `std::collections::HashMap` already rehashes on load and grows by
//! doubling, which is exactly what an open-addressed table sized to
//! population would need to do by hand — so `RtHash` wraps one directly
//! rather than re-deriving that bookkeeping, the same call made for
//! `RtArray` over `VecDeque` (see `array.rs`, DESIGN.md).

use std::collections::HashMap;

use crate::pool::{AllocFlags, ScalarHandle};
use crate::pools;
use crate::scalar::Scalar;

/// A hash keyed by scalar string-coercion, mapping to pooled scalar
/// handles. Owns one reference on every value handle it contains.
pub struct RtHash {
    entries: HashMap<String, ScalarHandle>,
}

impl Default for RtHash {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl Drop for RtHash {
    fn drop(&mut self) {
        for (_, h) in self.entries.drain() {
            pools::scalars().release(h);
        }
    }
}

fn key_string(key: &Scalar) -> String {
    key.as_string()
}

impl RtHash {
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Returns a new reference to the value slot for `key`, creating an
    /// Undef entry first if the key is not already present.
    pub fn key_item(&mut self, key: &Scalar) -> ScalarHandle {
        let k = key_string(key);
        let h = *self
            .entries
            .entry(k)
            .or_insert_with(|| pools::scalars().allocate(AllocFlags::PLAIN));
        pools::scalars().reference(h)
    }

    #[must_use]
    pub fn key_exists(&self, key: &Scalar) -> bool {
        self.entries.contains_key(&key_string(key))
    }

    /// Remove `key`, releasing its value handle. No-op if absent.
    pub fn key_delete(&mut self, key: &Scalar) {
        if let Some(h) = self.entries.remove(&key_string(key)) {
            pools::scalars().release(h);
        }
    }

    /// All keys, in unspecified order, with no duplicates (backs
    /// `HRKEYS`-style opcodes).
    #[must_use]
    pub fn list_keys(&self) -> Vec<Scalar> {
        self.entries.keys().cloned().map(Scalar::String).collect()
    }

    /// All values, in the same order as [`RtHash::list_keys`] would
    /// produce on an unmutated hash.
    #[must_use]
    pub fn list_values(&self) -> Vec<Scalar> {
        self.entries
            .values()
            .map(|h| {
                pools::scalars()
                    .with(*h, |slot| slot.clone())
                    .unwrap_or(Scalar::Undef)
            })
            .collect()
    }

    /// All (key, value) pairs, in unspecified order.
    #[must_use]
    pub fn list_pairs(&self) -> Vec<(Scalar, Scalar)> {
        self.entries
            .iter()
            .map(|(k, h)| {
                let v = pools::scalars()
                    .with(*h, |slot| slot.clone())
                    .unwrap_or(Scalar::Undef);
                (Scalar::String(k.clone()), v)
            })
            .collect()
    }

    /// Replace the entire contents with `pairs`, releasing anything
    /// previously stored. Later duplicate keys win.
    pub fn fill(&mut self, pairs: Vec<(Scalar, Scalar)>) {
        for (_, h) in self.entries.drain() {
            pools::scalars().release(h);
        }
        for (k, v) in pairs {
            let h = pools::scalars().allocate(AllocFlags::PLAIN);
            pools::scalars().with(h, |slot| *slot = v);
            if let Some(prev) = self.entries.insert(key_string(&k), h) {
                pools::scalars().release(prev);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_item_autocreates_and_is_stable() {
        let mut h = RtHash::default();
        let a = h.key_item(&Scalar::String("x".into()));
        pools::scalars().with(a, |s| s.set_int(42));
        pools::scalars().release(a);
        let b = h.key_item(&Scalar::String("x".into()));
        assert_eq!(pools::scalars().with(b, |slot| slot.as_int()), Some(42));
        pools::scalars().release(b);
    }

    #[test]
    fn keys_compare_by_string_coercion() {
        let mut h = RtHash::default();
        let a = h.key_item(&Scalar::Int(42));
        pools::scalars().release(a);
        assert!(h.key_exists(&Scalar::String("42".into())));
    }

    #[test]
    fn key_delete_releases_handle_and_removes_entry() {
        let mut h = RtHash::default();
        let handle = h.key_item(&Scalar::String("k".into()));
        pools::scalars().release(handle);
        assert_eq!(pools::scalars().refcount(handle), 1);
        h.key_delete(&Scalar::String("k".into()));
        assert!(!h.key_exists(&Scalar::String("k".into())));
        assert_eq!(pools::scalars().refcount(handle), 0);
    }

    #[test]
    fn fill_replaces_contents() {
        let mut h = RtHash::default();
        h.fill(vec![
            (Scalar::String("a".into()), Scalar::Int(1)),
            (Scalar::String("b".into()), Scalar::Int(2)),
        ]);
        assert_eq!(h.size(), 2);
        let mut values: Vec<i64> = h.list_values().iter().map(Scalar::as_int).collect();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn drop_releases_all_value_handles() {
        let h = pools::scalars().allocate(AllocFlags::PLAIN);
        {
            let mut rh = RtHash::default();
            let slot = rh.key_item(&Scalar::String("r".into()));
            pools::scalars().with(slot, |s| s.set_scalar_ref(h));
            pools::scalars().release(slot);
            assert_eq!(pools::scalars().refcount(h), 2);
        }
        assert_eq!(pools::scalars().refcount(h), 1);
        pools::scalars().release(h);
    }
}
