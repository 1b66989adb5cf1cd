// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pooled-scalar array aggregate.
//!
//! The original `array.c` hand-manages a backing buffer plus `m_first`/
//! `m_count`/`m_allocated` offsets to get amortised O(1) operations at
//! both ends (see `examples/original_source/array.c`). `VecDeque`
//! already provides exactly that complexity guarantee for push/pop at
//! both ends, so `RtArray` uses one directly instead of re-deriving the
//! ring-buffer bookkeeping — see DESIGN.md.

use std::collections::VecDeque;

use crate::pool::{AllocFlags, ScalarHandle};
use crate::pools;
use crate::scalar::Scalar;

/// A growable array of pooled scalars. Owns one reference on every
/// handle it contains.
pub struct RtArray {
    items: VecDeque<ScalarHandle>,
}

impl Default for RtArray {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl Drop for RtArray {
    fn drop(&mut self) {
        for h in self.items.drain(..) {
            pools::scalars().release(h);
        }
    }
}

fn new_undef_handle() -> ScalarHandle {
    pools::scalars().allocate(AllocFlags::PLAIN)
}

impl RtArray {
    #[must_use]
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Returns a new reference to the slot at `i`, growing the array
    /// with Undef fillers first if `i` is out of range.
    pub fn item_at(&mut self, i: usize) -> ScalarHandle {
        while self.items.len() <= i {
            self.items.push_back(new_undef_handle());
        }
        pools::scalars().reference(self.items[i])
    }

    /// Append a value to the back, growing by doubling when full.
    /// Returns a handle to the newly stored scalar.
    pub fn push(&mut self, v: Scalar) -> ScalarHandle {
        let h = new_undef_handle();
        pools::scalars().with(h, |slot| *slot = v);
        self.items.push_back(h);
        h
    }

    /// Remove and return the last value, or Undef if the array is empty.
    pub fn pop(&mut self) -> Scalar {
        match self.items.pop_back() {
            Some(h) => {
                let v = pools::scalars()
                    .with(h, |slot| std::mem::replace(slot, Scalar::Undef))
                    .unwrap_or(Scalar::Undef);
                pools::scalars().release(h);
                v
            }
            None => Scalar::Undef,
        }
    }

    /// Prepend a value to the front.
    pub fn unshift(&mut self, v: Scalar) -> ScalarHandle {
        let h = new_undef_handle();
        pools::scalars().with(h, |slot| *slot = v);
        self.items.push_front(h);
        h
    }

    /// Remove and return the first value, or Undef if the array is empty.
    pub fn shift(&mut self) -> Scalar {
        match self.items.pop_front() {
            Some(h) => {
                let v = pools::scalars()
                    .with(h, |slot| std::mem::replace(slot, Scalar::Undef))
                    .unwrap_or(Scalar::Undef);
                pools::scalars().release(h);
                v
            }
            None => Scalar::Undef,
        }
    }

    /// Rewrite each element of `indices` in place with a scalar
    /// reference to the array slot it addresses. Negative indices are
    /// relative to the end; mixing a negative index with one that would
    /// grow the array in the same call is left unspecified here and
    /// resolves to leaving that element Undef rather than growing.
    pub fn slice(&mut self, indices: &mut [Scalar]) {
        let len = self.items.len() as i64;
        for entry in indices.iter_mut() {
            let raw = entry.as_int();
            let idx = if raw < 0 { len + raw } else { raw };
            if idx < 0 {
                *entry = Scalar::Undef;
                continue;
            }
            let idx = idx as usize;
            while self.items.len() <= idx {
                self.items.push_back(new_undef_handle());
            }
            let h = self.items[idx];
            entry.set_scalar_ref(h);
        }
    }

    /// Flatten to a plain `Vec<Scalar>` (backs the `ARLIST` opcode).
    #[must_use]
    pub fn list(&self) -> Vec<Scalar> {
        self.items
            .iter()
            .map(|h| {
                pools::scalars()
                    .with(*h, |slot| slot.clone())
                    .unwrap_or(Scalar::Undef)
            })
            .collect()
    }

    /// Replace the entire contents with `values`, releasing anything
    /// previously stored (backs the `ARFILL` opcode).
    pub fn fill(&mut self, values: Vec<Scalar>) {
        for h in self.items.drain(..) {
            pools::scalars().release(h);
        }
        for v in values {
            self.push(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_is_lifo() {
        let mut a = RtArray::default();
        a.push(Scalar::Int(1));
        a.push(Scalar::Int(2));
        assert_eq!(a.pop().as_int(), 2);
        assert_eq!(a.pop().as_int(), 1);
        assert_eq!(a.size(), 0);
        assert_eq!(a.pop().as_int(), 0); // Undef coerces to 0
    }

    #[test]
    fn push_then_shift_is_fifo() {
        let mut a = RtArray::default();
        a.push(Scalar::Int(1));
        a.push(Scalar::Int(2));
        assert_eq!(a.shift().as_int(), 1);
        assert_eq!(a.shift().as_int(), 2);
        assert_eq!(a.size(), 0);
    }

    #[test]
    fn out_of_range_index_grows_with_undef() {
        let mut a = RtArray::default();
        let h = a.item_at(3);
        assert_eq!(a.size(), 4);
        assert_eq!(
            pools::scalars().with(h, |slot| slot.as_string()),
            Some(String::new())
        );
        pools::scalars().release(h);
    }

    #[test]
    fn drop_releases_all_contained_handles() {
        let h = pools::scalars().allocate(AllocFlags::PLAIN);
        {
            let mut a = RtArray::default();
            a.push(Scalar::ScalarRef(pools::scalars().reference(h)));
            assert_eq!(pools::scalars().refcount(h), 2);
        }
        assert_eq!(pools::scalars().refcount(h), 1);
        pools::scalars().release(h);
    }

    #[test]
    fn unshift_then_pop_preserves_order() {
        let mut a = RtArray::default();
        a.push(Scalar::Int(2));
        a.unshift(Scalar::Int(1));
        assert_eq!(a.list().iter().map(Scalar::as_int).collect::<Vec<_>>(), vec![1, 2]);
    }
}
