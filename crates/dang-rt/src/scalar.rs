// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The dynamic scalar type.
//!
//! The original `dang` interpreter represents this as a tagged union
//! (`scalar_t`, see `examples/original_source/scalar.h`) with a
//! hand-maintained type-tag field. A Rust `enum` makes "at most one
//! active payload, discriminated by the tag" unrepresentable to violate
//! instead of merely documented.

use crate::pool::{ArrayHandle, ChannelHandle, HashHandle, ScalarHandle};
use crate::pools;

/// A tagged dynamic value: int, float, owned string, a typed reference
/// into one of the pooled aggregates, a bytecode function reference, or
/// undef.
#[derive(Debug)]
pub enum Scalar {
    Undef,
    Int(i64),
    Float(f64),
    String(String),
    ScalarRef(ScalarHandle),
    ArrayRef(ArrayHandle),
    HashRef(HashHandle),
    ChannelRef(ChannelHandle),
    /// A function reference: an absolute bytecode offset. Functions are
    /// not pooled (they have no lifecycle — the bytecode blob they point
    /// into outlives every VM thread), so this variant carries no
    /// refcount and needs no special Drop/Clone handling.
    FunctionRef(u32),
}

impl Default for Scalar {
    fn default() -> Self {
        Scalar::Undef
    }
}

impl Drop for Scalar {
    fn drop(&mut self) {
        match self {
            Scalar::ScalarRef(h) => pools::scalars().release(*h),
            Scalar::ArrayRef(h) => pools::arrays().release(*h),
            Scalar::HashRef(h) => pools::hashes().release(*h),
            Scalar::ChannelRef(h) => pools::channels().release(*h),
            Scalar::Undef | Scalar::Int(_) | Scalar::Float(_) | Scalar::FunctionRef(_) => {}
            Scalar::String(_) => {}
        }
    }
}

impl Clone for Scalar {
    /// Deep clone: strings are duplicated, reference types take an
    /// additional refcount on their target.
    fn clone(&self) -> Self {
        match self {
            Scalar::Undef => Scalar::Undef,
            Scalar::Int(v) => Scalar::Int(*v),
            Scalar::Float(v) => Scalar::Float(*v),
            Scalar::String(s) => Scalar::String(s.clone()),
            Scalar::ScalarRef(h) => Scalar::ScalarRef(pools::scalars().reference(*h)),
            Scalar::ArrayRef(h) => Scalar::ArrayRef(pools::arrays().reference(*h)),
            Scalar::HashRef(h) => Scalar::HashRef(pools::hashes().reference(*h)),
            Scalar::ChannelRef(h) => Scalar::ChannelRef(pools::channels().reference(*h)),
            Scalar::FunctionRef(pc) => Scalar::FunctionRef(*pc),
        }
    }
}

impl Scalar {
    /// A freshly undef'd scalar.
    #[must_use]
    pub fn new() -> Self {
        Scalar::Undef
    }

    /// Shallow move assignment that transfers ownership from `src`
    /// without bumping any refcount. Prior contents of `self` are
    /// destroyed first.
    pub fn assign(&mut self, src: Scalar) {
        *self = src;
    }

    // ---- setters (each destroys prior contents first) ----

    pub fn set_undef(&mut self) {
        *self = Scalar::Undef;
    }

    pub fn set_int(&mut self, v: i64) {
        *self = Scalar::Int(v);
    }

    pub fn set_float(&mut self, v: f64) {
        *self = Scalar::Float(v);
    }

    pub fn set_string(&mut self, v: impl Into<String>) {
        *self = Scalar::String(v.into());
    }

    pub fn set_scalar_ref(&mut self, h: ScalarHandle) {
        *self = Scalar::ScalarRef(pools::scalars().reference(h));
    }

    pub fn set_array_ref(&mut self, h: ArrayHandle) {
        *self = Scalar::ArrayRef(pools::arrays().reference(h));
    }

    pub fn set_hash_ref(&mut self, h: HashHandle) {
        *self = Scalar::HashRef(pools::hashes().reference(h));
    }

    pub fn set_channel_ref(&mut self, h: ChannelHandle) {
        *self = Scalar::ChannelRef(pools::channels().reference(h));
    }

    pub fn set_function_ref(&mut self, pc: u32) {
        *self = Scalar::FunctionRef(pc);
    }

    // ---- dereferencing (no refcount change) ----

    #[must_use]
    pub fn deref_scalar_ref(&self) -> ScalarHandle {
        match self {
            Scalar::ScalarRef(h) => *h,
            _ => ScalarHandle::NULL,
        }
    }

    #[must_use]
    pub fn deref_array_ref(&self) -> ArrayHandle {
        match self {
            Scalar::ArrayRef(h) => *h,
            _ => ArrayHandle::NULL,
        }
    }

    #[must_use]
    pub fn deref_hash_ref(&self) -> HashHandle {
        match self {
            Scalar::HashRef(h) => *h,
            _ => HashHandle::NULL,
        }
    }

    #[must_use]
    pub fn deref_channel_ref(&self) -> ChannelHandle {
        match self {
            Scalar::ChannelRef(h) => *h,
            _ => ChannelHandle::NULL,
        }
    }

    #[must_use]
    pub fn deref_function_ref(&self) -> Option<u32> {
        match self {
            Scalar::FunctionRef(pc) => Some(*pc),
            _ => None,
        }
    }

    // ---- coercions ----

    /// `Undef -> 0; Int/Float -> (x != 0); String -> (non-empty and not
    /// "0"); any Ref -> 1`.
    #[must_use]
    pub fn as_bool(&self) -> bool {
        match self {
            Scalar::Undef => false,
            Scalar::Int(v) => *v != 0,
            Scalar::Float(v) => *v != 0.0,
            Scalar::String(s) => !s.is_empty() && s != "0",
            Scalar::ScalarRef(_)
            | Scalar::ArrayRef(_)
            | Scalar::HashRef(_)
            | Scalar::ChannelRef(_)
            | Scalar::FunctionRef(_) => true,
        }
    }

    /// String parsed as signed integer, base 0 (like C's `strtol(..., 0)`:
    /// `0x`/`0X` prefix selects hex, a bare leading `0` selects octal,
    /// otherwise decimal); float truncated toward zero; refs and undef
    /// coerce through 0.
    #[must_use]
    pub fn as_int(&self) -> i64 {
        match self {
            Scalar::Undef => 0,
            Scalar::Int(v) => *v,
            Scalar::Float(v) => *v as i64,
            Scalar::String(s) => parse_int_base0(s),
            Scalar::ScalarRef(_)
            | Scalar::ArrayRef(_)
            | Scalar::HashRef(_)
            | Scalar::ChannelRef(_)
            | Scalar::FunctionRef(_) => 0,
        }
    }

    /// String parsed as float; int widened; refs and undef coerce
    /// through 0.0.
    #[must_use]
    pub fn as_float(&self) -> f64 {
        match self {
            Scalar::Undef => 0.0,
            Scalar::Int(v) => *v as f64,
            Scalar::Float(v) => *v,
            Scalar::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            Scalar::ScalarRef(_)
            | Scalar::ArrayRef(_)
            | Scalar::HashRef(_)
            | Scalar::ChannelRef(_)
            | Scalar::FunctionRef(_) => 0.0,
        }
    }

    /// Int/Float formatted in a locale-independent form; Undef -> "";
    /// refs format as their numeric handle value (diagnostic use only —
    /// no opcode observes this for refs in practice).
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            Scalar::Undef => String::new(),
            Scalar::Int(v) => v.to_string(),
            Scalar::Float(v) => format_float(*v),
            Scalar::String(s) => s.clone(),
            Scalar::ScalarRef(h) => h.0.to_string(),
            Scalar::ArrayRef(h) => h.0.to_string(),
            Scalar::HashRef(h) => h.0.to_string(),
            Scalar::ChannelRef(h) => h.0.to_string(),
            Scalar::FunctionRef(pc) => pc.to_string(),
        }
    }
}

/// Shortest round-trippable decimal representation, matching the
/// original `"%g"`-style formatting in `scalar.c`.
fn format_float(v: f64) -> String {
    if v == v.trunc() && v.is_finite() && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        format!("{v}")
    }
}

fn parse_int_base0(s: &str) -> i64 {
    let s = s.trim();
    let (neg, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).unwrap_or(0)
    } else if s.len() > 1 && s.starts_with('0') && s.bytes().all(|b| b.is_ascii_digit()) {
        i64::from_str_radix(&s[1..], 8).unwrap_or(0)
    } else {
        s.parse::<i64>().unwrap_or(0)
    };
    if neg {
        -value
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_coercion_rules() {
        assert!(!Scalar::Undef.as_bool());
        assert!(!Scalar::Int(0).as_bool());
        assert!(Scalar::Int(1).as_bool());
        assert!(!Scalar::String(String::new()).as_bool());
        assert!(!Scalar::String("0".into()).as_bool());
        assert!(Scalar::String("0.0".into()).as_bool());
        assert!(Scalar::String("a".into()).as_bool());
    }

    #[test]
    fn int_string_coercions_base0() {
        assert_eq!(Scalar::String("42".into()).as_int(), 42);
        assert_eq!(Scalar::String("-42".into()).as_int(), -42);
        assert_eq!(Scalar::String("0x2A".into()).as_int(), 42);
        assert_eq!(Scalar::String("052".into()).as_int(), 42);
        assert_eq!(Scalar::String("not a number".into()).as_int(), 0);
    }

    #[test]
    fn float_truncates_toward_zero_as_int() {
        assert_eq!(Scalar::Float(3.9).as_int(), 3);
        assert_eq!(Scalar::Float(-3.9).as_int(), -3);
    }

    #[test]
    fn as_string_formatting() {
        assert_eq!(Scalar::Undef.as_string(), "");
        assert_eq!(Scalar::Int(42).as_string(), "42");
        assert_eq!(Scalar::Float(2.5).as_string(), "2.5");
        assert_eq!(Scalar::Float(2.0).as_string(), "2");
    }

    #[test]
    fn clone_then_drop_original_preserves_value() {
        let original = Scalar::String("hello".into());
        let cloned = original.clone();
        drop(original);
        assert_eq!(cloned.as_string(), "hello");
    }

    #[test]
    fn clone_bumps_refcount_on_references() {
        let h = pools::arrays().allocate(crate::pool::AllocFlags::PLAIN);
        {
            let s = Scalar::ArrayRef(pools::arrays().reference(h));
            assert_eq!(pools::arrays().refcount(h), 2);
            let cloned = s.clone();
            assert_eq!(pools::arrays().refcount(h), 3);
            drop(cloned);
            assert_eq!(pools::arrays().refcount(h), 2);
            drop(s);
            assert_eq!(pools::arrays().refcount(h), 1);
        }
        pools::arrays().release(h);
        assert_eq!(pools::arrays().refcount(h), 0);
    }

    #[test]
    fn assign_transfers_ownership_without_extra_refcount() {
        let h = pools::arrays().allocate(crate::pool::AllocFlags::PLAIN);
        let mut dst = Scalar::Undef;
        dst.assign(Scalar::ArrayRef(pools::arrays().reference(h)));
        assert_eq!(pools::arrays().refcount(h), 2);
        drop(dst);
        assert_eq!(pools::arrays().refcount(h), 1);
        pools::arrays().release(h);
    }
}
