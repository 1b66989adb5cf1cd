// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lexical scope chain over pooled aggregate handles.
//!
//! `examples/original_source/symboltable.h` stores each scope's bindings
//! as a hand-rolled balanced binary tree of `symbol_t` nodes threaded
//! together by raw `m_parent`/`m_left_child`/`m_right_child` pointers,
//! with scopes themselves linked by a `m_parent` pointer. `BTreeMap` is
//! exactly that balanced tree without the manual rebalancing, and the
//! scope chain is a `Vec` of them — innermost scope last — since scopes
//! nest and unwind in strict stack order with `CALL`/`RETURN`.

use std::collections::BTreeMap;

use crate::pool::{AllocFlags, ArrayHandle, ChannelHandle, HashHandle, ScalarHandle};
use crate::pools;
use crate::scalar::Scalar;

/// A bytecode-carried symbol identifier. Interning source identifiers
/// into these is outside this crate's scope.
pub type Identifier = u64;

/// Which pooled aggregate a symbol being defined should hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Scalar,
    Array,
    Hash,
    Channel,
}

/// The pooled handle a symbol resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Referent {
    Scalar(ScalarHandle),
    Array(ArrayHandle),
    Hash(HashHandle),
    Channel(ChannelHandle),
}

impl Referent {
    fn release(self) {
        match self {
            Referent::Scalar(h) => pools::scalars().release(h),
            Referent::Array(h) => pools::arrays().release(h),
            Referent::Hash(h) => pools::hashes().release(h),
            Referent::Channel(h) => pools::channels().release(h),
        }
    }

    pub(crate) fn reference(self) -> Referent {
        match self {
            Referent::Scalar(h) => Referent::Scalar(pools::scalars().reference(h)),
            Referent::Array(h) => Referent::Array(pools::arrays().reference(h)),
            Referent::Hash(h) => Referent::Hash(pools::hashes().reference(h)),
            Referent::Channel(h) => Referent::Channel(pools::channels().reference(h)),
        }
    }

    /// Convert to the scalar reference variant that addresses this
    /// referent, without changing any refcount.
    pub(crate) fn into_scalar(self) -> Scalar {
        match self {
            Referent::Scalar(h) => Scalar::ScalarRef(h),
            Referent::Array(h) => Scalar::ArrayRef(h),
            Referent::Hash(h) => Scalar::HashRef(h),
            Referent::Channel(h) => Scalar::ChannelRef(h),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Symbol {
    referent: Referent,
}

#[derive(Default)]
struct Scope {
    symbols: BTreeMap<Identifier, Symbol>,
}

/// A chain of lexical scopes. `scopes.last()` is the current scope;
/// lookup walks from there back toward `scopes[0]`.
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }
}

impl Drop for SymbolTable {
    fn drop(&mut self) {
        for scope in self.scopes.drain(..) {
            for (_, sym) in scope.symbols {
                sym.referent.release();
            }
        }
    }
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a fresh, empty scope (spec: entered on `CALL`/`FRCALL`).
    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pop the current scope, undefining every symbol it holds and
    /// releasing their referents (spec: happens on `RETURN`).
    ///
    /// # Panics
    /// Panics if called with only the outermost scope remaining.
    pub fn pop_scope(&mut self) {
        assert!(self.scopes.len() > 1, "cannot pop the outermost scope");
        let scope = self.scopes.pop().expect("checked len above");
        for (_, sym) in scope.symbols {
            sym.referent.release();
        }
    }

    /// Create a fresh symbol in the current scope, backed by a
    /// newly-allocated handle of `kind`. Replaces any existing binding
    /// for `id` in the current scope, releasing its old referent first.
    pub fn define(&mut self, id: Identifier, kind: SymbolKind, shared: bool) -> Referent {
        let flags = if shared {
            AllocFlags::SHARED
        } else {
            AllocFlags::PLAIN
        };
        let referent = match kind {
            SymbolKind::Scalar => Referent::Scalar(pools::scalars().allocate(flags)),
            SymbolKind::Array => Referent::Array(pools::arrays().allocate(flags)),
            SymbolKind::Hash => Referent::Hash(pools::hashes().allocate(flags)),
            SymbolKind::Channel => Referent::Channel(pools::channels().allocate(flags)),
        };
        let current = self.scopes.last_mut().expect("at least one scope always exists");
        if let Some(prev) = current.symbols.insert(id, Symbol { referent }) {
            prev.referent.release();
        }
        referent
    }

    /// Look up `id` by walking from the current scope up the parent
    /// chain, returning the first match.
    #[must_use]
    pub fn lookup(&self, id: Identifier) -> Option<Referent> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.symbols.get(&id))
            .map(|sym| sym.referent)
    }

    /// Find `id` via [`SymbolTable::lookup`] and bind it under the same
    /// identifier in the current scope, taking one additional reference
    /// on the shared referent. Returns `false` if `id` is unbound.
    pub fn clone_binding(&mut self, id: Identifier) -> bool {
        let Some(found) = self.lookup(id) else {
            return false;
        };
        let referent = found.reference();
        let current = self.scopes.last_mut().expect("at least one scope always exists");
        if let Some(prev) = current.symbols.insert(id, Symbol { referent }) {
            prev.referent.release();
        }
        true
    }

    /// Remove `id` from the current scope only, releasing its referent.
    /// Returns `false` if `id` was not bound in the current scope.
    pub fn undefine(&mut self, id: Identifier) -> bool {
        let current = self.scopes.last_mut().expect("at least one scope always exists");
        match current.symbols.remove(&id) {
            Some(sym) => {
                sym.referent.release();
                true
            }
            None => false,
        }
    }
}
