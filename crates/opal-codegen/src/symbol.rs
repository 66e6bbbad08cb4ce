//! Forward-reference symbol cells.
//!
//! The IR declaration graph is not topologically sorted: a function may call
//! a function declared later in the same unit, or in another unit compiled
//! concurrently. Generated code therefore references declarations through
//! [`Symbol`] cells that start [`Symbol::Unbound`] and are bound exactly once
//! when the real declaration is visited; no multi-pass fix-up rewriting.
//!
//! During per-unit codegen a fragment only ever *creates or references*
//! cells by key; binding another fragment's cells happens later, in the
//! single-threaded merge. At final assembly every referenced cell must be
//! bound, otherwise assembly fails identifying the unresolved key.

use rustc_hash::FxHashMap;

use opal_core::{CodegenError, DeclKey};

type Result<T> = std::result::Result<T, CodegenError>;

/// A value cell that may be referenced before it is defined.
///
/// Transitions `Unbound -> Bound` exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum Symbol<T> {
    Unbound,
    Bound(T),
}

impl<T> Symbol<T> {
    /// Bind the cell, erroring if it is already bound.
    pub fn bind(&mut self, value: T, key: DeclKey, name: &str) -> Result<()> {
        match self {
            Symbol::Unbound => {
                *self = Symbol::Bound(value);
                Ok(())
            }
            Symbol::Bound(_) => Err(CodegenError::duplicate(key, name)),
        }
    }

    /// The bound value, if any.
    pub fn get(&self) -> Option<&T> {
        match self {
            Symbol::Unbound => None,
            Symbol::Bound(v) => Some(v),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Symbol::Bound(_))
    }
}

impl<T> Default for Symbol<T> {
    fn default() -> Self {
        Symbol::Unbound
    }
}

/// A keyed collection of [`Symbol`] cells.
///
/// `reference` returns an existing cell or creates an unbound one; `define`
/// binds a cell, erroring if already bound. Iteration over bound entries is
/// in definition order, so the merge step produces one deterministic total
/// ordering from many fragments' partial orderings.
#[derive(Debug, Clone)]
pub struct SymbolTable<T> {
    cells: FxHashMap<DeclKey, Symbol<T>>,
    /// Keys in definition order.
    defined: Vec<DeclKey>,
}

impl<T> Default for SymbolTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SymbolTable<T> {
    pub fn new() -> Self {
        Self {
            cells: FxHashMap::default(),
            defined: Vec::new(),
        }
    }

    /// Ensure a cell exists for `key`, creating an unbound one if needed.
    pub fn reference(&mut self, key: DeclKey) {
        self.cells.entry(key).or_default();
    }

    /// Bind the cell for `key`, erroring if it is already bound.
    pub fn define(&mut self, key: DeclKey, name: &str, value: T) -> Result<()> {
        let cell = self.cells.entry(key).or_default();
        cell.bind(value, key, name)?;
        self.defined.push(key);
        Ok(())
    }

    /// The bound value for `key`, if any.
    pub fn get(&self, key: DeclKey) -> Option<&T> {
        self.cells.get(&key).and_then(Symbol::get)
    }

    pub fn is_bound(&self, key: DeclKey) -> bool {
        self.cells.get(&key).is_some_and(Symbol::is_bound)
    }

    /// Keys that were referenced but never bound.
    pub fn unbound_keys(&self) -> impl Iterator<Item = DeclKey> + '_ {
        self.cells
            .iter()
            .filter(|(_, c)| !c.is_bound())
            .map(|(k, _)| *k)
    }

    /// Bound entries in definition order.
    pub fn iter_defined(&self) -> impl Iterator<Item = (DeclKey, &T)> + '_ {
        self.defined.iter().filter_map(|k| {
            let v = self.cells.get(k).and_then(Symbol::get)?;
            Some((*k, v))
        })
    }

    /// Number of bound entries.
    pub fn defined_len(&self) -> usize {
        self.defined.len()
    }

    /// Absorb another table: bound cells are defined here (duplicate
    /// definitions error), unbound cells become references.
    pub fn merge(&mut self, other: SymbolTable<T>, describe: impl Fn(DeclKey) -> String) -> Result<()> {
        let mut cells = other.cells;
        for key in other.defined {
            if let Some(Symbol::Bound(value)) = cells.remove(&key) {
                self.define(key, &describe(key), value)?;
            }
        }
        for key in cells.into_keys() {
            self.reference(key);
        }
        Ok(())
    }
}

impl<T: PartialEq> SymbolTable<T> {
    /// Define, tolerating an identical existing binding.
    ///
    /// Used for shared declarations (function-type signatures) that several
    /// units legitimately produce with equal content.
    pub fn define_or_confirm(&mut self, key: DeclKey, name: &str, value: T) -> Result<()> {
        match self.cells.get(&key) {
            Some(Symbol::Bound(existing)) if *existing == value => Ok(()),
            Some(Symbol::Bound(_)) => Err(CodegenError::duplicate(key, name)),
            _ => self.define(key, name, value),
        }
    }

    /// Like [`SymbolTable::merge`], but identical bindings from different
    /// fragments confirm instead of conflicting.
    pub fn merge_confirming(
        &mut self,
        other: SymbolTable<T>,
        describe: impl Fn(DeclKey) -> String,
    ) -> Result<()> {
        let mut cells = other.cells;
        for key in other.defined {
            if let Some(Symbol::Bound(value)) = cells.remove(&key) {
                self.define_or_confirm(key, &describe(key), value)?;
            }
        }
        for key in cells.into_keys() {
            self.reference(key);
        }
        Ok(())
    }
}
