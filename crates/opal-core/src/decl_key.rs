//! Deterministic hash-based declaration identity.
//!
//! This module provides [`DeclKey`], a 64-bit hash that identifies declarations
//! (classes, functions, fields, signatures, generated tables) across separate
//! compilation units. Unlike sequential IDs, keys are computed deterministically
//! from qualified names, enabling:
//!
//! - Forward references (key computed before the declaration is visited)
//! - No visitation order dependencies between units
//! - Parallel per-unit code generation without shared counters
//!
//! # Hash Computation
//!
//! Uses XXHash64 with domain-specific mixing constants to prevent collisions
//! between different declaration kinds (classes vs functions vs fields), and
//! between a class and the backend artifacts derived from it (instance struct
//! type, vtable type, vtable global, ...).
//!
//! # Examples
//!
//! ```
//! use opal_core::DeclKey;
//!
//! let a = DeclKey::class("demo.Widget");
//! let b = DeclKey::class("demo.Widget");
//! assert_eq!(a, b); // Deterministic
//!
//! // A class and its generated vtable type never collide
//! assert_ne!(a, a.vtable_type());
//! ```

use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants for key computation.
///
/// These constants ensure that different declaration kinds produce distinct
/// keys even when they share the same qualified name.
mod domain {
    /// Domain marker for class/interface declarations.
    pub const CLASS: u64 = 0x6d1f9b3e84c2a750;

    /// Domain marker for function declarations.
    pub const FUNCTION: u64 = 0x2ba8534f9e60d17c;

    /// Domain marker for field declarations (static and instance).
    pub const FIELD: u64 = 0x58c7e02a41f6b39d;

    /// Domain marker for method signatures (override matching).
    pub const SIGNATURE: u64 = 0x93d05b78c1ae264f;

    /// Derivation marker: instance struct type of a class.
    pub const STRUCT_TYPE: u64 = 0x17f4a6c8d92b5e03;

    /// Derivation marker: vtable struct type of a class.
    pub const VTABLE_TYPE: u64 = 0x4c29e75a80d3f61b;

    /// Derivation marker: vtable global value of a class.
    pub const VTABLE_GLOBAL: u64 = 0x7e85c3190b4d2af6;

    /// Derivation marker: interface dispatch-table struct type.
    pub const ITABLE_TYPE: u64 = 0xa1360d5c7f982be4;

    /// Derivation marker: interface-table global value of a class.
    pub const ITABLE_GLOBAL: u64 = 0xc5f81e4069a72d3b;

    /// Well-known key: the array type holding per-class interface tables.
    pub const ITABLE_ARRAY: u64 = 0xe9427b0f58c16dab;

    /// Parameter position mixing constants for signature hashing.
    ///
    /// Each position gets a unique constant so parameter order matters.
    pub const PARAM_MARKERS: [u64; 16] = [
        0x9e3779b97f4a7c15,
        0xbf58476d1ce4e5b9,
        0x94d049bb133111eb,
        0xd6e8feb86659fd93,
        0xe7037ed1a0b428db,
        0xc6a4a7935bd1e995,
        0x8648dbbc94d49b8d,
        0xa2b48b2c69e0d657,
        0x7c3e9f2a5b8d1403,
        0x5d8c7b4a3e9f2106,
        0x3f1e9d8c7b5a4203,
        0x1a2b3c4d5e6f7089,
        0x9f8e7d6c5b4a3210,
        0x2468ace013579bdf,
        0xfdb97531eca86420,
        0x123456789abcdef0,
    ];
}

/// A deterministic 64-bit key identifying one declaration.
///
/// Computed from the qualified name plus a domain marker for the declaration
/// kind. The same input always produces the same key, so code referencing a
/// declaration can be emitted before the declaration itself is visited.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct DeclKey(pub u64);

impl DeclKey {
    /// Empty/invalid key constant.
    pub const EMPTY: DeclKey = DeclKey(0);

    /// The well-known array type carrying per-class interface tables.
    pub const ITABLE_ARRAY: DeclKey = DeclKey(domain::ITABLE_ARRAY);

    /// Key for a class or interface declaration.
    pub fn class(qualified_name: &str) -> Self {
        Self(xxh64(qualified_name.as_bytes(), domain::CLASS))
    }

    /// Key for a function or method declaration.
    ///
    /// Overloads must be distinguished upstream by qualifying the name
    /// (the frontend owns overload resolution).
    pub fn function(qualified_name: &str) -> Self {
        Self(xxh64(qualified_name.as_bytes(), domain::FUNCTION))
    }

    /// Key for a field declaration.
    pub fn field(qualified_name: &str) -> Self {
        Self(xxh64(qualified_name.as_bytes(), domain::FIELD))
    }

    /// Key for a method signature: simple name plus parameter type keys.
    ///
    /// Two methods with the same simple name and parameter types hash to the
    /// same signature key regardless of which class declares them, so override
    /// matching is signature equality rather than declaration identity.
    pub fn signature(name: &str, params: &[DeclKey]) -> Self {
        let mut h = xxh64(name.as_bytes(), domain::SIGNATURE);
        for (i, p) in params.iter().enumerate() {
            let marker = domain::PARAM_MARKERS[i % domain::PARAM_MARKERS.len()];
            h = h.wrapping_mul(marker).wrapping_add(p.0).rotate_left(17);
        }
        Self(h)
    }

    /// Derived key: the instance struct type of this class.
    pub fn struct_type(self) -> Self {
        Self(self.0.wrapping_mul(domain::STRUCT_TYPE).rotate_left(11))
    }

    /// Derived key: the vtable struct type of this class.
    pub fn vtable_type(self) -> Self {
        Self(self.0.wrapping_mul(domain::VTABLE_TYPE).rotate_left(11))
    }

    /// Derived key: the vtable global value of this class.
    pub fn vtable_global(self) -> Self {
        Self(self.0.wrapping_mul(domain::VTABLE_GLOBAL).rotate_left(11))
    }

    /// Derived key: the dispatch-table struct type of this interface.
    pub fn itable_type(self) -> Self {
        Self(self.0.wrapping_mul(domain::ITABLE_TYPE).rotate_left(11))
    }

    /// Derived key: the interface-table global value of this class.
    pub fn itable_global(self) -> Self {
        Self(self.0.wrapping_mul(domain::ITABLE_GLOBAL).rotate_left(11))
    }

    /// Check if this is the empty key.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for DeclKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeclKey({:#018x})", self.0)
    }
}

impl fmt::Display for DeclKey {
    /// Prints the raw hex value; diagnostics resolve names separately.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(DeclKey::class("a.B"), DeclKey::class("a.B"));
        assert_eq!(DeclKey::function("a.f"), DeclKey::function("a.f"));
    }

    #[test]
    fn domains_distinct() {
        let name = "a.B";
        assert_ne!(DeclKey::class(name), DeclKey::function(name));
        assert_ne!(DeclKey::class(name), DeclKey::field(name));
        assert_ne!(DeclKey::function(name), DeclKey::field(name));
    }

    #[test]
    fn derived_keys_distinct() {
        let c = DeclKey::class("a.B");
        let derived = [
            c.struct_type(),
            c.vtable_type(),
            c.vtable_global(),
            c.itable_type(),
            c.itable_global(),
        ];
        for (i, a) in derived.iter().enumerate() {
            assert_ne!(*a, c);
            for b in &derived[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn signature_param_order_matters() {
        let int = DeclKey::class("Int32");
        let long = DeclKey::class("Int64");
        let ab = DeclKey::signature("f", &[int, long]);
        let ba = DeclKey::signature("f", &[long, int]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn signature_matches_across_classes() {
        // Signature keys carry no declaring class, only name + params.
        let int = DeclKey::class("Int32");
        assert_eq!(
            DeclKey::signature("run", &[int]),
            DeclKey::signature("run", &[int]),
        );
    }

    #[test]
    fn empty_key() {
        assert!(DeclKey::EMPTY.is_empty());
        assert!(!DeclKey::class("x").is_empty());
    }
}
