//! Backend configuration.
//!
//! These flags arrive as already-resolved booleans from the configuration
//! collaborator. They change which code is emitted, never whether errors
//! are fatal.

/// Resolved build-mode flags for one compilation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodegenConfig {
    /// Tolerate virtual/interface slots with no resolvable implementation:
    /// the slot is null-filled instead of failing. Dead-code elimination is
    /// expected to have proven such slots unreachable; this backend cannot
    /// verify that.
    pub allow_incomplete_implementations: bool,

    /// Use the legacy single-construct exception encoding instead of the
    /// structured-handler encoding. Observable behavior is identical.
    pub legacy_exception_encoding: bool,

    /// Compile without exception support: any `try`/`catch` degrades to its
    /// protected-region code and `throw` becomes a trap.
    pub traps_instead_of_exceptions: bool,
}

/// Well-known classes the backend needs to locate in the declaration graph.
///
/// Supplied by the frontend alongside the IR: the root class every class
/// transitively extends, the root exception class, and the wrapper class
/// for host exceptions bridged through the foreign tag.
#[derive(Debug, Clone, Copy)]
pub struct WellKnown {
    /// Root of the class hierarchy.
    pub root_class: crate::DeclKey,
    /// Root exception class; a catch of this class is an umbrella catch.
    pub throwable_class: crate::DeclKey,
    /// Wrapper class for foreign/host exception values. Its constructor
    /// takes the host value as its single non-receiver parameter.
    pub host_exception_class: crate::DeclKey,
    /// Constructor of `host_exception_class`.
    pub host_exception_ctor: crate::DeclKey,
}
