//! Backend error types.
//!
//! The taxonomy follows the failure semantics of the backend:
//!
//! ```text
//! CodegenError
//! ├── Shape                - IR violates an assumed invariant (wrong node
//! │                          kind in a position, missing body, unknown key)
//! ├── Layout               - a vtable/itable slot has no resolvable
//! │                          implementation and tolerance is disabled
//! ├── DuplicateDefinition  - a symbol was defined twice
//! └── Unresolved           - final assembly found a referenced symbol
//!                            still unbound
//! ```
//!
//! All of these are fatal for the enclosing compilation unit: a malformed
//! function cannot be skipped without leaving dangling symbol references, so
//! there is no per-function recovery. Representation mismatches at coercion
//! sites are *not* errors here: they are surfaced as a defensive trap in the
//! generated code, since silent miscompilation is strictly worse than a
//! visible runtime crash.

use thiserror::Error;

use crate::DeclKey;

/// Errors produced during code generation and final assembly.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodegenError {
    /// The IR violated a structural invariant.
    #[error("malformed IR in '{decl}': {message}")]
    Shape { decl: String, message: String },

    /// A dispatch-table slot could not be filled and incomplete
    /// implementations are not tolerated.
    #[error("no implementation for '{method}' required by '{decl}'")]
    Layout { decl: String, method: String },

    /// A symbol was defined more than once.
    #[error("duplicate definition of {key} ('{name}')")]
    DuplicateDefinition { key: DeclKey, name: String },

    /// Final assembly found a referenced symbol that was never bound.
    #[error("unresolved reference to {key} ('{name}')")]
    Unresolved { key: DeclKey, name: String },
}

impl CodegenError {
    /// Create a shape error for a named declaration.
    pub fn shape(decl: impl Into<String>, message: impl Into<String>) -> Self {
        CodegenError::Shape {
            decl: decl.into(),
            message: message.into(),
        }
    }

    /// Create a layout error for a missing implementation.
    pub fn layout(decl: impl Into<String>, method: impl Into<String>) -> Self {
        CodegenError::Layout {
            decl: decl.into(),
            method: method.into(),
        }
    }

    /// Create a duplicate-definition error.
    pub fn duplicate(key: DeclKey, name: impl Into<String>) -> Self {
        CodegenError::DuplicateDefinition {
            key,
            name: name.into(),
        }
    }

    /// Create an unresolved-symbol error.
    pub fn unresolved(key: DeclKey, name: impl Into<String>) -> Self {
        CodegenError::Unresolved {
            key,
            name: name.into(),
        }
    }
}
