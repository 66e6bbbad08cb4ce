//! Opal: a compiler backend for a garbage-collected stack machine.
//!
//! This facade crate re-exports the two workspace members:
//!
//! - [`opal_core`]: the typed IR, declaration keys, configuration, and the
//!   error taxonomy (the contract between the frontend and the backend).
//! - [`opal_codegen`]: the backend proper: declaration and body generation,
//!   layout metadata, and the final link step.
//!
//! The entry point is [`compile`]: hand it the compilation units, the
//! resolved build flags, and the well-known classes, and it returns the
//! linked module for the downstream assembler.

pub use opal_codegen::{
    BackendContext, BodyGenerator, DeclGraph, InterfaceTableInfo, LinkedModule, MetadataCache,
    ModuleFragment, compile,
};
pub use opal_core::{CodegenConfig, CodegenError, DeclKey, IrType, WellKnown, ir};
