//! Core types shared by the Opal backend.
//!
//! This crate defines the contract between the frontend (which produces the
//! typed IR) and the backend (which lowers it):
//!
//! - [`DeclKey`]: stable, content-independent declaration identity
//! - [`ir`]: the typed declaration/expression tree
//! - [`CodegenConfig`] / [`WellKnown`]: resolved build-mode flags and the
//!   well-known classes the backend must locate
//! - [`CodegenError`]: the fatal error taxonomy

mod config;
mod decl_key;
mod error;
pub mod ir;

pub use config::{CodegenConfig, WellKnown};
pub use decl_key::DeclKey;
pub use error::CodegenError;
pub use ir::IrType;
