//! The Opal backend.
//!
//! Lowers the typed IR into a module for a stack-based, statically-typed,
//! garbage-collected virtual machine.
//!
//! ## Architecture
//!
//! - [`symbol`]: forward-reference cells, reference before define
//! - [`repr`]: the type transformer (value, field, and result forms)
//! - [`metadata`]: class/interface layout metadata, memoized per run
//! - [`itable`]: whole-program interface slot numbering
//! - [`instr`]: the target instruction set, symbolic operands
//! - [`fragment`]: per-unit output aggregation
//! - [`emit`]: per-function instruction emitter
//! - [`decl`]: the declaration generator
//! - [`r#gen`]: the expression/statement body generator
//! - [`link`]: the single-threaded final merge
//!
//! Per-unit code generation is pure and independent: distinct units are
//! compiled on worker threads, since a fragment only creates or references
//! symbols by key and never reads another fragment's bound values. The only
//! shared mutable state is the metadata cache, which memoizes a pure
//! computation.

pub mod context;
pub mod decl;
pub mod emit;
pub mod fragment;
pub mod r#gen;
pub mod instr;
pub mod itable;
pub mod link;
pub mod metadata;
pub mod repr;
pub mod symbol;

use rayon::prelude::*;
use tracing::debug;

pub use context::BackendContext;
pub use fragment::ModuleFragment;
pub use r#gen::BodyGenerator;
pub use instr::Instr;
pub use itable::InterfaceTableInfo;
pub use link::{LinkedModule, TagDecl};
pub use metadata::{ClassMetadata, DeclGraph, InterfaceMetadata, MetadataCache};
pub use repr::{FieldStorage, HeapType, ReprType};
pub use symbol::{Symbol, SymbolTable};

use opal_core::ir::CompilationUnit;
use opal_core::{CodegenConfig, CodegenError, WellKnown};

/// Compile all units into one linked module.
///
/// Units are generated in parallel; the merge is single-threaded. A fatal
/// error in any unit aborts the whole compilation; there is no partial
/// output.
pub fn compile(
    units: &[CompilationUnit],
    config: CodegenConfig,
    well_known: WellKnown,
) -> Result<LinkedModule, CodegenError> {
    let graph = DeclGraph::build(units)?;
    let cache = MetadataCache::new(&graph);
    let itables = InterfaceTableInfo::build(units, &cache)?;
    let ctx = BackendContext::new(&graph, &cache, &itables, config, well_known);

    debug!(units = units.len(), "starting codegen");
    let fragments: Vec<ModuleFragment> = units
        .par_iter()
        .map(|unit| decl::generate_unit(&ctx, unit))
        .collect::<Result<_, _>>()?;

    link::link(&ctx, fragments)
}
