//! Shared read-only context for one compilation run.

use opal_core::{CodegenConfig, WellKnown};

use crate::itable::InterfaceTableInfo;
use crate::metadata::{DeclGraph, MetadataCache};

/// Everything per-unit codegen reads but never writes: the declaration
/// graph, the layout caches, the interface slot assignment, and the
/// resolved build-mode flags. One instance is shared by all worker threads.
pub struct BackendContext<'a> {
    pub graph: &'a DeclGraph<'a>,
    pub cache: &'a MetadataCache<'a>,
    pub itables: &'a InterfaceTableInfo,
    pub config: CodegenConfig,
    pub well_known: WellKnown,
}

impl<'a> BackendContext<'a> {
    pub fn new(
        graph: &'a DeclGraph<'a>,
        cache: &'a MetadataCache<'a>,
        itables: &'a InterfaceTableInfo,
        config: CodegenConfig,
        well_known: WellKnown,
    ) -> Self {
        Self {
            graph,
            cache,
            itables,
            config,
            well_known,
        }
    }
}
