//! Vtable and itable value construction.
//!
//! A vtable holds one function reference per virtual-method slot, in slot
//! order. An itable holds one sub-table per implemented interface, keyed by
//! the globally assigned interface slot; each sub-table holds one function
//! reference per interface method, resolved by matching the interface
//! method's signature against the class's virtual-method list.
//!
//! A slot without a resolvable implementation is null-filled when the class
//! is abstract, or when incomplete implementations are tolerated (dead-code
//! elimination is expected to have stripped the real implementation along
//! with every call path). Otherwise it is a fatal layout error.

use opal_core::CodegenError;
use opal_core::ir::ClassDecl;

use crate::context::BackendContext;
use crate::fragment::{ItableSubTable, ItableValue, ModuleFragment, VtableValue};
use crate::metadata::ClassMetadata;

type Result<T> = std::result::Result<T, CodegenError>;

/// Build the vtable value for a class.
pub(crate) fn build_vtable(
    ctx: &BackendContext<'_>,
    fragment: &mut ModuleFragment,
    decl: &ClassDecl,
    md: &ClassMetadata,
) -> Result<VtableValue> {
    let mut entries = Vec::with_capacity(md.virtual_methods.len());
    for slot in &md.virtual_methods {
        if slot.is_abstract {
            if decl.is_abstract() || ctx.config.allow_incomplete_implementations {
                entries.push(None);
                continue;
            }
            return Err(CodegenError::layout(
                &decl.name,
                ctx.graph.name_of(slot.function),
            ));
        }
        fragment.functions.reference(slot.function);
        entries.push(Some(slot.function));
    }
    Ok(VtableValue {
        ty: decl.key.vtable_type(),
        entries,
    })
}

/// Build the itable value for a class implementing at least one interface.
pub(crate) fn build_itable(
    ctx: &BackendContext<'_>,
    fragment: &mut ModuleFragment,
    decl: &ClassDecl,
    md: &ClassMetadata,
) -> Result<ItableValue> {
    let mut tables = Vec::with_capacity(md.interfaces.len());
    for iface in &md.interfaces {
        let slot = ctx.itables.slot_of(*iface).ok_or_else(|| {
            CodegenError::shape(
                &decl.name,
                format!(
                    "implemented interface '{}' was never assigned a slot",
                    ctx.graph.name_of(*iface)
                ),
            )
        })?;
        let imd = ctx.cache.interface_metadata(*iface)?;

        let mut methods = Vec::with_capacity(imd.methods.len());
        for method in &imd.methods {
            methods.push(resolve_interface_method(
                ctx, fragment, decl, md, method.signature,
            )?);
        }
        fragment.itable_types.reference(iface.itable_type());
        tables.push(ItableSubTable {
            interface: *iface,
            slot,
            methods,
        });
    }
    Ok(ItableValue {
        len: ctx.itables.table_len(&md.interfaces),
        tables,
    })
}

/// Resolve one interface method against a class.
///
/// Resolution order: the class's virtual-method list; then a default body
/// provided by exactly one implemented interface. An ambiguous default
/// (several interfaces, no concrete override) is a hard error; a missing
/// implementation is null-filled only under tolerance.
fn resolve_interface_method(
    ctx: &BackendContext<'_>,
    fragment: &mut ModuleFragment,
    decl: &ClassDecl,
    md: &ClassMetadata,
    signature: opal_core::DeclKey,
) -> Result<Option<opal_core::DeclKey>> {
    if let Some(slot) = md.slot_of(signature) {
        let vslot = &md.virtual_methods[slot as usize];
        if !vslot.is_abstract {
            fragment.functions.reference(vslot.function);
            return Ok(Some(vslot.function));
        }
        // Abstract in the vtable: fall through to default resolution.
    }

    let mut defaults = Vec::new();
    for iface in &md.interfaces {
        let imd = ctx.cache.interface_metadata(*iface)?;
        if let Some(i) = imd.method_index(signature) {
            let m = &imd.methods[i as usize];
            if m.has_default {
                defaults.push(m.function);
            }
        }
    }
    match defaults.as_slice() {
        [single] => {
            fragment.functions.reference(*single);
            Ok(Some(*single))
        }
        [] => {
            if decl.is_abstract() || ctx.config.allow_incomplete_implementations {
                Ok(None)
            } else {
                Err(CodegenError::layout(&decl.name, format!("{signature}")))
            }
        }
        _ => Err(CodegenError::layout(
            &decl.name,
            format!("ambiguous default implementations for {signature}"),
        )),
    }
}
