//! Type-expected coercion, type tests, and casts.
//!
//! After generating an expression whose static type may differ from the
//! context's expected type, the two are reconciled by structural subtyping.
//! The precedence order is load-bearing: checking the never type first
//! avoids generating dead downcasts on intentionally-unreachable branches.
//!
//! A primitive/reference mismatch indicates an upstream type-checking
//! inconsistency; it is compiled to a defensive trap, never silently
//! miscompiled.

use opal_core::ir::{ClassFlags, Expr};
use opal_core::{DeclKey, IrType};

use crate::instr::{BlockType, Instr};
use crate::metadata::FIELDS_START;
use crate::repr::{self, HeapType, ReprType};

use super::{BodyGenerator, Result};

/// Reconcile the value just generated (of type `actual`) with `expected`.
pub(crate) fn coerce(g: &mut BodyGenerator<'_, '_>, actual: &IrType, expected: &IrType) -> Result<()> {
    // (1) The context expects the never type: nothing can flow onward.
    if expected.is_nothing() {
        g.emit(Instr::Unreachable);
        return Ok(());
    }
    // (2) The value is never-typed: the walker already marked it.
    if actual.is_nothing() {
        return Ok(());
    }
    // (3) Both sides are the nullable never type: normalize to the bottom
    // null.
    if actual.is_nullable_nothing() && expected.is_nullable_nothing() {
        g.emit(Instr::Drop);
        g.emit(Instr::RefNull(HeapType::None));
        return Ok(());
    }

    let actual_repr = repr::value_repr(actual, g.ctx.graph);
    let expected_repr = repr::value_repr(expected, g.ctx.graph);

    match (actual_repr, expected_repr) {
        (None, None) => Ok(()),
        // (4) Erased representations are identical.
        (Some(a), Some(e)) if a.same_erased(&e) => Ok(()),
        // (5) Widening is representation-transparent for reference types.
        (Some(_), Some(_)) if is_subtype(g, actual, expected) => Ok(()),
        (Some(a), Some(e)) => {
            // Inline-class box/unbox sits between the reference rules and
            // the mismatch trap: the unboxed payload is a primitive with a
            // boxed counterpart.
            if let Some(class) = unboxed_inline(g, actual)
                && !a.is_ref()
                && e.is_ref()
            {
                return box_inline(g, class);
            }
            if let Some(class) = unboxed_inline(g, expected)
                && a.is_ref()
                && !e.is_ref()
            {
                return unbox_inline(g, class);
            }
            match (a, e) {
                // (6) The expected type is the narrower one: checked downcast.
                (ReprType::Ref { .. }, ReprType::Ref { heap, nullable }) => {
                    g.emit(Instr::RefCast { heap, nullable });
                    Ok(())
                }
                // (7) Primitive/reference mismatch: defensive trap.
                _ => {
                    g.emit(Instr::Unreachable);
                    Ok(())
                }
            }
        }
        // A value where none is expected, or vice versa: same defense.
        _ => {
            g.emit(Instr::Unreachable);
            Ok(())
        }
    }
}

/// Structural subtyping after erasure.
fn is_subtype(g: &BodyGenerator<'_, '_>, actual: &IrType, expected: &IrType) -> bool {
    if actual == expected {
        return true;
    }
    if actual.is_nullable() && !expected.is_nullable() {
        return false;
    }
    // The nullable never type is below every nullable reference.
    if actual.is_nullable_nothing() {
        return expected.is_reference() && expected.is_nullable();
    }
    match (actual, expected) {
        (IrType::String { .. }, IrType::String { .. }) => true,
        (IrType::Array { class: a, .. }, IrType::Array { class: e, .. }) => a == e,
        (IrType::Function { signature: a, .. }, IrType::Function { signature: e, .. }) => a == e,
        (IrType::Class { class: a, .. }, IrType::Class { class: e, .. }) => {
            let (Ok(a_decl), Ok(e_decl)) = (g.ctx.graph.class(*a), g.ctx.graph.class(*e)) else {
                return false;
            };
            match (a_decl.is_interface(), e_decl.is_interface()) {
                // Interfaces erase to the top reference type; anything
                // class-shaped widens into them.
                (false, true) => g
                    .ctx
                    .cache
                    .class_metadata(*a)
                    .map(|md| md.interfaces.contains(e))
                    .unwrap_or(false),
                (true, true) => a == e,
                (false, false) => g.ctx.graph.extends(*a, *e),
                (true, false) => false,
            }
        }
        _ => false,
    }
}

/// The class key when `ty` is a non-null inline wrapper (unboxed repr).
fn unboxed_inline(g: &BodyGenerator<'_, '_>, ty: &IrType) -> Option<DeclKey> {
    let IrType::Class {
        class,
        nullable: false,
    } = ty
    else {
        return None;
    };
    let decl = g.ctx.graph.class(*class).ok()?;
    (decl.flags.contains(ClassFlags::INLINE) && decl.fields.len() == 1).then_some(*class)
}

/// Box an unboxed inline value: stash the payload, allocate the wrapper,
/// write the payload through the constructor-free path (single field).
fn box_inline(g: &mut BodyGenerator<'_, '_>, class: DeclKey) -> Result<()> {
    let md = g.ctx.cache.class_metadata(class)?;
    let payload = md.fields[0].storage.widened();
    let tmp = g.emitter.alloc_temp(payload);
    g.emit(Instr::LocalSet(tmp));

    g.fragment.vtable_globals.reference(class.vtable_global());
    g.emit(Instr::GlobalGet(class.vtable_global()));
    g.emit(Instr::RefNull(HeapType::Array(DeclKey::ITABLE_ARRAY)));
    g.emit(Instr::LocalGet(tmp));
    g.fragment.struct_types.reference(class.struct_type());
    g.emit(Instr::StructNew(class.struct_type()));
    Ok(())
}

/// Unbox a boxed inline value: cast to the wrapper and read its payload.
fn unbox_inline(g: &mut BodyGenerator<'_, '_>, class: DeclKey) -> Result<()> {
    let md = g.ctx.cache.class_metadata(class)?;
    g.fragment.struct_types.reference(class.struct_type());
    g.emit(Instr::RefCast {
        heap: HeapType::Struct(class.struct_type()),
        nullable: false,
    });
    g.emit(Instr::StructGet {
        ty: class.struct_type(),
        field: FIELDS_START,
        ext: md.fields[0].storage.extension(),
    });
    Ok(())
}

// ============================================================================
// Type tests and casts
// ============================================================================

/// `value is Target`.
///
/// Class targets use a direct type test. Interface targets probe the
/// receiver's interface table at the interface's global slot; with no
/// implementor anywhere, the answer folds to constant false.
pub(crate) fn gen_is(g: &mut BodyGenerator<'_, '_>, value: &Expr, target: &IrType) -> Result<()> {
    g.r#gen(value)?;
    let class = value_class(g, target, "is")?;

    if let IrType::Array { .. } = target {
        g.fragment.array_types.reference(class.struct_type());
        g.emit(Instr::RefTest {
            heap: HeapType::Array(class.struct_type()),
        });
        return Ok(());
    }

    let decl = g.ctx.graph.class(class)?;
    if !decl.is_interface() {
        g.fragment.struct_types.reference(class.struct_type());
        g.emit(Instr::RefTest {
            heap: HeapType::Struct(class.struct_type()),
        });
        return Ok(());
    }

    let Some(slot) = g.ctx.itables.slot_of(class) else {
        g.emit(Instr::Drop);
        g.emit(Instr::I32Const(0));
        return Ok(());
    };

    // null is not an instance of anything; a class without interfaces has a
    // null itable; an occupied slot means the interface is implemented.
    let root_struct = g.ctx.well_known.root_class.struct_type();
    g.fragment.struct_types.reference(root_struct);
    g.fragment.array_types.reference(DeclKey::ITABLE_ARRAY);

    let value_tmp = g.emitter.alloc_temp(ReprType::Ref {
        heap: HeapType::Any,
        nullable: true,
    });
    g.emit(Instr::LocalTee(value_tmp));
    g.emit(Instr::RefIsNull);
    g.emitter.begin_if(BlockType::Value(ReprType::I32));
    g.emit(Instr::I32Const(0));
    g.emitter.else_();

    let itable_tmp = g.emitter.alloc_temp(ReprType::Ref {
        heap: HeapType::Array(DeclKey::ITABLE_ARRAY),
        nullable: true,
    });
    g.emit(Instr::LocalGet(value_tmp));
    g.emit(Instr::RefCast {
        heap: HeapType::Struct(root_struct),
        nullable: false,
    });
    g.emit(Instr::StructGet {
        ty: root_struct,
        field: crate::metadata::ITABLE_FIELD,
        ext: None,
    });
    g.emit(Instr::LocalTee(itable_tmp));
    g.emit(Instr::RefIsNull);
    g.emitter.begin_if(BlockType::Value(ReprType::I32));
    g.emit(Instr::I32Const(0));
    g.emitter.else_();
    g.emit(Instr::LocalGet(itable_tmp));
    g.emit(Instr::RefCast {
        heap: HeapType::Array(DeclKey::ITABLE_ARRAY),
        nullable: false,
    });
    g.emit(Instr::I32Const(slot as i32));
    g.emit(Instr::ArrayGet {
        ty: DeclKey::ITABLE_ARRAY,
        ext: None,
    });
    g.emit(Instr::RefIsNull);
    g.emit(Instr::I32Eqz);
    g.emitter.end();
    g.emitter.end();
    Ok(())
}

/// A checked cast reuses the coercion rules: upcasts vanish, downcasts
/// check, never-typed operands stay unreachable.
pub(crate) fn gen_cast(g: &mut BodyGenerator<'_, '_>, value: &Expr, target: &IrType) -> Result<()> {
    g.r#gen(value)?;
    coerce(g, &value.ty(), target)
}

fn value_class(
    g: &BodyGenerator<'_, '_>,
    ty: &IrType,
    what: &str,
) -> Result<DeclKey> {
    ty.class_key().ok_or_else(|| {
        opal_core::CodegenError::shape(
            g.emitter.name(),
            format!("'{what}' target '{ty}' is not a class type"),
        )
    })
}
