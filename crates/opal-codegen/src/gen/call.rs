//! Call dispatch and instance construction.
//!
//! A call is dispatched statically unless the callee is overridable and the
//! call is not a statically-resolved super-call. Dynamic dispatch routes
//! through the receiver's vtable (class-typed receivers) or through its
//! interface table (interface-typed receivers); the interface path is
//! guarded by the whole-program "does any class implement this interface"
//! fact, and compiles to a trap when no implementor exists.

use opal_core::ir::Expr;
use opal_core::{CodegenError, DeclKey};

use crate::decl::{self, function_type};
use crate::instr::Instr;
use crate::metadata::{ITABLE_FIELD, VTABLE_FIELD};
use crate::repr::{HeapType, ReprType};

use super::{BodyGenerator, Result};

pub(crate) fn gen_call(
    g: &mut BodyGenerator<'_, '_>,
    callee: DeclKey,
    receiver: Option<&Expr>,
    args: &[Expr],
    is_super: bool,
) -> Result<()> {
    let f = g.ctx.graph.function(callee)?;

    let dynamic = f.is_virtual() && !is_super && f.owner.is_some();
    if !dynamic {
        let mut param_idx = 0;
        if let Some(r) = receiver {
            let expected = f
                .params
                .first()
                .ok_or_else(|| CodegenError::shape(&f.name, "method without a receiver parameter"))?
                .ty
                .clone();
            g.gen_with_expected(r, &expected)?;
            param_idx = 1;
        }
        gen_args(g, args, callee, param_idx)?;
        g.fragment.functions.reference(callee);
        g.emit(Instr::Call(callee));
        return Ok(());
    }

    let receiver = receiver
        .ok_or_else(|| CodegenError::shape(&f.name, "dynamic call without a receiver"))?;
    // Dispatch is driven by the call's static receiver class, which may be
    // an ancestor of the declaring class after erasure.
    let static_class = receiver
        .ty()
        .class_key()
        .or(f.owner)
        .ok_or_else(|| CodegenError::shape(&f.name, "dynamic call on a non-class receiver"))?;

    if g.ctx.graph.class(static_class)?.is_interface() {
        gen_interface_call(g, callee, receiver, args, static_class)
    } else {
        gen_virtual_call(g, callee, receiver, args, static_class)
    }
}

/// Class-typed receiver: `receiver.vtable.slot(index)` then an indirect call.
fn gen_virtual_call(
    g: &mut BodyGenerator<'_, '_>,
    callee: DeclKey,
    receiver: &Expr,
    args: &[Expr],
    class: DeclKey,
) -> Result<()> {
    let f = g.ctx.graph.function(callee)?;
    let md = g.ctx.cache.class_metadata(class)?;
    let slot = md.slot_of(f.signature()).ok_or_else(|| {
        CodegenError::shape(
            &f.name,
            format!("method not in the vtable of '{}'", g.ctx.graph.name_of(class)),
        )
    })?;

    let struct_key = class.struct_type();
    let vtable_key = class.vtable_type();
    g.fragment.struct_types.reference(struct_key);
    g.fragment.vtable_types.reference(vtable_key);

    // Checked cast of the receiver to the statically expected class defends
    // against representation-erased generic call sites.
    g.r#gen(receiver)?;
    g.emit(Instr::RefCast {
        heap: HeapType::Struct(struct_key),
        nullable: false,
    });
    let tmp = g.emitter.alloc_temp(ReprType::Ref {
        heap: HeapType::Struct(struct_key),
        nullable: false,
    });
    g.emit(Instr::LocalTee(tmp));

    gen_args(g, args, callee, 1)?;

    g.emit(Instr::LocalGet(tmp));
    g.emit(Instr::StructGet {
        ty: struct_key,
        field: VTABLE_FIELD,
        ext: None,
    });
    g.emit(Instr::StructGet {
        ty: vtable_key,
        field: slot,
        ext: None,
    });
    gen_call_ref(g, callee)
}

/// Interface-typed receiver: read the interface table, locate the interface's
/// sub-table, read the method slot, indirect-call.
fn gen_interface_call(
    g: &mut BodyGenerator<'_, '_>,
    callee: DeclKey,
    receiver: &Expr,
    args: &[Expr],
    iface: DeclKey,
) -> Result<()> {
    if !g.ctx.itables.has_implementors(iface) {
        // Dead-code elimination proved no receiver instance can exist; the
        // call path is unreachable by construction.
        g.gen_statement(receiver)?;
        for arg in args {
            g.gen_statement(arg)?;
        }
        g.emit(Instr::Unreachable);
        return Ok(());
    }

    let f = g.ctx.graph.function(callee)?;
    let imd = g.ctx.cache.interface_metadata(iface)?;
    let method = imd.method_index(f.signature()).ok_or_else(|| {
        CodegenError::shape(
            &f.name,
            format!("method not declared by '{}'", g.ctx.graph.name_of(iface)),
        )
    })?;
    let slot = g.ctx.itables.slot_of(iface).ok_or_else(|| {
        CodegenError::shape(
            &f.name,
            "implemented interface was never assigned a slot",
        )
    })?;

    let root_struct = g.ctx.well_known.root_class.struct_type();
    let subtable = iface.itable_type();
    g.fragment.struct_types.reference(root_struct);
    g.fragment.itable_types.reference(subtable);
    g.fragment.array_types.reference(DeclKey::ITABLE_ARRAY);

    g.r#gen(receiver)?;
    g.emit(Instr::RefCast {
        heap: HeapType::Struct(root_struct),
        nullable: false,
    });
    let tmp = g.emitter.alloc_temp(ReprType::Ref {
        heap: HeapType::Struct(root_struct),
        nullable: false,
    });
    g.emit(Instr::LocalTee(tmp));

    gen_args(g, args, callee, 1)?;

    g.emit(Instr::LocalGet(tmp));
    g.emit(Instr::StructGet {
        ty: root_struct,
        field: ITABLE_FIELD,
        ext: None,
    });
    g.emit(Instr::I32Const(slot as i32));
    g.emit(Instr::ArrayGet {
        ty: DeclKey::ITABLE_ARRAY,
        ext: None,
    });
    g.emit(Instr::RefCast {
        heap: HeapType::Struct(subtable),
        nullable: false,
    });
    g.emit(Instr::StructGet {
        ty: subtable,
        field: method,
        ext: None,
    });
    gen_call_ref(g, callee)
}

/// Instance construction: allocate with header and zeroed fields, then run
/// the constructor, which returns the receiver, so call sites need no
/// temporary.
pub(crate) fn gen_new(
    g: &mut BodyGenerator<'_, '_>,
    class: DeclKey,
    ctor: DeclKey,
    args: &[Expr],
) -> Result<()> {
    gen_allocate(g, class)?;
    gen_args(g, args, ctor, 1)?;
    g.fragment.functions.reference(ctor);
    g.emit(Instr::Call(ctor));
    Ok(())
}

/// Allocate an instance: vtable and itable header values, zero/null field
/// placeholders, one struct allocation.
pub(crate) fn gen_allocate(g: &mut BodyGenerator<'_, '_>, class: DeclKey) -> Result<()> {
    let md = g.ctx.cache.class_metadata(class)?;

    g.fragment.vtable_globals.reference(class.vtable_global());
    g.emit(Instr::GlobalGet(class.vtable_global()));

    if md.interfaces.is_empty() {
        g.emit(Instr::RefNull(HeapType::Array(DeclKey::ITABLE_ARRAY)));
    } else {
        g.fragment.itable_globals.reference(class.itable_global());
        g.emit(Instr::GlobalGet(class.itable_global()));
    }

    for layout in &md.fields {
        g.emit(decl::zero_init(layout.storage.widened()));
    }

    g.fragment.struct_types.reference(class.struct_type());
    g.emit(Instr::StructNew(class.struct_type()));
    Ok(())
}

fn gen_args(
    g: &mut BodyGenerator<'_, '_>,
    args: &[Expr],
    callee: DeclKey,
    first_param: usize,
) -> Result<()> {
    let f = g.ctx.graph.function(callee)?;
    let params = &f.params[first_param.min(f.params.len())..];
    if params.len() != args.len() {
        return Err(CodegenError::shape(
            &f.name,
            format!("expected {} arguments, found {}", params.len(), args.len()),
        ));
    }
    let expected: Vec<_> = params.iter().map(|p| p.ty.clone()).collect();
    for (arg, ty) in args.iter().zip(&expected) {
        g.gen_with_expected(arg, ty)?;
    }
    Ok(())
}

fn gen_call_ref(g: &mut BodyGenerator<'_, '_>, callee: DeclKey) -> Result<()> {
    let f = g.ctx.graph.function(callee)?;
    let (sig_key, func_type) = function_type(g.ctx, f);
    g.fragment
        .func_types
        .define_or_confirm(sig_key, &f.name, func_type)?;
    g.emit(Instr::CallRef(sig_key));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::r#gen::testgen::emit_with;
    use crate::metadata::testutil::{TestProgram, function, method};
    use opal_core::ir::{ClassFlags, FnFlags};
    use opal_core::{CodegenConfig, IrType};

    fn unit_block() -> Expr {
        Expr::Block {
            statements: vec![],
            ty: IrType::Unit,
        }
    }

    #[test]
    fn static_call_is_direct() {
        let mut prog = TestProgram::new();
        let callee = prog.add_function(function(
            "demo.f",
            &[IrType::Int32],
            IrType::Unit,
            Some(unit_block()),
            FnFlags::empty(),
        ));
        let call = Expr::Call {
            callee,
            receiver: None,
            args: vec![Expr::IntConst {
                value: 7,
                ty: IrType::Int32,
            }],
            is_super: false,
            ty: IrType::Unit,
        };
        let instrs = emit_with(&prog, CodegenConfig::default(), |g| g.r#gen(&call)).unwrap();
        assert_eq!(instrs, vec![Instr::I32Const(7), Instr::Call(callee)]);
    }

    #[test]
    fn super_call_is_never_dispatched() {
        let mut prog = TestProgram::new();
        let class = prog.add_class("demo.Base", None, &[]);
        let m = method(
            class,
            "demo.Base",
            "run",
            FnFlags::OPEN,
            &[],
            IrType::Unit,
            Some(unit_block()),
        );
        let callee = m.key;
        prog.add_function(m);

        let call = Expr::Call {
            callee,
            receiver: Some(Box::new(Expr::Null {
                ty: IrType::nullable_class(class),
            })),
            args: vec![],
            is_super: true,
            ty: IrType::Unit,
        };
        let instrs = emit_with(&prog, CodegenConfig::default(), |g| g.r#gen(&call)).unwrap();
        assert_eq!(instrs.last(), Some(&Instr::Call(callee)));
        assert!(!instrs.iter().any(|i| matches!(i, Instr::CallRef(_))));
    }

    #[test]
    fn virtual_call_reads_the_vtable_slot() {
        let mut prog = TestProgram::new();
        let key = opal_core::DeclKey::class("demo.C");
        let first = method(key, "demo.C", "first", FnFlags::OPEN, &[], IrType::Unit, Some(unit_block()));
        let second = method(key, "demo.C", "second", FnFlags::OPEN, &[], IrType::Unit, Some(unit_block()));
        let callee = second.key;
        prog.add_class_full("demo.C", None, &[], &[], vec![first, second], ClassFlags::empty());

        let call = Expr::Call {
            callee,
            receiver: Some(Box::new(Expr::Null {
                ty: IrType::nullable_class(key),
            })),
            args: vec![],
            is_super: false,
            ty: IrType::Unit,
        };
        let instrs = emit_with(&prog, CodegenConfig::default(), |g| g.r#gen(&call)).unwrap();

        // Receiver cast, stash, vtable read, slot read, indirect call.
        assert!(matches!(instrs[1], Instr::RefCast { .. }));
        assert!(matches!(instrs[2], Instr::LocalTee(_)));
        assert_eq!(
            instrs[4],
            Instr::StructGet {
                ty: key.struct_type(),
                field: VTABLE_FIELD,
                ext: None
            }
        );
        assert_eq!(
            instrs[5],
            Instr::StructGet {
                ty: key.vtable_type(),
                field: 1, // `second` occupies slot 1
                ext: None
            }
        );
        assert!(matches!(instrs[6], Instr::CallRef(_)));
    }

    #[test]
    fn interface_call_reads_the_itable() {
        let mut prog = TestProgram::new();
        prog.add_class("opal.Any", None, &[]);
        let iface = prog.add_interface("demo.Runner", &["run"]);
        let iface_decl_method = opal_core::DeclKey::function("demo.Runner.run");
        let class_key = opal_core::DeclKey::class("demo.C");
        let impl_m = method(
            class_key,
            "demo.C",
            "run",
            FnFlags::OPEN,
            &[],
            IrType::Unit,
            Some(unit_block()),
        );
        prog.add_class_full("demo.C", None, &[iface], &[], vec![impl_m], ClassFlags::empty());

        let call = Expr::Call {
            callee: iface_decl_method,
            receiver: Some(Box::new(Expr::Null {
                ty: IrType::nullable_class(iface),
            })),
            args: vec![],
            is_super: false,
            ty: IrType::Unit,
        };
        let instrs = emit_with(&prog, CodegenConfig::default(), |g| g.r#gen(&call)).unwrap();

        // Sub-table lookup at the interface's global slot, then method 0.
        assert!(instrs.contains(&Instr::I32Const(0)));
        assert!(instrs.contains(&Instr::ArrayGet {
            ty: opal_core::DeclKey::ITABLE_ARRAY,
            ext: None
        }));
        assert_eq!(
            instrs[instrs.len() - 2],
            Instr::StructGet {
                ty: iface.itable_type(),
                field: 0,
                ext: None
            }
        );
        assert!(matches!(instrs.last(), Some(Instr::CallRef(_))));
    }

    #[test]
    fn interface_with_no_implementors_traps() {
        let mut prog = TestProgram::new();
        prog.add_class("opal.Any", None, &[]);
        let iface = prog.add_interface("demo.Ghost", &["boo"]);
        let callee = opal_core::DeclKey::function("demo.Ghost.boo");

        let call = Expr::Call {
            callee,
            receiver: Some(Box::new(Expr::Null {
                ty: IrType::nullable_class(iface),
            })),
            args: vec![],
            is_super: false,
            ty: IrType::Unit,
        };
        let instrs = emit_with(&prog, CodegenConfig::default(), |g| g.r#gen(&call)).unwrap();

        // An unconditional trap, never a slot read.
        assert_eq!(instrs.last(), Some(&Instr::Unreachable));
        assert!(!instrs.iter().any(|i| matches!(i, Instr::ArrayGet { .. })));
        assert!(!instrs.iter().any(|i| matches!(i, Instr::CallRef(_))));
    }

    #[test]
    fn new_allocates_then_calls_the_constructor() {
        let mut prog = TestProgram::new();
        let class = prog.add_class("demo.P", None, &[("x", IrType::Int32)]);
        let ctor = method(
            class,
            "demo.P",
            "<init>",
            FnFlags::CONSTRUCTOR,
            &[IrType::Int32],
            IrType::class(class),
            Some(unit_block()),
        );
        let ctor_key = ctor.key;
        prog.add_function(ctor);

        let e = Expr::New {
            class,
            ctor: ctor_key,
            args: vec![Expr::IntConst {
                value: 9,
                ty: IrType::Int32,
            }],
            ty: IrType::class(class),
        };
        let instrs = emit_with(&prog, CodegenConfig::default(), |g| g.r#gen(&e)).unwrap();

        assert_eq!(
            instrs,
            vec![
                Instr::GlobalGet(class.vtable_global()),
                Instr::RefNull(HeapType::Array(opal_core::DeclKey::ITABLE_ARRAY)),
                Instr::I32Const(0), // zeroed field
                Instr::StructNew(class.struct_type()),
                Instr::I32Const(9), // constructor argument
                Instr::Call(ctor_key),
            ]
        );
    }

    #[test]
    fn argument_count_mismatch_is_shape_error() {
        let mut prog = TestProgram::new();
        let callee = prog.add_function(function(
            "demo.f",
            &[IrType::Int32],
            IrType::Unit,
            Some(unit_block()),
            FnFlags::empty(),
        ));
        let call = Expr::Call {
            callee,
            receiver: None,
            args: vec![],
            is_super: false,
            ty: IrType::Unit,
        };
        let err = emit_with(&prog, CodegenConfig::default(), |g| g.r#gen(&call)).unwrap_err();
        assert!(matches!(err, CodegenError::Shape { .. }));
    }
}
