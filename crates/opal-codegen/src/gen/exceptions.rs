//! Structured exception lowering.
//!
//! `try`/`catch` translates into one of two nested-block encodings, chosen
//! at build time. Both produce identical observable behavior: the first
//! matching clause wins, left to right; an unmatched exception is re-thrown;
//! and the merge block is reachable from the protected region and every
//! handler.
//!
//! ## Structured-handler encoding
//!
//! ```text
//! block $outer (result ty)
//!   block $merge (result throwable)
//!     [block $host (result extern)]       ; only with an umbrella catch
//!       try_table exn->$merge [host->$host]
//!         [protected region]
//!         br $outer                       ; normal completion
//!       end
//!       unreachable
//!     [end $host]                         ; host payload on stack
//!     [wrap into the host-exception class]; falls through to $merge
//!   end $merge                            ; caught throwable on stack
//!   [handler dispatch, first match wins, br $outer each]
//!   [re-throw unmatched]
//! end $outer
//! ```
//!
//! ## Legacy encoding
//!
//! A single `try .. catch .. end` construct. With an umbrella catch both tag
//! arms branch into one shared handler block (only one handler body is
//! emitted); without one, the dispatch chain lives in the catch arm and
//! re-throws via `rethrow`.
//!
//! When the build uses traps instead of exceptions, any `try` degrades to
//! its protected-region code and `throw` becomes a trap: no exception can
//! ever be caught.

use opal_core::ir::{CatchClause, Expr};
use opal_core::{CodegenError, IrType};

use crate::emit::BlockLabel;
use crate::r#gen::call;
use crate::instr::{BlockType, Instr, Tag};
use crate::repr::{HeapType, ReprType};

use super::{BodyGenerator, Result};

/// How the dispatch chain re-throws an unmatched exception.
enum Unmatched {
    /// Push the caught value and throw it again (structured encoding and
    /// the shared-handler legacy form).
    ThrowCaught,
    /// `rethrow` targeting the protected region (plain legacy form).
    Rethrow(BlockLabel),
}

pub(crate) fn gen_throw(g: &mut BodyGenerator<'_, '_>, value: &Expr) -> Result<()> {
    if g.ctx.config.traps_instead_of_exceptions {
        // Evaluating the operand is all that remains; the walker appends
        // the trap marker.
        return g.gen_statement(value);
    }
    let throwable = IrType::class(g.ctx.well_known.throwable_class);
    g.gen_with_expected(value, &throwable)?;
    g.emit(Instr::Throw(Tag::Exception));
    Ok(())
}

pub(crate) fn gen_try(
    g: &mut BodyGenerator<'_, '_>,
    body: &Expr,
    catches: &[CatchClause],
    ty: &IrType,
) -> Result<()> {
    if g.ctx.config.traps_instead_of_exceptions {
        // Handlers are unreachable; only the protected region remains.
        return g.gen_branch(body, ty);
    }
    if catches.is_empty() {
        return Err(CodegenError::shape(
            g.emitter.name(),
            "try without catch clauses",
        ));
    }
    if g.ctx.config.legacy_exception_encoding {
        lower_legacy(g, body, catches, ty)
    } else {
        lower_structured(g, body, catches, ty)
    }
}

fn throwable_repr(g: &BodyGenerator<'_, '_>) -> ReprType {
    ReprType::Ref {
        heap: HeapType::Struct(g.ctx.well_known.throwable_class.struct_type()),
        nullable: false,
    }
}

/// An umbrella catch of the root exception class must also see foreign
/// exceptions, normalized through the host tag.
fn needs_host_tag(g: &BodyGenerator<'_, '_>, catches: &[CatchClause]) -> bool {
    catches
        .iter()
        .any(|c| c.exception_class == g.ctx.well_known.throwable_class)
}

fn lower_structured(
    g: &mut BodyGenerator<'_, '_>,
    body: &Expr,
    catches: &[CatchClause],
    ty: &IrType,
) -> Result<()> {
    let with_host = needs_host_tag(g, catches);
    let caught_repr = throwable_repr(g);

    let outer = g.emitter.begin_block(g.block_type(ty));
    let merge = g.emitter.begin_block(BlockType::Value(caught_repr));
    let host_landing = with_host.then(|| {
        g.emitter.begin_block(BlockType::Value(ReprType::Ref {
            heap: HeapType::Extern,
            nullable: true,
        }))
    });

    let mut targets = vec![(Tag::Exception, merge)];
    if let Some(host) = host_landing {
        targets.push((Tag::Host, host));
    }
    g.emitter.begin_try_table(BlockType::Empty, &targets);
    g.gen_branch(body, ty)?;
    g.emitter.br(outer);
    g.emitter.end();
    // Normal completion branched out; every catch branches past this point.
    g.emit(Instr::Unreachable);

    if host_landing.is_some() {
        // A concrete host tag fired: wrap the foreign value into the
        // handler's expected shape and fall through to the shared merge.
        g.emitter.end();
        wrap_host_value(g)?;
    }
    g.emitter.end();

    gen_handler_dispatch(g, catches, outer, ty, Unmatched::ThrowCaught)?;
    g.emitter.end();
    Ok(())
}

fn lower_legacy(
    g: &mut BodyGenerator<'_, '_>,
    body: &Expr,
    catches: &[CatchClause],
    ty: &IrType,
) -> Result<()> {
    let with_host = needs_host_tag(g, catches);
    let outer = g.emitter.begin_block(g.block_type(ty));

    if with_host {
        // Both tag arms have identical handler bodies; only one is emitted
        // and both dispatches branch into it.
        let handler = g.emitter.begin_block(BlockType::Value(throwable_repr(g)));
        g.emitter.begin_try(BlockType::Empty);
        g.gen_branch(body, ty)?;
        g.emitter.br(outer);
        g.emitter.catch_(Tag::Exception);
        g.emitter.br(handler);
        g.emitter.catch_(Tag::Host);
        wrap_host_value(g)?;
        g.emitter.br(handler);
        g.emitter.end();
        g.emit(Instr::Unreachable);
        g.emitter.end();
        gen_handler_dispatch(g, catches, outer, ty, Unmatched::ThrowCaught)?;
    } else {
        let protected = g.emitter.begin_try(BlockType::Empty);
        g.gen_branch(body, ty)?;
        g.emitter.br(outer);
        g.emitter.catch_(Tag::Exception);
        gen_handler_dispatch(g, catches, outer, ty, Unmatched::Rethrow(protected))?;
        g.emitter.end();
    }

    g.emitter.end();
    Ok(())
}

/// The source-level catch dispatch, shared by both encodings.
///
/// Input: the caught (normalized) throwable on the stack. Each clause tests
/// in declaration order; the first match binds its local, runs its handler
/// body, and joins the merge point (or re-throws, for a synthetic
/// finally-catch). An unmatched exception is re-thrown.
fn gen_handler_dispatch(
    g: &mut BodyGenerator<'_, '_>,
    catches: &[CatchClause],
    outer: BlockLabel,
    ty: &IrType,
    unmatched: Unmatched,
) -> Result<()> {
    let caught_repr = throwable_repr(g);
    let caught = g.emitter.alloc_temp(caught_repr);
    g.emit(Instr::LocalSet(caught));

    for clause in catches {
        if clause.exception_class == g.ctx.well_known.throwable_class {
            // Catch-all: always matches; later clauses are dead.
            let slot = g.emitter.define_local(clause.local, caught_repr)?;
            g.emit(Instr::LocalGet(caught));
            g.emit(Instr::LocalSet(slot));
            g.gen_branch(&clause.body, ty)?;
            if clause.rethrow_after {
                rethrow(g, &unmatched, caught);
            } else {
                g.emitter.br(outer);
            }
            return Ok(());
        }

        let handler_struct = clause.exception_class.struct_type();
        g.fragment.struct_types.reference(handler_struct);
        g.emit(Instr::LocalGet(caught));
        g.emit(Instr::RefTest {
            heap: HeapType::Struct(handler_struct),
        });
        g.emitter.begin_if(BlockType::Empty);
        let slot = g.emitter.define_local(
            clause.local,
            ReprType::Ref {
                heap: HeapType::Struct(handler_struct),
                nullable: false,
            },
        )?;
        g.emit(Instr::LocalGet(caught));
        g.emit(Instr::RefCast {
            heap: HeapType::Struct(handler_struct),
            nullable: false,
        });
        g.emit(Instr::LocalSet(slot));
        g.gen_branch(&clause.body, ty)?;
        if clause.rethrow_after {
            rethrow(g, &unmatched, caught);
        } else {
            g.emitter.br(outer);
        }
        g.emitter.end();
    }

    rethrow(g, &unmatched, caught);
    Ok(())
}

fn rethrow(g: &mut BodyGenerator<'_, '_>, unmatched: &Unmatched, caught: u32) {
    match unmatched {
        Unmatched::ThrowCaught => {
            g.emit(Instr::LocalGet(caught));
            g.emit(Instr::Throw(Tag::Exception));
        }
        Unmatched::Rethrow(label) => {
            let depth = g.emitter.depth_of(*label);
            g.emit(Instr::Rethrow(depth));
        }
    }
}

/// Normalize a foreign exception payload into the host-exception wrapper.
/// Shared by both encodings; input is the external reference on the stack,
/// output the wrapper instance (a throwable).
fn wrap_host_value(g: &mut BodyGenerator<'_, '_>) -> Result<()> {
    let wk = g.ctx.well_known;
    let tmp = g.emitter.alloc_temp(ReprType::Ref {
        heap: HeapType::Extern,
        nullable: true,
    });
    g.emit(Instr::LocalSet(tmp));
    call::gen_allocate(g, wk.host_exception_class)?;
    g.emit(Instr::LocalGet(tmp));
    g.fragment.functions.reference(wk.host_exception_ctor);
    g.emit(Instr::Call(wk.host_exception_ctor));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::r#gen::testgen::emit_with;
    use crate::metadata::testutil::TestProgram;
    use opal_core::ir::LocalId;
    use opal_core::{CodegenConfig, DeclKey};

    /// Root hierarchy plus two sibling exception classes.
    fn exception_program() -> (TestProgram, DeclKey, DeclKey) {
        let mut prog = TestProgram::new();
        let root = prog.add_class("opal.Any", None, &[]);
        let throwable = prog.add_class("opal.Throwable", Some(root), &[]);
        let e1 = prog.add_class("demo.E1", Some(throwable), &[]);
        let e2 = prog.add_class("demo.E2", Some(throwable), &[]);
        (prog, e1, e2)
    }

    fn int_const(v: i32) -> Expr {
        Expr::IntConst {
            value: v as i64,
            ty: IrType::Int32,
        }
    }

    fn two_clause_try(e1: DeclKey, e2: DeclKey) -> Expr {
        Expr::Try {
            body: Box::new(int_const(1)),
            catches: vec![
                CatchClause {
                    exception_class: e1,
                    local: LocalId(10),
                    body: int_const(2),
                    rethrow_after: false,
                },
                CatchClause {
                    exception_class: e2,
                    local: LocalId(11),
                    body: int_const(3),
                    rethrow_after: false,
                },
            ],
            ty: IrType::Int32,
        }
    }

    fn structured() -> CodegenConfig {
        CodegenConfig::default()
    }

    fn legacy() -> CodegenConfig {
        CodegenConfig {
            legacy_exception_encoding: true,
            ..CodegenConfig::default()
        }
    }

    /// Clause tests appear in declaration order, and the unmatched path
    /// re-throws after both.
    fn assert_dispatch_order(instrs: &[Instr], e1: DeclKey, e2: DeclKey) {
        let tests: Vec<_> = instrs
            .iter()
            .filter_map(|i| match i {
                Instr::RefTest { heap: HeapType::Struct(k) } => Some(*k),
                _ => None,
            })
            .collect();
        assert_eq!(tests, vec![e1.struct_type(), e2.struct_type()]);

        let last_test = instrs
            .iter()
            .rposition(|i| matches!(i, Instr::RefTest { .. }))
            .unwrap();
        assert!(
            instrs[last_test..]
                .iter()
                .any(|i| matches!(i, Instr::Throw(_) | Instr::Rethrow(_))),
            "unmatched exceptions must re-throw after the last clause"
        );
    }

    #[test]
    fn structured_encoding_dispatch_order() {
        let (prog, e1, e2) = exception_program();
        let e = two_clause_try(e1, e2);
        let instrs = emit_with(&prog, structured(), |g| g.r#gen(&e)).unwrap();

        assert!(instrs.iter().any(|i| matches!(i, Instr::TryTable { .. })));
        assert_dispatch_order(&instrs, e1, e2);
        // Normal completion and both handlers join the merge block: three
        // branches carrying the result.
        let breaks = instrs.iter().filter(|i| matches!(i, Instr::Br(_))).count();
        assert!(breaks >= 3, "body and every handler must rejoin the merge");
    }

    #[test]
    fn legacy_encoding_dispatch_order() {
        let (prog, e1, e2) = exception_program();
        let e = two_clause_try(e1, e2);
        let instrs = emit_with(&prog, legacy(), |g| g.r#gen(&e)).unwrap();

        assert!(instrs.iter().any(|i| matches!(i, Instr::Try(_))));
        assert!(instrs.iter().any(|i| matches!(i, Instr::Catch(Tag::Exception))));
        assert!(!instrs.iter().any(|i| matches!(i, Instr::TryTable { .. })));
        assert_dispatch_order(&instrs, e1, e2);
        // Plain legacy form re-throws via rethrow.
        assert!(instrs.iter().any(|i| matches!(i, Instr::Rethrow(0))));
    }

    #[test]
    fn encodings_agree_on_handler_selection() {
        let (prog, e1, e2) = exception_program();
        let e = two_clause_try(e1, e2);
        let s = emit_with(&prog, structured(), |g| g.r#gen(&e)).unwrap();
        let l = emit_with(&prog, legacy(), |g| g.r#gen(&e)).unwrap();

        let order = |instrs: &[Instr]| {
            instrs
                .iter()
                .filter_map(|i| match i {
                    Instr::RefTest { heap: HeapType::Struct(k) } => Some(*k),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(order(&s), order(&l));
    }

    #[test]
    fn trap_mode_degrades_to_protected_region() {
        let (prog, e1, e2) = exception_program();
        let e = two_clause_try(e1, e2);
        let config = CodegenConfig {
            traps_instead_of_exceptions: true,
            ..CodegenConfig::default()
        };
        let instrs = emit_with(&prog, config, |g| g.r#gen(&e)).unwrap();
        // Just the protected region's code; the handlers are unreachable.
        assert_eq!(instrs, vec![Instr::I32Const(1)]);
    }

    #[test]
    fn umbrella_catch_installs_the_host_tag() {
        let (mut prog, _, _) = exception_program();
        let host = prog.add_class(
            "opal.HostException",
            Some(DeclKey::class("opal.Throwable")),
            &[],
        );
        let ctor = crate::metadata::testutil::method(
            host,
            "opal.HostException",
            "<init>",
            opal_core::ir::FnFlags::CONSTRUCTOR,
            &[IrType::string()],
            IrType::class(host),
            Some(Expr::Block {
                statements: vec![],
                ty: IrType::Unit,
            }),
        );
        prog.add_function(ctor);

        let throwable = DeclKey::class("opal.Throwable");
        let umbrella = Expr::Try {
            body: Box::new(int_const(1)),
            catches: vec![CatchClause {
                exception_class: throwable,
                local: LocalId(10),
                body: int_const(2),
                rethrow_after: false,
            }],
            ty: IrType::Int32,
        };

        let s = emit_with(&prog, structured(), |g| g.r#gen(&umbrella)).unwrap();
        let table = s
            .iter()
            .find_map(|i| match i {
                Instr::TryTable { catches, .. } => Some(catches.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].tag, Tag::Exception);
        assert_eq!(table[1].tag, Tag::Host);
        // The foreign value is normalized into the wrapper class.
        assert!(s.contains(&Instr::StructNew(host.struct_type())));

        // Legacy: two tag dispatches, one shared handler body.
        let l = emit_with(&prog, legacy(), |g| g.r#gen(&umbrella)).unwrap();
        let catch_count = l
            .iter()
            .filter(|i| matches!(i, Instr::Catch(_)))
            .count();
        assert_eq!(catch_count, 2);
        // The handler body (the catch-all binding) appears exactly once.
        let handler_consts = l.iter().filter(|i| **i == Instr::I32Const(2)).count();
        assert_eq!(handler_consts, 1);
    }

    #[test]
    fn synthetic_finally_catch_rethrows_after_its_body() {
        let (prog, _, _) = exception_program();
        let throwable = DeclKey::class("opal.Throwable");
        let host_needed = Expr::Try {
            body: Box::new(Expr::Block {
                statements: vec![],
                ty: IrType::Unit,
            }),
            catches: vec![CatchClause {
                exception_class: throwable,
                local: LocalId(10),
                body: Expr::Block {
                    statements: vec![],
                    ty: IrType::Unit,
                },
                rethrow_after: true,
            }],
            ty: IrType::Unit,
        };
        // Needs the host wrapper for the umbrella; reuse an intolerant
        // program without it by checking the throw is present.
        let mut prog = prog;
        let host = prog.add_class("opal.HostException", Some(throwable), &[]);
        let ctor = crate::metadata::testutil::method(
            host,
            "opal.HostException",
            "<init>",
            opal_core::ir::FnFlags::CONSTRUCTOR,
            &[IrType::string()],
            IrType::class(host),
            Some(Expr::Block {
                statements: vec![],
                ty: IrType::Unit,
            }),
        );
        prog.add_function(ctor);

        let instrs = emit_with(&prog, structured(), |g| g.r#gen(&host_needed)).unwrap();
        // The finally-catch runs its body, then re-throws instead of
        // joining the merge.
        assert!(instrs.iter().any(|i| matches!(i, Instr::Throw(Tag::Exception))));
    }

    #[test]
    fn throw_targets_the_exception_tag() {
        let (mut prog, _, _) = exception_program();
        let throwable = DeclKey::class("opal.Throwable");
        let ctor_key = DeclKey::function("opal.Throwable.<init>");
        let ctor = crate::metadata::testutil::method(
            throwable,
            "opal.Throwable",
            "<init>",
            opal_core::ir::FnFlags::CONSTRUCTOR,
            &[],
            IrType::class(throwable),
            Some(Expr::Block {
                statements: vec![],
                ty: IrType::Unit,
            }),
        );
        prog.add_function(ctor);

        let e = Expr::Throw {
            value: Box::new(Expr::New {
                class: throwable,
                ctor: ctor_key,
                args: vec![],
                ty: IrType::class(throwable),
            }),
        };
        let instrs = emit_with(&prog, structured(), |g| g.r#gen(&e)).unwrap();
        let throw_at = instrs
            .iter()
            .position(|i| *i == Instr::Throw(Tag::Exception))
            .unwrap();
        // The never-typed marker follows the throw.
        assert_eq!(instrs.get(throw_at + 1), Some(&Instr::Unreachable));
    }
}
