//! End-to-end backend tests through the public API.
//!
//! Each test hand-builds a small typed-IR program, compiles it, and checks
//! the linked module's observable shape.

use pretty_assertions::assert_eq;

use opal::ir::{
    CatchClause, ClassDecl, ClassFlags, CompilationUnit, Decl, Expr, FnFlags, FunctionDecl,
    InstanceField, LocalId, Param, StaticFieldDecl,
};
use opal::{CodegenConfig, CodegenError, DeclKey, IrType, WellKnown, compile};
use opal_codegen::fragment::CompiledFunction;
use opal_codegen::instr::{Instr, Tag};
use opal_codegen::repr::HeapType;

// ============================================================================
// IR builders
// ============================================================================

fn well_known() -> WellKnown {
    WellKnown {
        root_class: DeclKey::class("opal.Any"),
        throwable_class: DeclKey::class("opal.Throwable"),
        host_exception_class: DeclKey::class("opal.HostException"),
        host_exception_ctor: DeclKey::function("opal.HostException.<init>"),
    }
}

fn unit(name: &str, decls: Vec<Decl>) -> CompilationUnit {
    CompilationUnit {
        name: name.to_string(),
        decls,
    }
}

fn class(
    name: &str,
    superclass: Option<DeclKey>,
    interfaces: Vec<DeclKey>,
    fields: Vec<InstanceField>,
    methods: Vec<FunctionDecl>,
) -> Decl {
    Decl::Class(ClassDecl {
        key: DeclKey::class(name),
        name: name.to_string(),
        flags: ClassFlags::empty(),
        superclass,
        interfaces,
        fields,
        members: methods.into_iter().map(Decl::Function).collect(),
        array_element: None,
    })
}

fn array_class(name: &str, elem: IrType) -> Decl {
    Decl::Class(ClassDecl {
        key: DeclKey::class(name),
        name: name.to_string(),
        flags: ClassFlags::FIXED_ARRAY,
        superclass: None,
        interfaces: vec![],
        fields: vec![],
        members: vec![],
        array_element: Some(elem),
    })
}

fn method(owner: &str, simple: &str, flags: FnFlags, body: Option<Expr>) -> FunctionDecl {
    let owner_key = DeclKey::class(owner);
    FunctionDecl {
        key: DeclKey::function(&format!("{owner}.{simple}")),
        name: format!("{owner}.{simple}"),
        simple_name: simple.to_string(),
        owner: Some(owner_key),
        params: vec![Param {
            local: LocalId(0),
            name: "this".to_string(),
            ty: IrType::class(owner_key),
        }],
        result: IrType::Unit,
        body,
        flags,
        export_name: None,
        import: None,
    }
}

fn function(name: &str, result: IrType, body: Expr) -> FunctionDecl {
    FunctionDecl {
        key: DeclKey::function(name),
        name: name.to_string(),
        simple_name: name.rsplit('.').next().unwrap_or(name).to_string(),
        owner: None,
        params: vec![],
        result,
        body: Some(body),
        flags: FnFlags::empty(),
        export_name: None,
        import: None,
    }
}

fn unit_block() -> Expr {
    Expr::Block {
        statements: vec![],
        ty: IrType::Unit,
    }
}

fn int(v: i64) -> Expr {
    Expr::IntConst {
        value: v,
        ty: IrType::Int32,
    }
}

fn body_of(module: &opal::LinkedModule, key: DeclKey) -> &[Instr] {
    match module.functions.get(key) {
        Some(CompiledFunction::Defined(b)) => &b.instrs,
        other => panic!("no body for {key}: {other:?}"),
    }
}

// ============================================================================
// Vtable layout stability
// ============================================================================

#[test]
fn vtable_slots_stable_under_inheritance() {
    let base = DeclKey::class("demo.Base");
    let sub = DeclKey::class("demo.Sub");
    let decls = vec![
        class(
            "demo.Base",
            None,
            vec![],
            vec![],
            vec![
                method("demo.Base", "first", FnFlags::OPEN, Some(unit_block())),
                method("demo.Base", "second", FnFlags::OPEN, Some(unit_block())),
            ],
        ),
        class(
            "demo.Sub",
            Some(base),
            vec![],
            vec![],
            vec![
                method("demo.Sub", "second", FnFlags::OPEN, Some(unit_block())),
                method("demo.Sub", "third", FnFlags::OPEN, Some(unit_block())),
            ],
        ),
    ];
    let module = compile(
        &[unit("demo.op", decls)],
        CodegenConfig::default(),
        well_known(),
    )
    .unwrap();

    let base_vt = module.vtable_globals.get(base.vtable_global()).unwrap();
    let sub_vt = module.vtable_globals.get(sub.vtable_global()).unwrap();

    assert_eq!(base_vt.entries.len(), 2);
    assert_eq!(sub_vt.entries.len(), 3);
    // Inherited, not overridden: same implementation at the same slot.
    assert_eq!(sub_vt.entries[0], base_vt.entries[0]);
    // Overridden: same slot, different implementation.
    assert_ne!(sub_vt.entries[1], base_vt.entries[1]);
    assert_eq!(
        sub_vt.entries[1],
        Some(DeclKey::function("demo.Sub.second"))
    );
}

// ============================================================================
// Statement discipline and the never type
// ============================================================================

#[test]
fn statement_context_is_stack_neutral() {
    let decls = vec![Decl::Function(function(
        "demo.f",
        IrType::Unit,
        Expr::Block {
            statements: vec![int(1), int(2)],
            ty: IrType::Unit,
        },
    ))];
    let module = compile(
        &[unit("demo.op", decls)],
        CodegenConfig::default(),
        well_known(),
    )
    .unwrap();

    assert_eq!(
        body_of(&module, DeclKey::function("demo.f")),
        &[
            Instr::I32Const(1),
            Instr::Drop,
            Instr::I32Const(2),
            Instr::Drop,
        ]
    );
}

#[test]
fn never_typed_tail_is_unreachable_marked() {
    // A function whose body ends in a return: the fallthrough is proven
    // impossible by the type system, so the verifier gets a marker.
    let decls = vec![Decl::Function(function(
        "demo.f",
        IrType::Int32,
        Expr::Block {
            statements: vec![Expr::Return {
                value: Some(Box::new(int(7))),
            }],
            ty: IrType::Unit,
        },
    ))];
    let module = compile(
        &[unit("demo.op", decls)],
        CodegenConfig::default(),
        well_known(),
    )
    .unwrap();

    let instrs = body_of(&module, DeclKey::function("demo.f"));
    let ret = instrs.iter().position(|i| *i == Instr::Return).unwrap();
    // The marker follows the never-typed return; nothing else does.
    assert!(
        instrs[ret + 1..]
            .iter()
            .all(|i| *i == Instr::Unreachable)
    );
    assert_eq!(instrs.last(), Some(&Instr::Unreachable));
}

// ============================================================================
// Constant-array folding
// ============================================================================

#[test]
fn literal_array_folds_and_mixed_array_does_not() {
    let arr = DeclKey::class("demo.IntArray");
    let constant = Expr::NewArray {
        class: arr,
        elems: vec![int(1), int(2), int(3)],
        ty: IrType::array(arr),
    };
    let mixed = Expr::NewArray {
        class: arr,
        elems: vec![
            int(1),
            Expr::GetLocal {
                local: LocalId(0),
                ty: IrType::Int32,
            },
            int(3),
        ],
        ty: IrType::array(arr),
    };
    let decls = vec![
        array_class("demo.IntArray", IrType::Int32),
        Decl::Function(function(
            "demo.f",
            IrType::Unit,
            Expr::Block {
                statements: vec![
                    Expr::Let {
                        local: LocalId(0),
                        var_ty: IrType::Int32,
                        init: Some(Box::new(int(9))),
                    },
                    constant,
                    mixed,
                ],
                ty: IrType::Unit,
            },
        )),
    ];
    let module = compile(
        &[unit("demo.op", decls)],
        CodegenConfig::default(),
        well_known(),
    )
    .unwrap();

    let instrs = body_of(&module, DeclKey::function("demo.f"));

    // [1,2,3]: one data segment plus one bulk construction, no pushes.
    let folded = instrs
        .iter()
        .filter(|i| matches!(i, Instr::ArrayNewData { .. }))
        .count();
    assert_eq!(folded, 1);
    assert_eq!(module.data.len(), 1);
    assert_eq!(
        module.data.segments()[0].bytes,
        vec![1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]
    );

    // [1, x, 3]: three individual pushes plus a fixed-arity construction.
    let fixed_at = instrs
        .iter()
        .position(|i| matches!(i, Instr::ArrayNewFixed { len: 3, .. }))
        .unwrap();
    assert_eq!(instrs[fixed_at - 3..fixed_at]
        .iter()
        .filter(|i| matches!(i, Instr::I32Const(_) | Instr::LocalGet(_)))
        .count(), 3);
}

// ============================================================================
// Exception encodings
// ============================================================================

fn try_catch_program() -> Vec<Decl> {
    let throwable = DeclKey::class("opal.Throwable");
    let e1 = DeclKey::class("demo.E1");
    let e2 = DeclKey::class("demo.E2");
    vec![
        class("opal.Any", None, vec![], vec![], vec![]),
        class("opal.Throwable", Some(DeclKey::class("opal.Any")), vec![], vec![], vec![]),
        class("demo.E1", Some(throwable), vec![], vec![], vec![]),
        class("demo.E2", Some(throwable), vec![], vec![], vec![]),
        Decl::Function(function(
            "demo.f",
            IrType::Int32,
            Expr::Block {
                statements: vec![Expr::Return {
                    value: Some(Box::new(Expr::Try {
                        body: Box::new(int(1)),
                        catches: vec![
                            CatchClause {
                                exception_class: e1,
                                local: LocalId(0),
                                body: int(2),
                                rethrow_after: false,
                            },
                            CatchClause {
                                exception_class: e2,
                                local: LocalId(1),
                                body: int(3),
                                rethrow_after: false,
                            },
                        ],
                        ty: IrType::Int32,
                    })),
                }],
                ty: IrType::Unit,
            },
        )),
    ]
}

#[test]
fn both_encodings_select_handlers_in_order() {
    let e1 = DeclKey::class("demo.E1");
    let e2 = DeclKey::class("demo.E2");

    let test_order = |config: CodegenConfig| {
        let module = compile(&[unit("demo.op", try_catch_program())], config, well_known())
            .unwrap();
        let instrs = body_of(&module, DeclKey::function("demo.f")).to_vec();
        let tests: Vec<_> = instrs
            .iter()
            .filter_map(|i| match i {
                Instr::RefTest {
                    heap: HeapType::Struct(k),
                } => Some(*k),
                _ => None,
            })
            .collect();
        // B before C, then the implicit re-throw.
        assert_eq!(tests, vec![e1.struct_type(), e2.struct_type()]);
        let last_test = instrs
            .iter()
            .rposition(|i| matches!(i, Instr::RefTest { .. }))
            .unwrap();
        assert!(
            instrs[last_test..]
                .iter()
                .any(|i| matches!(i, Instr::Throw(Tag::Exception) | Instr::Rethrow(_)))
        );
        // The merge block is rejoined from the body and both handlers.
        assert!(instrs.iter().filter(|i| matches!(i, Instr::Br(_))).count() >= 3);
        instrs
    };

    let structured = test_order(CodegenConfig::default());
    assert!(structured.iter().any(|i| matches!(i, Instr::TryTable { .. })));

    let legacy = test_order(CodegenConfig {
        legacy_exception_encoding: true,
        ..CodegenConfig::default()
    });
    assert!(legacy.iter().any(|i| matches!(i, Instr::Try(_))));
    assert!(!legacy.iter().any(|i| matches!(i, Instr::TryTable { .. })));
}

#[test]
fn trap_mode_compiles_try_to_its_body() {
    let config = CodegenConfig {
        traps_instead_of_exceptions: true,
        ..CodegenConfig::default()
    };
    let module = compile(&[unit("demo.op", try_catch_program())], config, well_known()).unwrap();
    let instrs = body_of(&module, DeclKey::function("demo.f"));
    assert!(!instrs.iter().any(|i| {
        matches!(
            i,
            Instr::Try(_) | Instr::TryTable { .. } | Instr::Catch(_) | Instr::Throw(_)
        )
    }));
    assert!(module.tags.is_empty());
}

// ============================================================================
// Interface dispatch
// ============================================================================

#[test]
fn implementorless_interface_call_is_a_trap() {
    let iface_key = DeclKey::class("demo.Ghost");
    let iface_method = method("demo.Ghost", "boo", FnFlags::ABSTRACT, None);
    let callee = iface_method.key;
    let iface = ClassDecl {
        key: iface_key,
        name: "demo.Ghost".to_string(),
        flags: ClassFlags::INTERFACE,
        superclass: None,
        interfaces: vec![],
        fields: vec![],
        members: vec![Decl::Function(iface_method)],
        array_element: None,
    };

    let decls = vec![
        class("opal.Any", None, vec![], vec![], vec![]),
        Decl::Class(iface),
        Decl::Function(function(
            "demo.f",
            IrType::Unit,
            Expr::Block {
                statements: vec![Expr::Call {
                    callee,
                    receiver: Some(Box::new(Expr::Null {
                        ty: IrType::nullable_class(iface_key),
                    })),
                    args: vec![],
                    is_super: false,
                    ty: IrType::Unit,
                }],
                ty: IrType::Unit,
            },
        )),
    ];
    let module = compile(
        &[unit("demo.op", decls)],
        CodegenConfig::default(),
        well_known(),
    )
    .unwrap();

    let instrs = body_of(&module, DeclKey::function("demo.f"));
    assert!(instrs.contains(&Instr::Unreachable));
    // Never a slot read.
    assert!(!instrs.iter().any(|i| matches!(i, Instr::ArrayGet { .. })));
    assert!(!instrs.iter().any(|i| matches!(i, Instr::CallRef(_))));
}

// ============================================================================
// Forward references
// ============================================================================

#[test]
fn forward_reference_across_units_resolves() {
    let later = DeclKey::function("b.g");
    let caller = unit(
        "a.op",
        vec![Decl::Function(function(
            "a.f",
            IrType::Unit,
            Expr::Block {
                statements: vec![Expr::Call {
                    callee: later,
                    receiver: None,
                    args: vec![],
                    is_super: false,
                    ty: IrType::Unit,
                }],
                ty: IrType::Unit,
            },
        ))],
    );
    let definer = unit(
        "b.op",
        vec![Decl::Function(function("b.g", IrType::Unit, unit_block()))],
    );

    let module = compile(&[caller, definer], CodegenConfig::default(), well_known()).unwrap();
    assert!(module.functions.get(later).is_some());
    assert!(
        body_of(&module, DeclKey::function("a.f")).contains(&Instr::Call(later))
    );
}

#[test]
fn unresolved_reference_fails_identifying_the_key() {
    // An intrinsic marker is never generated; calling it leaves the symbol
    // unbound at final assembly.
    let mut intrinsic = function("demo.magic", IrType::Unit, unit_block());
    intrinsic.flags = FnFlags::INTRINSIC;
    let key = intrinsic.key;

    let decls = vec![
        Decl::Function(intrinsic),
        Decl::Function(function(
            "demo.f",
            IrType::Unit,
            Expr::Block {
                statements: vec![Expr::Call {
                    callee: key,
                    receiver: None,
                    args: vec![],
                    is_super: false,
                    ty: IrType::Unit,
                }],
                ty: IrType::Unit,
            },
        )),
    ];
    let err = compile(
        &[unit("demo.op", decls)],
        CodegenConfig::default(),
        well_known(),
    )
    .unwrap_err();

    match err {
        CodegenError::Unresolved { key: k, .. } => assert_eq!(k, key),
        other => panic!("expected unresolved symbol, got {other}"),
    }
}

// ============================================================================
// Statics, exports, and the start routine
// ============================================================================

#[test]
fn deferred_static_runs_at_startup() {
    let field = DeclKey::field("demo.banner");
    let limit = DeclKey::field("demo.limit");
    let decls = vec![
        Decl::StaticField(StaticFieldDecl {
            key: field,
            name: "demo.banner".to_string(),
            ty: IrType::string(),
            init: Some(Expr::StringConst {
                value: "hello".to_string(),
            }),
        }),
        Decl::StaticField(StaticFieldDecl {
            key: limit,
            name: "demo.limit".to_string(),
            ty: IrType::Int32,
            init: Some(int(10)),
        }),
    ];
    let module = compile(
        &[unit("demo.op", decls)],
        CodegenConfig::default(),
        well_known(),
    )
    .unwrap();

    // The constant inlines; the string defers to the start routine.
    assert_eq!(
        module.globals.get(limit).unwrap().init,
        vec![Instr::I32Const(10)]
    );
    let start = module.start.as_ref().unwrap();
    assert!(start.instrs.contains(&Instr::GlobalSet(field)));
    assert_eq!(module.strings.len(), 1);
    let entry = &module.strings.entries()[0];
    assert!(entry.pool_id.is_bound());
}

#[test]
fn exported_function_surfaces_in_the_export_table() {
    let mut f = function("demo.main", IrType::Unit, unit_block());
    f.flags = FnFlags::EXPORTED;
    f.export_name = Some("main".to_string());
    let key = f.key;

    let module = compile(
        &[unit("demo.op", vec![Decl::Function(f)])],
        CodegenConfig::default(),
        well_known(),
    )
    .unwrap();

    assert_eq!(module.exports.len(), 1);
    assert_eq!(module.exports[0].name, "main");
    assert_eq!(module.exports[0].function, key);
}

#[test]
fn descriptors_record_the_class_shape() {
    let base = DeclKey::class("demo.Base");
    let decls = vec![
        class(
            "demo.Base",
            None,
            vec![],
            vec![InstanceField {
                key: DeclKey::field("demo.Base.x"),
                name: "demo.Base.x".to_string(),
                ty: IrType::Int32,
                mutable: true,
            }],
            vec![],
        ),
        class("demo.Sub", Some(base), vec![], vec![], vec![]),
    ];
    let module = compile(
        &[unit("demo.op", decls)],
        CodegenConfig::default(),
        well_known(),
    )
    .unwrap();

    assert_eq!(module.descriptors.len(), 2);
    let sub = &module.descriptors[1];
    assert_eq!(sub.superclass, Some(base));
    assert_eq!(sub.field_count, 1);
    assert!(module.strings.get(sub.name).is_some());
}
