//! The final merge step.
//!
//! Single-threaded by necessity: it must produce one deterministic total
//! ordering from many fragments' partial orderings. Fragments are absorbed
//! in unit order; string and data pools re-deduplicate across fragments;
//! deferred static-field initializers concatenate into one start-up routine;
//! and every referenced symbol must be bound by the end, otherwise linking
//! fails identifying the unresolved key. There is no partial output on
//! failure.

use tracing::debug;

use opal_core::{CodegenError, DeclKey};

use crate::context::BackendContext;
use crate::decl;
use crate::fragment::{
    ArrayTypeDecl, CompiledFunction, DataPool, Export, FuncType, FunctionBody, GlobalDecl,
    ItableValue, ModuleFragment, StringPool, StructTypeDecl, TypeDescriptor, VtableValue,
};
use crate::instr::{Instr, Tag};
use crate::repr::{FieldStorage, HeapType, ReprType};
use crate::symbol::SymbolTable;

type Result<T> = std::result::Result<T, CodegenError>;

/// One module-level exception tag declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct TagDecl {
    pub tag: Tag,
    pub payload: ReprType,
}

/// The merged, fully-bound module handed to the downstream assembler.
///
/// The assembler owns binary serialization: it turns keys into final
/// indices and concatenates sections; nothing here is byte-encoded.
#[derive(Debug, Default)]
pub struct LinkedModule {
    pub functions: SymbolTable<CompiledFunction>,
    pub func_types: SymbolTable<FuncType>,
    pub struct_types: SymbolTable<StructTypeDecl>,
    pub array_types: SymbolTable<ArrayTypeDecl>,
    pub vtable_types: SymbolTable<StructTypeDecl>,
    pub itable_types: SymbolTable<StructTypeDecl>,
    pub globals: SymbolTable<GlobalDecl>,
    pub vtable_globals: SymbolTable<VtableValue>,
    pub itable_globals: SymbolTable<ItableValue>,
    pub exports: Vec<Export>,
    pub strings: StringPool,
    pub data: DataPool,
    pub descriptors: Vec<TypeDescriptor>,
    /// Module start-up routine running the deferred field initializers.
    pub start: Option<FunctionBody>,
    pub tags: Vec<TagDecl>,
}

/// Merge all fragments into one module.
pub fn link(ctx: &BackendContext<'_>, fragments: Vec<ModuleFragment>) -> Result<LinkedModule> {
    let mut module = LinkedModule::default();
    let describe = |key: DeclKey| ctx.graph.name_of(key);

    let mut start_locals: Vec<ReprType> = Vec::new();
    let mut start_instrs: Vec<Instr> = Vec::new();

    for fragment in fragments {
        debug!(unit = %fragment.unit_name, "merging fragment");
        module.functions.merge(fragment.functions, describe)?;
        module
            .func_types
            .merge_confirming(fragment.func_types, describe)?;
        module.struct_types.merge(fragment.struct_types, describe)?;
        module.array_types.merge(fragment.array_types, describe)?;
        module.vtable_types.merge(fragment.vtable_types, describe)?;
        module.itable_types.merge(fragment.itable_types, describe)?;
        module.globals.merge(fragment.globals, describe)?;
        module
            .vtable_globals
            .merge(fragment.vtable_globals, describe)?;
        module
            .itable_globals
            .merge(fragment.itable_globals, describe)?;
        module.exports.extend(fragment.exports);
        module.strings.merge(fragment.strings);
        module.data.merge(fragment.data);
        module.descriptors.extend(fragment.descriptors);

        // Deferred initializers run in unit order, then declaration order.
        for init in fragment.deferred_inits {
            let offset = start_locals.len() as u32;
            start_locals.extend(init.locals.iter().copied());
            start_instrs.extend(init.instrs.into_iter().map(|i| shift_locals(i, offset)));
            module.globals.reference(init.field);
            start_instrs.push(Instr::GlobalSet(init.field));
        }
    }

    // The well-known interface-table array type is owned by the link step;
    // fragments only reference it.
    module.array_types.define(
        DeclKey::ITABLE_ARRAY,
        "itable-array",
        ArrayTypeDecl {
            elem: FieldStorage::Ref {
                heap: HeapType::Any,
                nullable: true,
            },
            mutable: false,
        },
    )?;

    if !start_instrs.is_empty() {
        let start_type = FuncType {
            params: Vec::new(),
            result: None,
        };
        let sig = decl::func_type_key(&start_type);
        module
            .func_types
            .define_or_confirm(sig, "module-start", start_type)?;
        module.start = Some(FunctionBody {
            signature: sig,
            locals: start_locals,
            param_count: 0,
            instrs: start_instrs,
        });
    }

    if !ctx.config.traps_instead_of_exceptions {
        module.tags = vec![
            TagDecl {
                tag: Tag::Exception,
                payload: ReprType::Ref {
                    heap: HeapType::Struct(ctx.well_known.throwable_class.struct_type()),
                    nullable: false,
                },
            },
            TagDecl {
                tag: Tag::Host,
                payload: ReprType::Ref {
                    heap: HeapType::Extern,
                    nullable: true,
                },
            },
        ];
    }

    module.strings.assign_ids()?;
    verify_bound(ctx, &module)?;
    debug!(
        functions = module.functions.defined_len(),
        strings = module.strings.len(),
        "link complete"
    );
    Ok(module)
}

/// Every symbol referenced anywhere must be bound at final assembly.
fn verify_bound(ctx: &BackendContext<'_>, module: &LinkedModule) -> Result<()> {
    let check = |unbound: Option<DeclKey>| -> Result<()> {
        match unbound {
            Some(key) => Err(CodegenError::unresolved(key, ctx.graph.name_of(key))),
            None => Ok(()),
        }
    };
    check(module.functions.unbound_keys().next())?;
    check(module.func_types.unbound_keys().next())?;
    check(module.struct_types.unbound_keys().next())?;
    check(module.array_types.unbound_keys().next())?;
    check(module.vtable_types.unbound_keys().next())?;
    check(module.itable_types.unbound_keys().next())?;
    check(module.globals.unbound_keys().next())?;
    check(module.vtable_globals.unbound_keys().next())?;
    check(module.itable_globals.unbound_keys().next())?;
    Ok(())
}

/// Re-home an initializer's scratch locals into the start routine's frame.
fn shift_locals(instr: Instr, offset: u32) -> Instr {
    match instr {
        Instr::LocalGet(n) => Instr::LocalGet(n + offset),
        Instr::LocalSet(n) => Instr::LocalSet(n + offset),
        Instr::LocalTee(n) => Instr::LocalTee(n + offset),
        other => other,
    }
}
