//! The declaration generator.
//!
//! Visits one compilation unit's top-level declarations and populates its
//! [`ModuleFragment`]: function signatures and bodies, struct and array type
//! declarations, vtable/itable types and values, static-field globals, export
//! records, and type descriptors. Function bodies are produced by the body
//! generator ([`crate::r#gen::BodyGenerator`]).

mod vtable;

use tracing::debug;

use opal_core::ir::{ClassDecl, ClassFlags, CompilationUnit, Decl, FnFlags, FunctionDecl, StaticFieldDecl};
use opal_core::{CodegenError, DeclKey, IrType};

use crate::context::BackendContext;
use crate::fragment::{
    ArrayTypeDecl, CompiledFunction, Export, FuncType, FunctionBody, GlobalDecl, ImportedFunction,
    ModuleFragment, StructField, StructTypeDecl, TypeDescriptor,
};
use crate::r#gen::BodyGenerator;
use crate::instr::Instr;
use crate::metadata::ClassMetadata;
use crate::repr::{self, FieldStorage, HeapType, ReprType};

type Result<T> = std::result::Result<T, CodegenError>;

/// Generates top-level declarations into a fragment.
pub struct DeclGenerator<'a, 'ctx> {
    ctx: &'a BackendContext<'ctx>,
    fragment: &'a mut ModuleFragment,
}

/// Generate one unit's fragment.
pub fn generate_unit(
    ctx: &BackendContext<'_>,
    unit: &CompilationUnit,
) -> Result<ModuleFragment> {
    debug!(unit = %unit.name, "generating fragment");
    let mut fragment = ModuleFragment::new(&unit.name);
    let mut generator = DeclGenerator {
        ctx,
        fragment: &mut fragment,
    };
    for decl in &unit.decls {
        generator.generate(decl)?;
    }
    Ok(fragment)
}

impl<'a, 'ctx> DeclGenerator<'a, 'ctx> {
    fn generate(&mut self, decl: &Decl) -> Result<()> {
        match decl {
            Decl::Function(f) => self.generate_function(f),
            Decl::Class(c) => self.generate_class(c),
            Decl::StaticField(f) => self.generate_static_field(f),
        }
    }

    // ==========================================================================
    // Functions
    // ==========================================================================

    fn generate_function(&mut self, f: &FunctionDecl) -> Result<()> {
        // Abstract declarations, intrinsic markers and bridge overrides
        // produce no code of their own.
        if f.flags.contains(FnFlags::ABSTRACT) && f.body.is_none() {
            return Ok(());
        }
        if f.flags.intersects(FnFlags::INTRINSIC | FnFlags::BRIDGE) {
            return Ok(());
        }

        let (sig_key, func_type) = function_type(self.ctx, f);
        self.fragment
            .func_types
            .define_or_confirm(sig_key, &f.name, func_type.clone())?;

        if f.flags.contains(FnFlags::IMPORTED) {
            let (module, name) = f.import.clone().ok_or_else(|| {
                CodegenError::shape(&f.name, "imported function without an import record")
            })?;
            self.fragment.functions.define(
                f.key,
                &f.name,
                CompiledFunction::Imported(ImportedFunction {
                    signature: sig_key,
                    module,
                    name,
                }),
            )?;
            return Ok(());
        }

        let body = f
            .body
            .as_ref()
            .ok_or_else(|| CodegenError::shape(&f.name, "missing function body"))?;

        // Fresh per-function codegen context, locals seeded by parameters.
        let mut params = Vec::with_capacity(f.params.len());
        for p in &f.params {
            let repr = repr::value_repr(&p.ty, self.ctx.graph).ok_or_else(|| {
                CodegenError::shape(&f.name, format!("parameter '{}' of unit type", p.name))
            })?;
            params.push((p.local, repr));
        }

        let mut generator = BodyGenerator::new(
            self.ctx,
            self.fragment,
            &f.name,
            &params,
            Some(f.result.clone()),
        );
        generator.gen_statement(body)?;

        if f.flags.contains(FnFlags::CONSTRUCTOR) {
            // Implicit "return the receiver" epilogue, so call sites need no
            // extra temporary.
            let receiver = f
                .params
                .first()
                .ok_or_else(|| CodegenError::shape(&f.name, "constructor without a receiver"))?;
            generator.emit_local_get(receiver.local)?;
        } else if func_type.result.is_some() {
            // The source type system proved every path exits through a
            // return or a throw; the binary format cannot prove it, so the
            // fallthrough is marked unreachable for the verifier.
            generator.emit(Instr::Unreachable);
        }

        let (locals, param_count, instrs) = generator.finish();
        self.fragment.functions.define(
            f.key,
            &f.name,
            CompiledFunction::Defined(FunctionBody {
                signature: sig_key,
                locals,
                param_count,
                instrs,
            }),
        )?;

        if f.flags.contains(FnFlags::EXPORTED) {
            let name = f
                .export_name
                .clone()
                .unwrap_or_else(|| f.simple_name.clone());
            self.fragment.exports.push(Export {
                name,
                function: f.key,
            });
        }
        Ok(())
    }

    // ==========================================================================
    // Classes
    // ==========================================================================

    fn generate_class(&mut self, c: &ClassDecl) -> Result<()> {
        if c.flags.contains(ClassFlags::FIXED_ARRAY) {
            let elem = c.array_element.as_ref().ok_or_else(|| {
                CodegenError::shape(&c.name, "fixed-array class without an element type")
            })?;
            let storage = repr::field_storage(elem, self.ctx.graph, &c.name)?;
            self.fragment.array_types.define(
                c.key.struct_type(),
                &c.name,
                ArrayTypeDecl {
                    elem: storage,
                    mutable: true,
                },
            )?;
            return Ok(());
        }

        if c.is_interface() {
            self.generate_interface(c)?;
        } else {
            self.generate_instance_class(c)?;
        }

        for member in &c.members {
            self.generate(member)?;
        }
        Ok(())
    }

    /// An interface contributes its dispatch-table type; it has no runtime
    /// instance type.
    fn generate_interface(&mut self, c: &ClassDecl) -> Result<()> {
        let md = self.ctx.cache.interface_metadata(c.key)?;
        let mut fields = Vec::with_capacity(md.methods.len());
        for method in &md.methods {
            let decl = self.ctx.graph.function(method.function)?;
            let (sig_key, func_type) = function_type(self.ctx, decl);
            self.fragment
                .func_types
                .define_or_confirm(sig_key, &decl.name, func_type)?;
            fields.push(StructField {
                storage: FieldStorage::Ref {
                    heap: HeapType::Func(sig_key),
                    nullable: true,
                },
                mutable: false,
            });
        }
        self.fragment.itable_types.define(
            c.key.itable_type(),
            &c.name,
            StructTypeDecl {
                supertype: None,
                fields,
            },
        )
    }

    fn generate_instance_class(&mut self, c: &ClassDecl) -> Result<()> {
        let md = self.ctx.cache.class_metadata(c.key)?;
        debug!(class = %c.name, slots = md.virtual_methods.len(), "generating class");

        self.define_vtable_type(c, &md)?;
        let vtable = vtable::build_vtable(self.ctx, self.fragment, c, &md)?;
        self.fragment
            .vtable_globals
            .define(c.key.vtable_global(), &c.name, vtable)?;

        if !md.interfaces.is_empty() {
            let itable = vtable::build_itable(self.ctx, self.fragment, c, &md)?;
            self.fragment
                .itable_globals
                .define(c.key.itable_global(), &c.name, itable)?;
        }

        self.define_instance_struct(c, &md)?;

        let name = self.fragment.strings.intern(&c.name);
        self.fragment.descriptors.push(TypeDescriptor {
            class: c.key,
            name,
            field_count: md.fields.len() as u32,
            superclass: md.superclass,
            interfaces: md.interfaces.clone(),
        });
        Ok(())
    }

    /// The vtable struct type: one function reference per slot. Slot layout
    /// is append-only, so the supertype link mirrors the class hierarchy.
    fn define_vtable_type(&mut self, c: &ClassDecl, md: &ClassMetadata) -> Result<()> {
        let mut fields = Vec::with_capacity(md.virtual_methods.len());
        for slot in &md.virtual_methods {
            let decl = self.ctx.graph.function(slot.function)?;
            let (sig_key, func_type) = function_type(self.ctx, decl);
            self.fragment
                .func_types
                .define_or_confirm(sig_key, &decl.name, func_type)?;
            fields.push(StructField {
                storage: FieldStorage::Ref {
                    heap: HeapType::Func(sig_key),
                    nullable: true,
                },
                mutable: false,
            });
        }
        let supertype = c.superclass.map(DeclKey::vtable_type);
        if let Some(s) = supertype {
            self.fragment.vtable_types.reference(s);
        }
        self.fragment.vtable_types.define(
            c.key.vtable_type(),
            &c.name,
            StructTypeDecl { supertype, fields },
        )
    }

    /// The instance struct type: the two implicit header fields, then
    /// inherited fields, then own fields. The supertype link is the
    /// superclass's struct type, for storage-layout compatibility on upcast.
    fn define_instance_struct(&mut self, c: &ClassDecl, md: &ClassMetadata) -> Result<()> {
        let mut fields = Vec::with_capacity(md.fields.len() + 2);
        fields.push(StructField {
            storage: FieldStorage::Ref {
                heap: HeapType::Struct(c.key.vtable_type()),
                nullable: false,
            },
            mutable: false,
        });
        fields.push(StructField {
            storage: FieldStorage::Ref {
                heap: HeapType::Array(DeclKey::ITABLE_ARRAY),
                nullable: true,
            },
            mutable: false,
        });
        for layout in &md.fields {
            fields.push(StructField {
                storage: layout.storage,
                mutable: layout.mutable,
            });
        }
        let supertype = c.superclass.map(DeclKey::struct_type);
        if let Some(s) = supertype {
            self.fragment.struct_types.reference(s);
        }
        self.fragment.struct_types.define(
            c.key.struct_type(),
            &c.name,
            StructTypeDecl { supertype, fields },
        )
    }

    // ==========================================================================
    // Static fields
    // ==========================================================================

    /// Only static fields generate top-level code; instance fields are
    /// captured purely as struct layout. A trivially constant initializer is
    /// inlined; anything else runs at module start-up, and the global itself
    /// gets a type-appropriate zero/null placeholder.
    fn generate_static_field(&mut self, f: &StaticFieldDecl) -> Result<()> {
        let repr = repr::value_repr(&f.ty, self.ctx.graph)
            .filter(|r| *r != ReprType::Unreachable)
            .ok_or_else(|| {
                CodegenError::shape(&f.name, format!("static field of type '{}'", f.ty))
            })?;

        let init = match &f.init {
            Some(expr) => match constant_init(expr) {
                Some(instrs) => instrs,
                None => {
                    // Throwaway function-shaped context for the deferred
                    // initializer; the merge step splices it into the
                    // start-up routine.
                    let mut generator =
                        BodyGenerator::new(self.ctx, self.fragment, &f.name, &[], None);
                    generator.gen_with_expected(expr, &f.ty)?;
                    let (locals, _, instrs) = generator.finish();
                    self.fragment.deferred_inits.push(crate::fragment::DeferredInit {
                        field: f.key,
                        locals,
                        instrs,
                    });
                    vec![zero_init(repr)]
                }
            },
            None => vec![zero_init(repr)],
        };

        self.fragment.globals.define(
            f.key,
            &f.name,
            GlobalDecl {
                repr,
                mutable: true,
                init,
            },
        )
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Compute a function's type signature and its content-derived key.
///
/// Identical signatures share one key, so the table of function types is
/// deduplicated across the whole program.
pub(crate) fn function_type(
    ctx: &BackendContext<'_>,
    f: &FunctionDecl,
) -> (DeclKey, FuncType) {
    let params: Vec<ReprType> = f
        .params
        .iter()
        .filter_map(|p| repr::value_repr(&p.ty, ctx.graph))
        .collect();
    let result = repr::result_repr(&f.result, ctx.graph);
    let func_type = FuncType { params, result };
    (func_type_key(&func_type), func_type)
}

/// Content-derived key of a function-type signature.
pub(crate) fn func_type_key(func_type: &FuncType) -> DeclKey {
    let mut mnemonic = String::new();
    for p in &func_type.params {
        mnemonic.push_str(&repr_mnemonic(p));
        mnemonic.push(',');
    }
    mnemonic.push_str("->");
    if let Some(r) = &func_type.result {
        mnemonic.push_str(&repr_mnemonic(r));
    }
    DeclKey::function(&format!("functype:{mnemonic}"))
}

fn repr_mnemonic(repr: &ReprType) -> String {
    match repr {
        ReprType::I32 => "i32".to_string(),
        ReprType::I64 => "i64".to_string(),
        ReprType::F32 => "f32".to_string(),
        ReprType::F64 => "f64".to_string(),
        ReprType::Unreachable => "!".to_string(),
        ReprType::Ref { heap, nullable } => {
            let n = if *nullable { "?" } else { "" };
            match heap {
                HeapType::Struct(k) => format!("ref{n}s{k}"),
                HeapType::Array(k) => format!("ref{n}a{k}"),
                HeapType::Func(k) => format!("ref{n}f{k}"),
                HeapType::String => format!("ref{n}str"),
                HeapType::Extern => format!("ref{n}ext"),
                HeapType::Any => format!("ref{n}any"),
                HeapType::None => format!("ref{n}none"),
            }
        }
    }
}

/// Fold a trivially constant initializer into global-init instructions.
fn constant_init(expr: &opal_core::ir::Expr) -> Option<Vec<Instr>> {
    use opal_core::ir::Expr;
    match expr {
        Expr::IntConst { value, ty } => Some(vec![int_const(*value, ty)]),
        Expr::FloatConst { value, ty } => Some(vec![match ty {
            IrType::Float32 => Instr::F32Const(*value as f32),
            _ => Instr::F64Const(*value),
        }]),
        Expr::BoolConst { value } => Some(vec![Instr::I32Const(i32::from(*value))]),
        Expr::Null { ty } => {
            let heap = null_heap(ty);
            Some(vec![Instr::RefNull(heap)])
        }
        _ => None,
    }
}

pub(crate) fn int_const(value: i64, ty: &IrType) -> Instr {
    match ty {
        IrType::Int64 => Instr::I64Const(value),
        _ => Instr::I32Const(value as i32),
    }
}

/// The heap type of a typed null: the bottom reference type, which every
/// nullable reference position accepts.
pub(crate) fn null_heap(_ty: &IrType) -> HeapType {
    HeapType::None
}

/// Type-appropriate zero/null placeholder for a global.
pub(crate) fn zero_init(repr: ReprType) -> Instr {
    match repr {
        ReprType::I32 => Instr::I32Const(0),
        ReprType::I64 => Instr::I64Const(0),
        ReprType::F32 => Instr::F32Const(0.0),
        ReprType::F64 => Instr::F64Const(0.0),
        ReprType::Ref { heap, .. } => Instr::RefNull(heap),
        ReprType::Unreachable => Instr::Unreachable,
    }
}
