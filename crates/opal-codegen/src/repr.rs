//! The type transformer: IR types to target representations.
//!
//! Three variants, used at different positions:
//!
//! - [`value_repr`]: locals and operand-stack values. Primitives are unboxed;
//!   an inline wrapper class unboxes to its underlying representation.
//! - [`field_storage`]: struct/array field storage, which may be narrower
//!   than the working stack width. Boolean/byte/short/char fields are stored
//!   narrow and read back with explicit sign- or zero-extension depending on
//!   source signedness.
//! - [`result_repr`]: function results. `Nothing` produces *no* result type
//!   at all, not a value slot.

use opal_core::ir::ClassFlags;
use opal_core::{CodegenError, DeclKey, IrType};

use crate::metadata::DeclGraph;

type Result<T> = std::result::Result<T, CodegenError>;

/// Target heap types for reference representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// A concrete struct type (instance, vtable, or itable struct).
    Struct(DeclKey),
    /// An array type.
    Array(DeclKey),
    /// A typed function reference.
    Func(DeclKey),
    /// The builtin string type.
    String,
    /// Foreign/host references (carried by the host exception tag).
    Extern,
    /// Top of the internal reference hierarchy. Interface-typed values are
    /// representation-erased to this; use sites re-cast.
    Any,
    /// Bottom of the reference hierarchy; only `null` inhabits it.
    None,
}

/// A value representation on the operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReprType {
    I32,
    I64,
    F32,
    F64,
    Ref { heap: HeapType, nullable: bool },
    /// The never type: occupies no stack slot that is later read.
    Unreachable,
}

impl ReprType {
    pub fn is_ref(&self) -> bool {
        matches!(self, ReprType::Ref { .. })
    }

    /// Erased equality for coercion decisions: two reference representations
    /// with the same heap and nullability are interchangeable.
    pub fn same_erased(&self, other: &ReprType) -> bool {
        self == other
    }
}

/// Read-back extension for narrow field storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Sign,
    Zero,
}

/// Storage representation of a struct or array field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStorage {
    /// 8-bit packed integer; `signed` selects the read extension.
    I8 { signed: bool },
    /// 16-bit packed integer; `signed` selects the read extension.
    I16 { signed: bool },
    I32,
    I64,
    F32,
    F64,
    Ref { heap: HeapType, nullable: bool },
}

impl FieldStorage {
    /// The extension a read of this storage requires, if any. Truncation on
    /// write is performed implicitly by the storage instruction.
    pub fn extension(&self) -> Option<Extension> {
        match self {
            FieldStorage::I8 { signed: true } | FieldStorage::I16 { signed: true } => {
                Some(Extension::Sign)
            }
            FieldStorage::I8 { signed: false } | FieldStorage::I16 { signed: false } => {
                Some(Extension::Zero)
            }
            _ => None,
        }
    }

    /// The stack representation a read of this storage produces.
    pub fn widened(&self) -> ReprType {
        match self {
            FieldStorage::I8 { .. } | FieldStorage::I16 { .. } | FieldStorage::I32 => ReprType::I32,
            FieldStorage::I64 => ReprType::I64,
            FieldStorage::F32 => ReprType::F32,
            FieldStorage::F64 => ReprType::F64,
            FieldStorage::Ref { heap, nullable } => ReprType::Ref {
                heap: *heap,
                nullable: *nullable,
            },
        }
    }

    /// Element width in bytes, used by constant-data segments.
    pub fn byte_width(&self) -> u8 {
        match self {
            FieldStorage::I8 { .. } => 1,
            FieldStorage::I16 { .. } => 2,
            FieldStorage::I32 | FieldStorage::F32 | FieldStorage::Ref { .. } => 4,
            FieldStorage::I64 | FieldStorage::F64 => 8,
        }
    }
}

/// The stack representation of a value of type `ty`, or `None` for `Unit`.
pub fn value_repr(ty: &IrType, graph: &DeclGraph<'_>) -> Option<ReprType> {
    match ty {
        IrType::Bool | IrType::Int8 | IrType::Int16 | IrType::Int32 | IrType::Char => {
            Some(ReprType::I32)
        }
        IrType::Int64 => Some(ReprType::I64),
        IrType::Float32 => Some(ReprType::F32),
        IrType::Float64 => Some(ReprType::F64),
        IrType::Unit => None,
        IrType::Nothing { nullable: false } => Some(ReprType::Unreachable),
        IrType::Nothing { nullable: true } => Some(ReprType::Ref {
            heap: HeapType::None,
            nullable: true,
        }),
        IrType::Class { class, nullable } => Some(class_value_repr(*class, *nullable, graph)),
        IrType::Array { class, nullable } => Some(ReprType::Ref {
            heap: HeapType::Array(class.struct_type()),
            nullable: *nullable,
        }),
        IrType::Function {
            signature,
            nullable,
        } => Some(ReprType::Ref {
            heap: HeapType::Func(*signature),
            nullable: *nullable,
        }),
        IrType::String { nullable } => Some(ReprType::Ref {
            heap: HeapType::String,
            nullable: *nullable,
        }),
    }
}

fn class_value_repr(class: DeclKey, nullable: bool, graph: &DeclGraph<'_>) -> ReprType {
    if let Ok(decl) = graph.class(class) {
        if decl.flags.contains(ClassFlags::INLINE)
            && !nullable
            && let Some(field) = decl.fields.first()
            && decl.fields.len() == 1
        {
            // Inline wrapper: unbox to the underlying representation. A
            // nullable inline value stays boxed (null must be representable).
            if let Some(repr) = value_repr(&field.ty, graph) {
                return repr;
            }
        }
        if decl.is_interface() {
            return ReprType::Ref {
                heap: HeapType::Any,
                nullable,
            };
        }
    }
    ReprType::Ref {
        heap: HeapType::Struct(class.struct_type()),
        nullable,
    }
}

/// The storage representation of a field of type `ty`.
///
/// `Unit` and never-typed fields are a shape violation.
pub fn field_storage(ty: &IrType, graph: &DeclGraph<'_>, decl: &str) -> Result<FieldStorage> {
    match ty {
        IrType::Bool => Ok(FieldStorage::I8 { signed: false }),
        IrType::Int8 => Ok(FieldStorage::I8 { signed: true }),
        IrType::Int16 => Ok(FieldStorage::I16 { signed: true }),
        IrType::Char => Ok(FieldStorage::I16 { signed: false }),
        _ => match value_repr(ty, graph) {
            Some(ReprType::I32) => Ok(FieldStorage::I32),
            Some(ReprType::I64) => Ok(FieldStorage::I64),
            Some(ReprType::F32) => Ok(FieldStorage::F32),
            Some(ReprType::F64) => Ok(FieldStorage::F64),
            Some(ReprType::Ref { heap, nullable }) => Ok(FieldStorage::Ref { heap, nullable }),
            Some(ReprType::Unreachable) | None => Err(CodegenError::shape(
                decl,
                format!("field of uninhabited or unit type '{ty}'"),
            )),
        },
    }
}

/// The result representation of a function returning `ty`.
///
/// `Unit` and the never type both produce no result type: a `Nothing`-typed
/// function can never return a value, and the binary format cannot express
/// a slot that is provably never written.
pub fn result_repr(ty: &IrType, graph: &DeclGraph<'_>) -> Option<ReprType> {
    match ty {
        IrType::Unit | IrType::Nothing { nullable: false } => None,
        _ => match value_repr(ty, graph) {
            Some(ReprType::Unreachable) | None => None,
            other => other,
        },
    }
}
