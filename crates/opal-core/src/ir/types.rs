//! IR types as produced by the frontend.
//!
//! Every expression node in the IR carries its resolved static type. The
//! backend never infers types; it only maps them to target representations.
//!
//! `Nothing` is the bottom type: it has no values, and control flow following
//! an expression of this type is statically unreachable. Its nullable variant
//! is inhabited only by `null`.

use crate::DeclKey;
use std::fmt;

/// A resolved IR type.
///
/// Reference types (`Class`, `Array`, `Function`, `String`) carry their own
/// nullability; primitives are value types and never nullable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    /// Boolean (stored narrow in fields, unsigned).
    Bool,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// UTF-16 code unit (stored narrow in fields, unsigned).
    Char,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
    /// The unit type: expressions of this type leave no value.
    Unit,
    /// The bottom type. `nullable: true` is inhabited only by `null`.
    Nothing { nullable: bool },
    /// A class or interface instance reference.
    Class { class: DeclKey, nullable: bool },
    /// A fixed-element array reference. `class` is the array class key.
    Array { class: DeclKey, nullable: bool },
    /// A function reference, typed by its signature key.
    Function { signature: DeclKey, nullable: bool },
    /// The builtin string reference type.
    String { nullable: bool },
}

impl IrType {
    /// Non-null `Nothing` (the never type).
    pub const NOTHING: IrType = IrType::Nothing { nullable: false };

    /// Non-null class reference.
    pub fn class(class: DeclKey) -> Self {
        IrType::Class {
            class,
            nullable: false,
        }
    }

    /// Nullable class reference.
    pub fn nullable_class(class: DeclKey) -> Self {
        IrType::Class {
            class,
            nullable: true,
        }
    }

    /// Non-null array reference.
    pub fn array(class: DeclKey) -> Self {
        IrType::Array {
            class,
            nullable: false,
        }
    }

    /// Non-null string.
    pub fn string() -> Self {
        IrType::String { nullable: false }
    }

    /// Is this the never type (non-null `Nothing`)?
    pub fn is_nothing(&self) -> bool {
        matches!(self, IrType::Nothing { nullable: false })
    }

    /// Is this the nullable never type (inhabited only by `null`)?
    pub fn is_nullable_nothing(&self) -> bool {
        matches!(self, IrType::Nothing { nullable: true })
    }

    /// Is this a primitive value type?
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            IrType::Bool
                | IrType::Int8
                | IrType::Int16
                | IrType::Int32
                | IrType::Int64
                | IrType::Char
                | IrType::Float32
                | IrType::Float64
        )
    }

    /// Is this a reference type (including nullable `Nothing`)?
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            IrType::Class { .. }
                | IrType::Array { .. }
                | IrType::Function { .. }
                | IrType::String { .. }
                | IrType::Nothing { nullable: true }
        )
    }

    /// Nullability of this type. Primitives and `Unit` are never nullable.
    pub fn is_nullable(&self) -> bool {
        match self {
            IrType::Nothing { nullable }
            | IrType::Class { nullable, .. }
            | IrType::Array { nullable, .. }
            | IrType::Function { nullable, .. }
            | IrType::String { nullable } => *nullable,
            _ => false,
        }
    }

    /// The class key of a class/array reference, if any.
    pub fn class_key(&self) -> Option<DeclKey> {
        match self {
            IrType::Class { class, .. } | IrType::Array { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// A stable key fragment for signature hashing.
    ///
    /// Nullability is erased: overriding a method may not change parameter
    /// identity by nullability alone.
    pub fn signature_key(&self) -> DeclKey {
        match self {
            IrType::Bool => DeclKey::class("Bool"),
            IrType::Int8 => DeclKey::class("Int8"),
            IrType::Int16 => DeclKey::class("Int16"),
            IrType::Int32 => DeclKey::class("Int32"),
            IrType::Int64 => DeclKey::class("Int64"),
            IrType::Char => DeclKey::class("Char"),
            IrType::Float32 => DeclKey::class("Float32"),
            IrType::Float64 => DeclKey::class("Float64"),
            IrType::Unit => DeclKey::class("Unit"),
            IrType::Nothing { .. } => DeclKey::class("Nothing"),
            IrType::Class { class, .. } | IrType::Array { class, .. } => *class,
            IrType::Function { signature, .. } => *signature,
            IrType::String { .. } => DeclKey::class("String"),
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.is_nullable() { "?" } else { "" };
        match self {
            IrType::Bool => write!(f, "Bool"),
            IrType::Int8 => write!(f, "Int8"),
            IrType::Int16 => write!(f, "Int16"),
            IrType::Int32 => write!(f, "Int32"),
            IrType::Int64 => write!(f, "Int64"),
            IrType::Char => write!(f, "Char"),
            IrType::Float32 => write!(f, "Float32"),
            IrType::Float64 => write!(f, "Float64"),
            IrType::Unit => write!(f, "Unit"),
            IrType::Nothing { .. } => write!(f, "Nothing{suffix}"),
            IrType::Class { class, .. } => write!(f, "class:{class}{suffix}"),
            IrType::Array { class, .. } => write!(f, "array:{class}{suffix}"),
            IrType::Function { signature, .. } => write!(f, "fn:{signature}{suffix}"),
            IrType::String { .. } => write!(f, "String{suffix}"),
        }
    }
}
