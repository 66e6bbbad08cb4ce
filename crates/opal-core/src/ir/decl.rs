//! Top-level IR declarations.
//!
//! A [`CompilationUnit`] is one source file's worth of declarations. Units are
//! self-contained trees: a declaration may reference declarations from other
//! units by [`DeclKey`], but never by pointer, which is what makes per-unit
//! code generation safe to run in parallel.

use bitflags::bitflags;

use crate::{DeclKey, IrType};

use super::expr::{Expr, LocalId};

/// One compilation unit (source file) of typed declarations.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    /// Source file name, used in diagnostics.
    pub name: String,
    /// Top-level declarations in source order.
    pub decls: Vec<Decl>,
}

/// A top-level or member declaration.
#[derive(Debug, Clone)]
pub enum Decl {
    Function(FunctionDecl),
    Class(ClassDecl),
    /// A static (top-level or companion) field. Instance fields live in
    /// [`ClassDecl::fields`] and contribute layout only.
    StaticField(StaticFieldDecl),
}

impl Decl {
    /// The declaration's identity key.
    pub fn key(&self) -> DeclKey {
        match self {
            Decl::Function(f) => f.key,
            Decl::Class(c) => c.key,
            Decl::StaticField(f) => f.key,
        }
    }

    /// The declaration's qualified name for diagnostics.
    pub fn name(&self) -> &str {
        match self {
            Decl::Function(f) => &f.name,
            Decl::Class(c) => &c.name,
            Decl::StaticField(f) => &f.name,
        }
    }
}

bitflags! {
    /// Modifier flags on a class declaration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClassFlags: u8 {
        /// Abstract class: may leave virtual slots without implementations.
        const ABSTRACT = 1 << 0;
        /// Interface: no instance layout, dispatch through itables.
        const INTERFACE = 1 << 1;
        /// Inline wrapper around a single field; unboxed in value positions.
        const INLINE = 1 << 2;
        /// Fixed-element array class; lowers to an array type declaration.
        const FIXED_ARRAY = 1 << 3;
    }
}

bitflags! {
    /// Modifier flags on a function declaration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FnFlags: u16 {
        /// Overridable: participates in vtable dispatch.
        const OPEN = 1 << 0;
        /// Abstract: no body; implies OPEN.
        const ABSTRACT = 1 << 1;
        /// Constructor: receives the fresh instance and returns it.
        const CONSTRUCTOR = 1 << 2;
        /// Imported from the host; no body is generated.
        const IMPORTED = 1 << 3;
        /// Compiler-intrinsic marker; never generated.
        const INTRINSIC = 1 << 4;
        /// Bridge/fake override duplicating an inherited implementation.
        const BRIDGE = 1 << 5;
        /// Exported under `export_name`.
        const EXPORTED = 1 << 6;
    }
}

/// A function or method declaration.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    /// Stable identity key.
    pub key: DeclKey,
    /// Qualified name for diagnostics and export defaults.
    pub name: String,
    /// Simple name used for override-signature matching.
    pub simple_name: String,
    /// Owning class (methods and constructors), or none for top-level.
    pub owner: Option<DeclKey>,
    /// Parameters in order. For methods the receiver is `params[0]`.
    pub params: Vec<Param>,
    /// Result type. `Unit` means no value; `Nothing` means no result type.
    pub result: IrType,
    /// The body, absent for abstract and imported functions.
    pub body: Option<Expr>,
    pub flags: FnFlags,
    /// Export name when `EXPORTED`; defaults to the simple name upstream.
    pub export_name: Option<String>,
    /// Import module/name pair when `IMPORTED`.
    pub import: Option<(String, String)>,
}

impl FunctionDecl {
    /// Signature key for override matching: simple name + non-receiver
    /// parameter types, nullability erased.
    pub fn signature(&self) -> DeclKey {
        let skip = usize::from(self.owner.is_some());
        let params: Vec<DeclKey> = self.params[skip.min(self.params.len())..]
            .iter()
            .map(|p| p.ty.signature_key())
            .collect();
        DeclKey::signature(&self.simple_name, &params)
    }

    /// Whether this function occupies or overrides a vtable slot.
    pub fn is_virtual(&self) -> bool {
        self.flags.intersects(FnFlags::OPEN | FnFlags::ABSTRACT)
    }
}

/// A function parameter. Parameters seed the local numbering of the body.
#[derive(Debug, Clone)]
pub struct Param {
    /// Local id referenced by the body.
    pub local: LocalId,
    /// Name for diagnostics.
    pub name: String,
    pub ty: IrType,
}

/// A class or interface declaration.
#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub key: DeclKey,
    /// Qualified name, also recorded in the type-descriptor.
    pub name: String,
    pub flags: ClassFlags,
    /// Single superclass, or none for the root class.
    pub superclass: Option<DeclKey>,
    /// Directly implemented interfaces, in declaration order.
    pub interfaces: Vec<DeclKey>,
    /// Instance fields in declaration order (inherited fields excluded).
    pub fields: Vec<InstanceField>,
    /// Member declarations (methods, constructors, static fields).
    pub members: Vec<Decl>,
    /// Element type when `FIXED_ARRAY`.
    pub array_element: Option<IrType>,
}

impl ClassDecl {
    pub fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(ClassFlags::ABSTRACT)
    }

    /// Member function declarations, in declaration order.
    pub fn methods(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.members.iter().filter_map(|m| match m {
            Decl::Function(f) => Some(f),
            _ => None,
        })
    }
}

/// An instance field: layout only, no top-level code.
#[derive(Debug, Clone)]
pub struct InstanceField {
    pub key: DeclKey,
    pub name: String,
    pub ty: IrType,
    pub mutable: bool,
}

/// A static field declaration.
#[derive(Debug, Clone)]
pub struct StaticFieldDecl {
    pub key: DeclKey,
    pub name: String,
    pub ty: IrType,
    /// Initializer expression; a trivially constant one is inlined into the
    /// global, anything else is deferred to module start-up.
    pub init: Option<Expr>,
}
