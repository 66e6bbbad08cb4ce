//! The target instruction set.
//!
//! A closed enum over the stack machine's instructions, with symbolic
//! operands: declarations are referenced by [`DeclKey`], pooled strings by
//! [`StringKey`], constant-data segments by [`DataKey`]. The downstream
//! assembler resolves symbols to final binary indices and serializes; this
//! crate never emits bytes.
//!
//! Control flow is structured: `Block`/`Loop`/`If`/`TryTable`/`Try` open a
//! region closed by `End`, and branches name relative depths.

use opal_core::DeclKey;

use crate::repr::{Extension, HeapType, ReprType};

/// Content-hash key of a pooled string literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringKey(pub u64);

/// Content-hash key of a constant-data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataKey(pub u64);

/// Module-level exception tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// The language tag; carries a reference to the root exception class.
    Exception,
    /// The foreign/host tag; carries an external reference.
    Host,
}

/// Result arity of a structured control region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockType {
    Empty,
    Value(ReprType),
}

/// One catch target of a `TryTable`: exceptions with `tag` branch to the
/// block at relative `depth`, pushing the tag's payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatchTarget {
    pub tag: Tag,
    pub depth: u32,
}

/// Signed integer operations (shared by the 32- and 64-bit forms).
/// Comparisons leave an `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntOp {
    Add,
    Sub,
    Mul,
    DivS,
    Eq,
    Ne,
    LtS,
    LeS,
    GtS,
    GeS,
}

/// Float operations (shared by the 32- and 64-bit forms).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A stack machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    // =========================================================================
    // Constants
    // =========================================================================
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
    /// Push a typed null reference.
    RefNull(HeapType),
    /// Push a reference to a function.
    RefFunc(DeclKey),
    /// Push the pooled string with this content key.
    StringConst(StringKey),

    // =========================================================================
    // Locals and Globals
    // =========================================================================
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(DeclKey),
    GlobalSet(DeclKey),

    // =========================================================================
    // Numeric
    // =========================================================================
    I32Bin(IntOp),
    I64Bin(IntOp),
    F32Bin(FpOp),
    F64Bin(FpOp),
    /// Top-of-stack i32 == 0.
    I32Eqz,
    F32Neg,
    F64Neg,
    I64ExtendI32S,
    I32WrapI64,
    F64PromoteF32,
    F32DemoteF64,

    // =========================================================================
    // Stack
    // =========================================================================
    Drop,

    // =========================================================================
    // Control Flow
    // =========================================================================
    Block(BlockType),
    Loop(BlockType),
    If(BlockType),
    Else,
    /// Close the innermost open region.
    End,
    /// Branch to the region at relative depth.
    Br(u32),
    /// Conditional branch; pops an i32.
    BrIf(u32),
    Return,
    /// Trap. Also the defensive marker after never-typed expressions.
    Unreachable,

    // =========================================================================
    // Calls
    // =========================================================================
    /// Direct call by function key.
    Call(DeclKey),
    /// Indirect call through a function reference typed by this signature.
    CallRef(DeclKey),

    // =========================================================================
    // Structs and Arrays
    // =========================================================================
    /// Allocate a struct, popping one value per field (headers included).
    StructNew(DeclKey),
    /// Read a field; narrow storage extends per `ext`.
    StructGet {
        ty: DeclKey,
        field: u32,
        ext: Option<Extension>,
    },
    /// Write a field; narrow storage truncates implicitly.
    StructSet { ty: DeclKey, field: u32 },
    /// Allocate an array from `len` popped elements.
    ArrayNewFixed { ty: DeclKey, len: u32 },
    /// Allocate an array from a constant-data segment.
    ArrayNewData { ty: DeclKey, data: DataKey },
    /// Read an element; narrow storage extends per `ext`. Pops array, index.
    ArrayGet { ty: DeclKey, ext: Option<Extension> },
    /// Write an element. Pops array, index, value.
    ArraySet { ty: DeclKey },
    ArrayLen,

    // =========================================================================
    // References
    // =========================================================================
    /// Checked downcast; traps on failure.
    RefCast { heap: HeapType, nullable: bool },
    /// Type test; leaves an i32.
    RefTest { heap: HeapType },
    RefIsNull,
    /// Reference identity; leaves an i32.
    RefEq,

    // =========================================================================
    // Exceptions
    // =========================================================================
    /// Throw with this tag, popping the tag's payload.
    Throw(Tag),
    /// Re-throw the exception caught by the `Try` at relative depth
    /// (legacy encoding only).
    Rethrow(u32),
    /// Structured-handler protected region: exceptions matching a catch
    /// target branch out with the payload; closed by `End`.
    TryTable {
        ty: BlockType,
        catches: Vec<CatchTarget>,
    },
    /// Legacy protected region; handlers follow as `Catch` arms.
    Try(BlockType),
    /// Legacy handler arm for one tag; pushes the payload.
    Catch(Tag),
}

impl Instr {
    /// Does this instruction open a control region closed by `End`?
    pub fn opens_region(&self) -> bool {
        matches!(
            self,
            Instr::Block(_)
                | Instr::Loop(_)
                | Instr::If(_)
                | Instr::TryTable { .. }
                | Instr::Try(_)
        )
    }
}
