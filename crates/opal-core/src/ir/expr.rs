//! Typed IR expressions.
//!
//! A closed sum type over expression kinds: the body generator matches
//! exhaustively, so adding a node kind is a compile-time-checked obligation
//! everywhere it must be handled.
//!
//! Statements are expressions of type `Unit`; a block's trailing expression
//! is its value when the block type is non-unit.

use crate::{DeclKey, IrType};

/// A local variable id, unique within one function body.
///
/// Ids are symbolic: the codegen context assigns dense target slots, with
/// parameters seeding the numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

/// Binary operators. Comparisons produce `Bool`; the operand representation
/// selects the target instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
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

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

/// Unary operators, including the explicit numeric conversions the frontend
/// inserts (the backend never converts implicitly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Boolean negation.
    Not,
    /// Numeric negation.
    Neg,
    /// Int32 -> Int64, sign extending.
    WidenToLong,
    /// Int64 -> Int32, wrapping.
    WrapToInt,
    /// Float32 -> Float64.
    PromoteToDouble,
    /// Float64 -> Float32.
    DemoteToFloat,
}

/// One catch clause of a `Try`.
#[derive(Debug, Clone)]
pub struct CatchClause {
    /// The exception class this clause matches (first match wins, left to
    /// right). The root exception class matches everything, including host
    /// exceptions after normalization.
    pub exception_class: DeclKey,
    /// Local receiving the caught value inside the handler body.
    pub local: LocalId,
    /// Handler body.
    pub body: Expr,
    /// Synthetic finally-catch: run the handler, then re-throw instead of
    /// joining the merge point.
    pub rethrow_after: bool,
}

/// A typed IR expression.
#[derive(Debug, Clone)]
pub enum Expr {
    // ------------------------------------------------------------------
    // Constants
    // ------------------------------------------------------------------
    /// Integer constant; `ty` selects the width (Int8..Int64, Char).
    IntConst { value: i64, ty: IrType },
    /// Float constant; `ty` selects Float32 or Float64.
    FloatConst { value: f64, ty: IrType },
    BoolConst { value: bool },
    /// Pooled string literal.
    StringConst { value: String },
    /// Typed null; `ty` is a nullable reference type or nullable `Nothing`.
    Null { ty: IrType },

    // ------------------------------------------------------------------
    // Locals and globals
    // ------------------------------------------------------------------
    GetLocal { local: LocalId, ty: IrType },
    SetLocal { local: LocalId, value: Box<Expr> },
    /// Local declaration; allocates the slot, optionally initializing it.
    Let { local: LocalId, var_ty: IrType, init: Option<Box<Expr>> },
    GetStatic { field: DeclKey, ty: IrType },
    SetStatic { field: DeclKey, value: Box<Expr> },

    // ------------------------------------------------------------------
    // Object and array access
    // ------------------------------------------------------------------
    GetField { receiver: Box<Expr>, class: DeclKey, field: DeclKey, ty: IrType },
    SetField { receiver: Box<Expr>, class: DeclKey, field: DeclKey, value: Box<Expr> },
    /// Array construction; all-constant element lists fold to a data segment.
    NewArray { class: DeclKey, elems: Vec<Expr>, ty: IrType },
    ArrayGet { class: DeclKey, array: Box<Expr>, index: Box<Expr>, ty: IrType },
    ArraySet { class: DeclKey, array: Box<Expr>, index: Box<Expr>, value: Box<Expr> },
    ArrayLen { class: DeclKey, array: Box<Expr> },

    // ------------------------------------------------------------------
    // Calls and construction
    // ------------------------------------------------------------------
    /// Function or method call. Dispatch is static unless the callee is
    /// overridable and the call is not a super-call.
    Call {
        callee: DeclKey,
        receiver: Option<Box<Expr>>,
        args: Vec<Expr>,
        /// Statically-resolved super-call: never dispatched virtually.
        is_super: bool,
        ty: IrType,
    },
    /// Instance construction: allocate, then run the constructor, which
    /// returns the receiver.
    New { class: DeclKey, ctor: DeclKey, args: Vec<Expr>, ty: IrType },
    /// Reference to a function, typed by its signature.
    FunctionRef { function: DeclKey, ty: IrType },

    // ------------------------------------------------------------------
    // Type tests and casts
    // ------------------------------------------------------------------
    /// `value is Target`; produces `Bool`.
    Is { value: Box<Expr>, target: IrType },
    /// Checked cast to `target`.
    Cast { value: Box<Expr>, target: IrType },

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr>, ty: IrType },
    Unary { op: UnaryOp, operand: Box<Expr>, ty: IrType },

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
        ty: IrType,
    },
    While { cond: Box<Expr>, body: Box<Expr> },
    Block { statements: Vec<Expr>, ty: IrType },
    Return { value: Option<Box<Expr>> },
    Throw { value: Box<Expr> },
    Try { body: Box<Expr>, catches: Vec<CatchClause>, ty: IrType },
}

impl Expr {
    /// The expression's resolved static type.
    pub fn ty(&self) -> IrType {
        match self {
            Expr::IntConst { ty, .. }
            | Expr::FloatConst { ty, .. }
            | Expr::Null { ty }
            | Expr::GetLocal { ty, .. }
            | Expr::GetStatic { ty, .. }
            | Expr::GetField { ty, .. }
            | Expr::NewArray { ty, .. }
            | Expr::ArrayGet { ty, .. }
            | Expr::Call { ty, .. }
            | Expr::New { ty, .. }
            | Expr::FunctionRef { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::If { ty, .. }
            | Expr::Block { ty, .. }
            | Expr::Try { ty, .. } => ty.clone(),

            Expr::BoolConst { .. } | Expr::Is { .. } => IrType::Bool,
            Expr::StringConst { .. } => IrType::string(),
            Expr::ArrayLen { .. } => IrType::Int32,
            Expr::Cast { target, .. } => target.clone(),

            Expr::SetLocal { .. }
            | Expr::Let { .. }
            | Expr::SetStatic { .. }
            | Expr::SetField { .. }
            | Expr::ArraySet { .. }
            | Expr::While { .. } => IrType::Unit,

            Expr::Return { .. } | Expr::Throw { .. } => IrType::NOTHING,
        }
    }

    /// Convenience: is this node a primitive literal eligible for
    /// constant-data folding (strings and null excluded)?
    pub fn as_primitive_literal(&self) -> Option<PrimitiveLiteral> {
        match self {
            Expr::IntConst { value, ty } => Some(PrimitiveLiteral::Int(*value, ty.clone())),
            Expr::FloatConst { value, ty } => Some(PrimitiveLiteral::Float(*value, ty.clone())),
            Expr::BoolConst { value } => Some(PrimitiveLiteral::Bool(*value)),
            _ => None,
        }
    }
}

/// A primitive literal value, used by the constant-array folding path.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveLiteral {
    Int(i64, IrType),
    Float(f64, IrType),
    Bool(bool),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_is_unit() {
        let e = Expr::SetLocal {
            local: LocalId(0),
            value: Box::new(Expr::IntConst { value: 1, ty: IrType::Int32 }),
        };
        assert_eq!(e.ty(), IrType::Unit);
    }

    #[test]
    fn throw_is_never() {
        let e = Expr::Throw {
            value: Box::new(Expr::Null { ty: IrType::Nothing { nullable: true } }),
        };
        assert!(e.ty().is_nothing());
    }

    #[test]
    fn string_literal_is_not_foldable() {
        let s = Expr::StringConst { value: "x".into() };
        assert!(s.as_primitive_literal().is_none());
        let n = Expr::Null { ty: IrType::Nothing { nullable: true } };
        assert!(n.as_primitive_literal().is_none());
    }
}
