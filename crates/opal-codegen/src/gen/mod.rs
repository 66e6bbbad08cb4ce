//! The body generator.
//!
//! A postorder, stack-discipline tree walker over the closed [`Expr`] sum
//! type. The single structural invariant: **every generated expression
//! leaves exactly one value on the operand stack**, unless its
//! representation is empty (`Unit`) or its type is the never type, in which
//! case an explicit `Unreachable` marker is emitted immediately after it.
//! A statement context drops any leftover non-void value.
//!
//! Submodules carry the heavier sub-algorithms: type-expected coercion
//! ([`coerce`]), call dispatch ([`call`]), exception lowering
//! ([`exceptions`]), and constant-array folding ([`array_lit`]).

mod array_lit;
mod call;
mod coerce;
mod exceptions;

use opal_core::ir::{BinaryOp, Expr, LocalId, UnaryOp};
use opal_core::{CodegenError, IrType};

use crate::context::BackendContext;
use crate::decl;
use crate::emit::FunctionEmitter;
use crate::fragment::ModuleFragment;
use crate::instr::{BlockType, FpOp, Instr, IntOp};
use crate::repr::{self, ReprType};

type Result<T> = std::result::Result<T, CodegenError>;

/// Generates one function body (or one deferred initializer).
pub struct BodyGenerator<'a, 'ctx> {
    pub(crate) ctx: &'a BackendContext<'ctx>,
    pub(crate) fragment: &'a mut ModuleFragment,
    pub(crate) emitter: FunctionEmitter,
    /// The enclosing function's result type; `None` in initializer contexts,
    /// where `return` is a shape violation.
    fn_result: Option<IrType>,
}

impl<'a, 'ctx> BodyGenerator<'a, 'ctx> {
    /// Create a generator with fresh local numbering seeded by `params`.
    pub fn new(
        ctx: &'a BackendContext<'ctx>,
        fragment: &'a mut ModuleFragment,
        name: &str,
        params: &[(LocalId, ReprType)],
        fn_result: Option<IrType>,
    ) -> Self {
        Self {
            ctx,
            fragment,
            emitter: FunctionEmitter::new(name, params),
            fn_result,
        }
    }

    pub fn emit(&mut self, instr: Instr) {
        self.emitter.emit(instr);
    }

    pub fn emit_local_get(&mut self, id: LocalId) -> Result<()> {
        let slot = self.emitter.local_slot(id)?;
        self.emit(Instr::LocalGet(slot));
        Ok(())
    }

    pub fn finish(self) -> (Vec<ReprType>, u32, Vec<Instr>) {
        self.emitter.finish()
    }

    fn shape(&self, message: impl Into<String>) -> CodegenError {
        CodegenError::shape(self.emitter.name(), message)
    }

    // ==========================================================================
    // Contexts
    // ==========================================================================

    /// Generate in statement context: any leftover non-void value is dropped.
    pub fn gen_statement(&mut self, expr: &Expr) -> Result<()> {
        self.r#gen(expr)?;
        match repr::value_repr(&expr.ty(), self.ctx.graph) {
            None | Some(ReprType::Unreachable) => {}
            Some(_) => self.emit(Instr::Drop),
        }
        Ok(())
    }

    /// Generate and reconcile against the context's expected type.
    pub fn gen_with_expected(&mut self, expr: &Expr, expected: &IrType) -> Result<()> {
        self.r#gen(expr)?;
        coerce::coerce(self, &expr.ty(), expected)
    }

    /// Generate a branch arm: value position when `ty` has a value
    /// representation, statement position otherwise.
    fn gen_branch(&mut self, expr: &Expr, ty: &IrType) -> Result<()> {
        match repr::value_repr(ty, self.ctx.graph) {
            Some(r) if r != ReprType::Unreachable => self.gen_with_expected(expr, ty),
            _ => self.gen_statement(expr),
        }
    }

    fn block_type(&self, ty: &IrType) -> BlockType {
        match repr::value_repr(ty, self.ctx.graph) {
            Some(r) if r != ReprType::Unreachable => BlockType::Value(r),
            _ => BlockType::Empty,
        }
    }

    // ==========================================================================
    // The walker
    // ==========================================================================

    /// Generate one expression, postorder.
    pub fn r#gen(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            // Constants
            Expr::IntConst { value, ty } => self.emit(decl::int_const(*value, ty)),
            Expr::FloatConst { value, ty } => self.emit(match ty {
                IrType::Float32 => Instr::F32Const(*value as f32),
                _ => Instr::F64Const(*value),
            }),
            Expr::BoolConst { value } => self.emit(Instr::I32Const(i32::from(*value))),
            Expr::StringConst { value } => {
                let key = self.fragment.strings.intern(value);
                self.emit(Instr::StringConst(key));
            }
            Expr::Null { ty } => self.emit(Instr::RefNull(decl::null_heap(ty))),

            // Locals and globals
            Expr::GetLocal { local, .. } => self.emit_local_get(*local)?,
            Expr::SetLocal { local, value } => {
                self.r#gen(value)?;
                let slot = self.emitter.local_slot(*local)?;
                self.emit(Instr::LocalSet(slot));
            }
            Expr::Let {
                local,
                var_ty,
                init,
            } => {
                let repr = repr::value_repr(var_ty, self.ctx.graph)
                    .ok_or_else(|| self.shape("local of unit type"))?;
                let slot = self.emitter.define_local(*local, repr)?;
                if let Some(init) = init {
                    self.gen_with_expected(init, var_ty)?;
                    self.emit(Instr::LocalSet(slot));
                }
            }
            Expr::GetStatic { field, .. } => {
                self.fragment.globals.reference(*field);
                self.emit(Instr::GlobalGet(*field));
            }
            Expr::SetStatic { field, value } => {
                let decl = self.ctx.graph.static_field(*field)?;
                self.gen_with_expected(value, &decl.ty.clone())?;
                self.fragment.globals.reference(*field);
                self.emit(Instr::GlobalSet(*field));
            }

            // Fields
            Expr::GetField {
                receiver,
                class,
                field,
                ..
            } => self.gen_field_get(receiver, *class, *field)?,
            Expr::SetField {
                receiver,
                class,
                field,
                value,
            } => self.gen_field_set(receiver, *class, *field, value)?,

            // Arrays
            Expr::NewArray { class, elems, .. } => array_lit::gen_new_array(self, *class, elems)?,
            Expr::ArrayGet {
                class,
                array,
                index,
                ..
            } => {
                self.r#gen(array)?;
                self.r#gen(index)?;
                let ext = self.array_elem_storage(*class)?.extension();
                self.fragment.array_types.reference(class.struct_type());
                self.emit(Instr::ArrayGet {
                    ty: class.struct_type(),
                    ext,
                });
            }
            Expr::ArraySet {
                class,
                array,
                index,
                value,
            } => {
                let elem_ty = self.array_elem_type(*class)?;
                self.r#gen(array)?;
                self.r#gen(index)?;
                self.gen_with_expected(value, &elem_ty)?;
                self.fragment.array_types.reference(class.struct_type());
                self.emit(Instr::ArraySet {
                    ty: class.struct_type(),
                });
            }
            Expr::ArrayLen { array, .. } => {
                self.r#gen(array)?;
                self.emit(Instr::ArrayLen);
            }

            // Calls and construction
            Expr::Call {
                callee,
                receiver,
                args,
                is_super,
                ..
            } => call::gen_call(self, *callee, receiver.as_deref(), args, *is_super)?,
            Expr::New {
                class, ctor, args, ..
            } => call::gen_new(self, *class, *ctor, args)?,
            Expr::FunctionRef { function, .. } => {
                self.fragment.functions.reference(*function);
                self.emit(Instr::RefFunc(*function));
            }

            // Type tests and casts
            Expr::Is { value, target } => coerce::gen_is(self, value, target)?,
            Expr::Cast { value, target } => coerce::gen_cast(self, value, target)?,

            // Operators
            Expr::Binary { op, lhs, rhs, .. } => self.gen_binary(*op, lhs, rhs)?,
            Expr::Unary { op, operand, .. } => self.gen_unary(*op, operand)?,

            // Control flow
            Expr::If {
                cond,
                then_branch,
                else_branch,
                ty,
            } => {
                self.r#gen(cond)?;
                let ty = ty.clone();
                self.emitter.begin_if(self.block_type(&ty));
                self.gen_branch(then_branch, &ty)?;
                if let Some(else_branch) = else_branch {
                    self.emitter.else_();
                    self.gen_branch(else_branch, &ty)?;
                }
                self.emitter.end();
            }
            Expr::While { cond, body } => {
                let exit = self.emitter.begin_block(BlockType::Empty);
                let head = self.emitter.begin_loop(BlockType::Empty);
                self.r#gen(cond)?;
                self.emit(Instr::I32Eqz);
                self.emitter.br_if(exit);
                self.gen_statement(body)?;
                self.emitter.br(head);
                self.emitter.end();
                self.emitter.end();
            }
            Expr::Block { statements, ty } => {
                let has_value = self.block_type(ty) != BlockType::Empty;
                let value_at = if has_value && !statements.is_empty() {
                    statements.len() - 1
                } else {
                    statements.len()
                };
                let ty = ty.clone();
                for (i, stmt) in statements.iter().enumerate() {
                    if i == value_at {
                        self.gen_with_expected(stmt, &ty)?;
                    } else {
                        self.gen_statement(stmt)?;
                    }
                }
            }
            Expr::Return { value } => {
                let result = self
                    .fn_result
                    .clone()
                    .ok_or_else(|| self.shape("return outside a function body"))?;
                match value {
                    Some(v) => match repr::value_repr(&result, self.ctx.graph) {
                        Some(r) if r != ReprType::Unreachable => {
                            self.gen_with_expected(v, &result)?;
                        }
                        _ => self.gen_statement(v)?,
                    },
                    None => {}
                }
                self.emit(Instr::Return);
            }

            // Exceptions
            Expr::Throw { value } => exceptions::gen_throw(self, value)?,
            Expr::Try { body, catches, ty } => exceptions::gen_try(self, body, catches, ty)?,
        }

        // The never type has no values: whatever control path produced it
        // cannot continue, and the marker keeps the verifier convinced.
        if expr.ty().is_nothing() {
            self.emit(Instr::Unreachable);
        }
        Ok(())
    }

    // ==========================================================================
    // Fields
    // ==========================================================================

    /// Cast the receiver when its static type does not already carry the
    /// accessed class (representation-erased generic call sites).
    fn gen_receiver(&mut self, receiver: &Expr, class: opal_core::DeclKey) -> Result<()> {
        self.r#gen(receiver)?;
        if receiver.ty().class_key() != Some(class) {
            self.emit(Instr::RefCast {
                heap: crate::repr::HeapType::Struct(class.struct_type()),
                nullable: false,
            });
        }
        Ok(())
    }

    fn gen_field_get(
        &mut self,
        receiver: &Expr,
        class: opal_core::DeclKey,
        field: opal_core::DeclKey,
    ) -> Result<()> {
        self.gen_receiver(receiver, class)?;
        let md = self.ctx.cache.class_metadata(class)?;
        let layout = md
            .field(field)
            .ok_or_else(|| self.shape(format!("unknown field {field}")))?;
        self.fragment.struct_types.reference(class.struct_type());
        self.emit(Instr::StructGet {
            ty: class.struct_type(),
            field: layout.index,
            ext: layout.storage.extension(),
        });
        Ok(())
    }

    fn gen_field_set(
        &mut self,
        receiver: &Expr,
        class: opal_core::DeclKey,
        field: opal_core::DeclKey,
        value: &Expr,
    ) -> Result<()> {
        self.gen_receiver(receiver, class)?;
        let md = self.ctx.cache.class_metadata(class)?;
        let layout = md
            .field(field)
            .ok_or_else(|| self.shape(format!("unknown field {field}")))?;
        let index = layout.index;
        let field_ty = self
            .ctx
            .graph
            .class(class)?
            .fields
            .iter()
            .find(|f| f.key == field)
            .map(|f| f.ty.clone())
            .unwrap_or_else(|| value.ty());
        self.gen_with_expected(value, &field_ty)?;
        self.fragment.struct_types.reference(class.struct_type());
        self.emit(Instr::StructSet {
            ty: class.struct_type(),
            field: index,
        });
        Ok(())
    }

    fn array_elem_type(&self, class: opal_core::DeclKey) -> Result<IrType> {
        let decl = self.ctx.graph.class(class)?;
        decl.array_element
            .clone()
            .ok_or_else(|| self.shape(format!("'{}' is not an array class", decl.name)))
    }

    fn array_elem_storage(&self, class: opal_core::DeclKey) -> Result<crate::repr::FieldStorage> {
        let elem = self.array_elem_type(class)?;
        repr::field_storage(&elem, self.ctx.graph, self.emitter.name())
    }

    // ==========================================================================
    // Operators
    // ==========================================================================

    fn gen_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<()> {
        let operand = repr::value_repr(&lhs.ty(), self.ctx.graph);
        self.r#gen(lhs)?;
        self.r#gen(rhs)?;

        match operand {
            Some(ReprType::I32) => self.emit(Instr::I32Bin(int_op(op))),
            Some(ReprType::I64) => self.emit(Instr::I64Bin(int_op(op))),
            Some(ReprType::F32) => self.emit(Instr::F32Bin(fp_op(op))),
            Some(ReprType::F64) => self.emit(Instr::F64Bin(fp_op(op))),
            Some(ReprType::Ref { .. }) => match op {
                BinaryOp::Eq => self.emit(Instr::RefEq),
                BinaryOp::Ne => {
                    self.emit(Instr::RefEq);
                    self.emit(Instr::I32Eqz);
                }
                // Ordering on references indicates an upstream type-checking
                // inconsistency; trap instead of miscompiling.
                _ => self.emit(Instr::Unreachable),
            },
            Some(ReprType::Unreachable) | None => self.emit(Instr::Unreachable),
        }
        Ok(())
    }

    fn gen_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<()> {
        let operand_repr = repr::value_repr(&operand.ty(), self.ctx.graph);
        match op {
            UnaryOp::Not => {
                self.r#gen(operand)?;
                self.emit(Instr::I32Eqz);
            }
            UnaryOp::Neg => match operand_repr {
                Some(ReprType::I32) => {
                    self.emit(Instr::I32Const(0));
                    self.r#gen(operand)?;
                    self.emit(Instr::I32Bin(IntOp::Sub));
                }
                Some(ReprType::I64) => {
                    self.emit(Instr::I64Const(0));
                    self.r#gen(operand)?;
                    self.emit(Instr::I64Bin(IntOp::Sub));
                }
                Some(ReprType::F32) => {
                    self.r#gen(operand)?;
                    self.emit(Instr::F32Neg);
                }
                _ => {
                    self.r#gen(operand)?;
                    self.emit(Instr::F64Neg);
                }
            },
            UnaryOp::WidenToLong => {
                self.r#gen(operand)?;
                self.emit(Instr::I64ExtendI32S);
            }
            UnaryOp::WrapToInt => {
                self.r#gen(operand)?;
                self.emit(Instr::I32WrapI64);
            }
            UnaryOp::PromoteToDouble => {
                self.r#gen(operand)?;
                self.emit(Instr::F64PromoteF32);
            }
            UnaryOp::DemoteToFloat => {
                self.r#gen(operand)?;
                self.emit(Instr::F32DemoteF64);
            }
        }
        Ok(())
    }

}

fn int_op(op: BinaryOp) -> IntOp {
    match op {
        BinaryOp::Add => IntOp::Add,
        BinaryOp::Sub => IntOp::Sub,
        BinaryOp::Mul => IntOp::Mul,
        BinaryOp::Div => IntOp::DivS,
        BinaryOp::Eq => IntOp::Eq,
        BinaryOp::Ne => IntOp::Ne,
        BinaryOp::Lt => IntOp::LtS,
        BinaryOp::Le => IntOp::LeS,
        BinaryOp::Gt => IntOp::GtS,
        BinaryOp::Ge => IntOp::GeS,
    }
}

fn fp_op(op: BinaryOp) -> FpOp {
    match op {
        BinaryOp::Add => FpOp::Add,
        BinaryOp::Sub => FpOp::Sub,
        BinaryOp::Mul => FpOp::Mul,
        BinaryOp::Div => FpOp::Div,
        BinaryOp::Eq => FpOp::Eq,
        BinaryOp::Ne => FpOp::Ne,
        BinaryOp::Lt => FpOp::Lt,
        BinaryOp::Le => FpOp::Le,
        BinaryOp::Gt => FpOp::Gt,
        BinaryOp::Ge => FpOp::Ge,
    }
}
