//! Per-function instruction emitter.
//!
//! [`FunctionEmitter`] owns the codegen context of a single function body:
//! the instruction sequence being built, local-variable numbering (seeded by
//! the parameters), and the stack of open control regions so branches can
//! name targets by label instead of hand-counted depths.

use rustc_hash::FxHashMap;

use opal_core::CodegenError;
use opal_core::ir::LocalId;

use crate::instr::{BlockType, CatchTarget, Instr, Tag};
use crate::repr::ReprType;

type Result<T> = std::result::Result<T, CodegenError>;

/// A label for an open control region. Branches resolve it to a relative
/// depth at emission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLabel(usize);

/// Emits instructions for one function body.
#[derive(Debug)]
pub struct FunctionEmitter {
    /// Function name, for diagnostics.
    name: String,
    instrs: Vec<Instr>,
    /// Local representations; parameters occupy the prefix.
    locals: Vec<ReprType>,
    param_count: u32,
    /// IR local id to target slot.
    slots: FxHashMap<LocalId, u32>,
    /// Open control regions (absolute indices).
    controls: usize,
}

impl FunctionEmitter {
    /// Create an emitter with local numbering seeded by the parameters.
    pub fn new(name: impl Into<String>, params: &[(LocalId, ReprType)]) -> Self {
        let mut slots = FxHashMap::default();
        let mut locals = Vec::with_capacity(params.len());
        for (i, (id, repr)) in params.iter().enumerate() {
            slots.insert(*id, i as u32);
            locals.push(*repr);
        }
        Self {
            name: name.into(),
            instrs: Vec::new(),
            param_count: params.len() as u32,
            locals,
            slots,
            controls: 0,
        }
    }

    // ==========================================================================
    // Locals
    // ==========================================================================

    /// Allocate the slot for a declared local. Re-declaration is a shape
    /// violation in the IR.
    pub fn define_local(&mut self, id: LocalId, repr: ReprType) -> Result<u32> {
        if self.slots.contains_key(&id) {
            return Err(CodegenError::shape(
                &self.name,
                format!("local {} declared twice", id.0),
            ));
        }
        let slot = self.locals.len() as u32;
        self.slots.insert(id, slot);
        self.locals.push(repr);
        Ok(slot)
    }

    /// The slot of a declared local or parameter.
    pub fn local_slot(&self, id: LocalId) -> Result<u32> {
        self.slots.get(&id).copied().ok_or_else(|| {
            CodegenError::shape(&self.name, format!("use of undeclared local {}", id.0))
        })
    }

    /// Allocate an anonymous scratch local.
    pub fn alloc_temp(&mut self, repr: ReprType) -> u32 {
        let slot = self.locals.len() as u32;
        self.locals.push(repr);
        slot
    }

    // ==========================================================================
    // Emission
    // ==========================================================================

    pub fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// Current instruction count, for tests and assertions.
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    // ==========================================================================
    // Control regions
    // ==========================================================================

    pub fn begin_block(&mut self, ty: BlockType) -> BlockLabel {
        self.emit(Instr::Block(ty));
        self.push_control()
    }

    pub fn begin_loop(&mut self, ty: BlockType) -> BlockLabel {
        self.emit(Instr::Loop(ty));
        self.push_control()
    }

    pub fn begin_if(&mut self, ty: BlockType) -> BlockLabel {
        self.emit(Instr::If(ty));
        self.push_control()
    }

    pub fn else_(&mut self) {
        self.emit(Instr::Else);
    }

    /// Open a structured-handler protected region. Catch targets are
    /// resolved relative to the region itself.
    pub fn begin_try_table(&mut self, ty: BlockType, catches: &[(Tag, BlockLabel)]) -> BlockLabel {
        let label = self.push_control();
        let catches = catches
            .iter()
            .map(|(tag, l)| CatchTarget {
                tag: *tag,
                depth: self.depth_of(*l),
            })
            .collect();
        self.instrs.push(Instr::TryTable { ty, catches });
        label
    }

    /// Open a legacy protected region.
    pub fn begin_try(&mut self, ty: BlockType) -> BlockLabel {
        self.emit(Instr::Try(ty));
        self.push_control()
    }

    /// Start a legacy handler arm; stays within the enclosing `Try` region.
    pub fn catch_(&mut self, tag: Tag) {
        self.emit(Instr::Catch(tag));
    }

    /// Close the innermost open region.
    pub fn end(&mut self) {
        debug_assert!(self.controls > 0, "end with no open control region");
        self.controls -= 1;
        self.emit(Instr::End);
    }

    pub fn br(&mut self, label: BlockLabel) {
        let depth = self.depth_of(label);
        self.emit(Instr::Br(depth));
    }

    pub fn br_if(&mut self, label: BlockLabel) {
        let depth = self.depth_of(label);
        self.emit(Instr::BrIf(depth));
    }

    /// Relative depth of a label from the current position.
    pub fn depth_of(&self, label: BlockLabel) -> u32 {
        debug_assert!(label.0 < self.controls, "branch to a closed region");
        (self.controls - 1 - label.0) as u32
    }

    fn push_control(&mut self) -> BlockLabel {
        let label = BlockLabel(self.controls);
        self.controls += 1;
        label
    }

    // ==========================================================================
    // Finalization
    // ==========================================================================

    /// Finish, returning the locals (parameters first) and instructions.
    pub fn finish(self) -> (Vec<ReprType>, u32, Vec<Instr>) {
        debug_assert!(self.controls == 0, "unclosed control region");
        (self.locals, self.param_count, self.instrs)
    }

    /// Function name for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }
}
