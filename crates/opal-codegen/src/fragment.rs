//! Per-unit module fragments.
//!
//! One [`ModuleFragment`] is populated per compilation unit, monotonically,
//! and consumed exactly once by the merge step. A fragment only ever creates
//! or references symbols by key and never reads another fragment's bound
//! values, which is what allows distinct fragments to be populated by
//! independent worker threads.

use rustc_hash::FxHashMap;
use xxhash_rust::xxh64::xxh64;

use opal_core::{CodegenError, DeclKey};

use crate::instr::{DataKey, Instr, StringKey};
use crate::repr::{FieldStorage, ReprType};
use crate::symbol::{Symbol, SymbolTable};

type Result<T> = std::result::Result<T, CodegenError>;

// ============================================================================
// Generated declarations
// ============================================================================

/// A function-type signature: parameter representations plus an optional
/// result representation (never-typed results produce none).
#[derive(Debug, Clone, PartialEq)]
pub struct FuncType {
    pub params: Vec<ReprType>,
    pub result: Option<ReprType>,
}

/// A generated function: either a body or an import record.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledFunction {
    Defined(FunctionBody),
    Imported(ImportedFunction),
}

impl CompiledFunction {
    pub fn signature(&self) -> DeclKey {
        match self {
            CompiledFunction::Defined(b) => b.signature,
            CompiledFunction::Imported(i) => i.signature,
        }
    }
}

/// A compiled function body: a flat instruction sequence plus its locals.
/// Parameters occupy the first `param_count` locals.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub signature: DeclKey,
    pub locals: Vec<ReprType>,
    pub param_count: u32,
    pub instrs: Vec<Instr>,
}

/// An externally provided function; no body is generated.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedFunction {
    pub signature: DeclKey,
    pub module: String,
    pub name: String,
}

/// A struct type declaration with its supertype link. Used for instance
/// layouts, vtables, and interface sub-tables alike.
#[derive(Debug, Clone, PartialEq)]
pub struct StructTypeDecl {
    pub supertype: Option<DeclKey>,
    pub fields: Vec<StructField>,
}

/// One struct field's storage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructField {
    pub storage: FieldStorage,
    pub mutable: bool,
}

/// An array type declaration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrayTypeDecl {
    pub elem: FieldStorage,
    pub mutable: bool,
}

/// A global value with a constant initializer. Statics that need executable
/// initialization get a zero/null placeholder here and a deferred entry.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDecl {
    pub repr: ReprType,
    pub mutable: bool,
    pub init: Vec<Instr>,
}

/// A class's vtable value: one function reference per virtual slot.
/// `None` entries are null-filled slots under incomplete-implementation
/// tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct VtableValue {
    /// The vtable struct type.
    pub ty: DeclKey,
    pub entries: Vec<Option<DeclKey>>,
}

/// A class's interface-table value: sub-tables indexed by global interface
/// slot. Unoccupied slots are null.
#[derive(Debug, Clone, PartialEq)]
pub struct ItableValue {
    /// One past the highest occupied slot.
    pub len: u32,
    pub tables: Vec<ItableSubTable>,
}

/// One interface's sub-table within a class's itable.
#[derive(Debug, Clone, PartialEq)]
pub struct ItableSubTable {
    pub interface: DeclKey,
    /// Global interface slot this sub-table occupies.
    pub slot: u32,
    /// One function reference per interface method, in interface order.
    pub methods: Vec<Option<DeclKey>>,
}

/// An exported function under its target-visible name.
#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub name: String,
    pub function: DeclKey,
}

/// Constant type-descriptor record for runtime type introspection.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub class: DeclKey,
    /// Qualified name, pooled.
    pub name: StringKey,
    pub field_count: u32,
    pub superclass: Option<DeclKey>,
    pub interfaces: Vec<DeclKey>,
}

/// A static-field initializer deferred to module start-up.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredInit {
    pub field: DeclKey,
    /// Scratch locals the initializer needs; the merge step re-homes them
    /// into the start routine's frame.
    pub locals: Vec<ReprType>,
    /// Value instructions; the start routine appends the global store.
    pub instrs: Vec<Instr>,
}

// ============================================================================
// String and data pools
// ============================================================================

const STRING_DOMAIN: u64 = 0x8b44f1d72c3a96e5;
const DATA_DOMAIN: u64 = 0x31c9a5e87d60f24b;

/// A pooled string literal. The address and pool id are symbols bound by the
/// merge step once the final pool layout is known.
#[derive(Debug, Clone, PartialEq)]
pub struct StringEntry {
    pub content: String,
    pub address: Symbol<u32>,
    pub pool_id: Symbol<u32>,
}

/// Deduplicated string-literal pool.
#[derive(Debug, Clone, Default)]
pub struct StringPool {
    entries: Vec<StringEntry>,
    index: FxHashMap<StringKey, usize>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its content key. Identical contents share
    /// one entry.
    pub fn intern(&mut self, content: &str) -> StringKey {
        let key = StringKey(xxh64(content.as_bytes(), STRING_DOMAIN));
        if !self.index.contains_key(&key) {
            self.index.insert(key, self.entries.len());
            self.entries.push(StringEntry {
                content: content.to_string(),
                address: Symbol::Unbound,
                pool_id: Symbol::Unbound,
            });
        }
        key
    }

    pub fn get(&self, key: StringKey) -> Option<&StringEntry> {
        self.index.get(&key).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[StringEntry] {
        &self.entries
    }

    /// Absorb another pool, deduplicating by content.
    pub fn merge(&mut self, other: StringPool) {
        for entry in other.entries {
            self.intern(&entry.content);
        }
    }

    /// Bind every entry's address and pool id in pool order. Called once,
    /// by the merge step.
    pub fn assign_ids(&mut self) -> Result<()> {
        let mut address = 0u32;
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry
                .pool_id
                .bind(i as u32, DeclKey::EMPTY, &entry.content)?;
            entry.address.bind(address, DeclKey::EMPTY, &entry.content)?;
            address += entry.content.len() as u32;
        }
        Ok(())
    }
}

/// A constant-data segment.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub bytes: Vec<u8>,
    pub elem_width: u8,
}

/// Deduplicated constant-data pool (content + element width).
#[derive(Debug, Clone, Default)]
pub struct DataPool {
    segments: Vec<DataSegment>,
    index: FxHashMap<DataKey, usize>,
}

impl DataPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, bytes: Vec<u8>, elem_width: u8) -> DataKey {
        let mut keyed = bytes.clone();
        keyed.push(elem_width);
        let key = DataKey(xxh64(&keyed, DATA_DOMAIN));
        if !self.index.contains_key(&key) {
            self.index.insert(key, self.segments.len());
            self.segments.push(DataSegment { bytes, elem_width });
        }
        key
    }

    pub fn get(&self, key: DataKey) -> Option<&DataSegment> {
        self.index.get(&key).map(|&i| &self.segments[i])
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[DataSegment] {
        &self.segments
    }

    pub fn merge(&mut self, other: DataPool) {
        for seg in other.segments {
            self.intern(seg.bytes, seg.elem_width);
        }
    }
}

// ============================================================================
// The fragment
// ============================================================================

/// The per-unit aggregation of everything codegen produces.
#[derive(Debug, Default)]
pub struct ModuleFragment {
    pub unit_name: String,

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
    pub deferred_inits: Vec<DeferredInit>,
}

impl ModuleFragment {
    pub fn new(unit_name: impl Into<String>) -> Self {
        Self {
            unit_name: unit_name.into(),
            ..Default::default()
        }
    }
}
