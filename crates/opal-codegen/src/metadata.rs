//! Class and interface layout metadata.
//!
//! [`ClassMetadata`] is a pure function of the class declaration graph:
//! the ordered virtual-method slot list, the transitive interface set, and
//! the instance field layout. It is computed leaf-first over the superclass
//! chain and memoized in a [`MetadataCache`] that is safe under concurrent
//! first-use: a population race is single-writer-wins, and the computation
//! is deterministic, so every reader sees an equivalent immutable result.
//!
//! The computation walks an arena of declarations indexed by key
//! ([`DeclGraph`]), never live object references, so re-entrancy and caching
//! are trivially safe and an accidentally cyclic inheritance chain is
//! detected instead of looping.

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::{FxHashMap, FxHashSet};

use opal_core::ir::{ClassDecl, CompilationUnit, Decl, FnFlags, FunctionDecl, StaticFieldDecl};
use opal_core::{CodegenError, DeclKey};

use crate::repr::{self, FieldStorage};

type Result<T> = std::result::Result<T, CodegenError>;

/// Index of the vtable reference in every instance struct.
pub const VTABLE_FIELD: u32 = 0;
/// Index of the interface-table reference in every instance struct.
pub const ITABLE_FIELD: u32 = 1;
/// First index available to declared fields.
pub const FIELDS_START: u32 = 2;

// ============================================================================
// Declaration graph
// ============================================================================

/// All declarations of a compilation run, indexed by key.
///
/// Built once before codegen starts; fragments share it read-only.
#[derive(Debug, Default)]
pub struct DeclGraph<'a> {
    classes: FxHashMap<DeclKey, &'a ClassDecl>,
    functions: FxHashMap<DeclKey, &'a FunctionDecl>,
    static_fields: FxHashMap<DeclKey, &'a StaticFieldDecl>,
}

impl<'a> DeclGraph<'a> {
    /// Index every declaration of every unit. Duplicate keys are fatal.
    pub fn build(units: &'a [CompilationUnit]) -> Result<Self> {
        let mut graph = DeclGraph::default();
        for unit in units {
            for decl in &unit.decls {
                graph.register(decl)?;
            }
        }
        Ok(graph)
    }

    fn register(&mut self, decl: &'a Decl) -> Result<()> {
        match decl {
            Decl::Function(f) => {
                if self.functions.insert(f.key, f).is_some() {
                    return Err(CodegenError::duplicate(f.key, &f.name));
                }
            }
            Decl::Class(c) => {
                if self.classes.insert(c.key, c).is_some() {
                    return Err(CodegenError::duplicate(c.key, &c.name));
                }
                for member in &c.members {
                    self.register(member)?;
                }
            }
            Decl::StaticField(f) => {
                if self.static_fields.insert(f.key, f).is_some() {
                    return Err(CodegenError::duplicate(f.key, &f.name));
                }
            }
        }
        Ok(())
    }

    pub fn class(&self, key: DeclKey) -> Result<&'a ClassDecl> {
        self.classes
            .get(&key)
            .copied()
            .ok_or_else(|| CodegenError::shape(key.to_string(), "unknown class"))
    }

    pub fn function(&self, key: DeclKey) -> Result<&'a FunctionDecl> {
        self.functions
            .get(&key)
            .copied()
            .ok_or_else(|| CodegenError::shape(key.to_string(), "unknown function"))
    }

    pub fn static_field(&self, key: DeclKey) -> Result<&'a StaticFieldDecl> {
        self.static_fields
            .get(&key)
            .copied()
            .ok_or_else(|| CodegenError::shape(key.to_string(), "unknown static field"))
    }

    /// Human-readable name for diagnostics; falls back to the hex key.
    pub fn name_of(&self, key: DeclKey) -> String {
        if let Some(c) = self.classes.get(&key) {
            return c.name.clone();
        }
        if let Some(f) = self.functions.get(&key) {
            return f.name.clone();
        }
        if let Some(f) = self.static_fields.get(&key) {
            return f.name.clone();
        }
        key.to_string()
    }

    /// Whether `sub` equals `ancestor` or transitively extends it.
    pub fn extends(&self, sub: DeclKey, ancestor: DeclKey) -> bool {
        let mut cur = Some(sub);
        let mut seen = FxHashSet::default();
        while let Some(key) = cur {
            if key == ancestor {
                return true;
            }
            if !seen.insert(key) {
                return false; // cycle; reported elsewhere
            }
            cur = self.classes.get(&key).and_then(|c| c.superclass);
        }
        false
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// One virtual-method slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualSlot {
    /// Override-matching signature.
    pub signature: DeclKey,
    /// The concrete-most implementation visible at this class.
    pub function: DeclKey,
    /// The visible implementation is abstract (no body).
    pub is_abstract: bool,
}

/// Layout of one instance field, with its absolute struct index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub field: DeclKey,
    pub storage: FieldStorage,
    pub index: u32,
    pub mutable: bool,
}

/// Derived layout metadata for one class.
///
/// Immutable once computed. Slot indices are stable under inheritance: an
/// overriding method keeps its ancestor's slot, newly introduced virtual
/// methods are appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMetadata {
    pub key: DeclKey,
    pub superclass: Option<DeclKey>,
    /// Slot index = position in this list.
    pub virtual_methods: Vec<VirtualSlot>,
    /// Transitively implemented interfaces, first-seen order, deduplicated.
    pub interfaces: Vec<DeclKey>,
    /// Inherited fields first, then own fields; indices start after the
    /// two implicit header fields (vtable, itable).
    pub fields: Vec<FieldLayout>,
}

impl ClassMetadata {
    /// Slot index of the virtual method with this signature.
    pub fn slot_of(&self, signature: DeclKey) -> Option<u32> {
        self.virtual_methods
            .iter()
            .position(|s| s.signature == signature)
            .map(|i| i as u32)
    }

    /// Layout of the given field.
    pub fn field(&self, key: DeclKey) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.field == key)
    }
}

/// One interface method slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSlot {
    pub signature: DeclKey,
    /// The declaring method; carries a default body when `has_default`.
    pub function: DeclKey,
    pub has_default: bool,
}

/// Derived metadata for one interface: its own method list, in declaration
/// order. Interfaces do not inherit each other's tables; each itable row is
/// independent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceMetadata {
    pub key: DeclKey,
    pub methods: Vec<InterfaceSlot>,
}

impl InterfaceMetadata {
    pub fn method_index(&self, signature: DeclKey) -> Option<u32> {
        self.methods
            .iter()
            .position(|m| m.signature == signature)
            .map(|i| i as u32)
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Concurrent memoizing cache over the declaration graph.
///
/// Scoped to one compilation run and torn down with it; never a singleton.
pub struct MetadataCache<'a> {
    graph: &'a DeclGraph<'a>,
    classes: DashMap<DeclKey, Arc<ClassMetadata>>,
    interfaces: DashMap<DeclKey, Arc<InterfaceMetadata>>,
}

impl<'a> MetadataCache<'a> {
    pub fn new(graph: &'a DeclGraph<'a>) -> Self {
        Self {
            graph,
            classes: DashMap::new(),
            interfaces: DashMap::new(),
        }
    }

    pub fn graph(&self) -> &'a DeclGraph<'a> {
        self.graph
    }

    /// Metadata for a (non-interface) class, computing ancestors first.
    pub fn class_metadata(&self, key: DeclKey) -> Result<Arc<ClassMetadata>> {
        self.class_metadata_guarded(key, &mut FxHashSet::default())
    }

    /// Leaf-first memoized recursion over the superclass chain. `visiting`
    /// detects a cyclic chain, which is a shape violation.
    fn class_metadata_guarded(
        &self,
        key: DeclKey,
        visiting: &mut FxHashSet<DeclKey>,
    ) -> Result<Arc<ClassMetadata>> {
        if let Some(found) = self.classes.get(&key) {
            return Ok(found.clone());
        }
        let decl = self.graph.class(key)?;
        if decl.is_interface() {
            return Err(CodegenError::shape(
                &decl.name,
                "interface used as a class in an inheritance chain",
            ));
        }
        if !visiting.insert(key) {
            return Err(CodegenError::shape(&decl.name, "cyclic inheritance chain"));
        }

        let superclass = match decl.superclass {
            Some(s) => Some(self.class_metadata_guarded(s, visiting)?),
            None => None,
        };
        let md = Arc::new(self.compute_class(decl, superclass.as_deref())?);
        // A concurrent first-use may have won the race; either copy is
        // equivalent, the computation being pure and deterministic.
        let cached = self.classes.entry(key).or_insert_with(|| md.clone());
        Ok(cached.clone())
    }

    fn compute_class(
        &self,
        decl: &ClassDecl,
        superclass: Option<&ClassMetadata>,
    ) -> Result<ClassMetadata> {
        // Virtual slots: copy the superclass's list, then overwrite matching
        // signatures (positional search finds the first ancestor slot in
        // declaration order) and append newly introduced virtual methods.
        let mut virtuals = superclass.map(|s| s.virtual_methods.clone()).unwrap_or_default();
        for method in decl.methods() {
            if method.flags.contains(FnFlags::BRIDGE) || !method.is_virtual() {
                continue;
            }
            let slot = VirtualSlot {
                signature: method.signature(),
                function: method.key,
                is_abstract: method.flags.contains(FnFlags::ABSTRACT),
            };
            match virtuals.iter().position(|s| s.signature == slot.signature) {
                Some(i) => virtuals[i] = slot,
                None => virtuals.push(slot),
            }
        }

        // Transitive interfaces: superclass's, then own declared, first-seen
        // order preserved.
        let mut interfaces: Vec<DeclKey> =
            superclass.map(|s| s.interfaces.clone()).unwrap_or_default();
        for iface in &decl.interfaces {
            if !interfaces.contains(iface) {
                interfaces.push(*iface);
            }
        }

        // Fields: inherited first, own appended after.
        let mut fields = superclass.map(|s| s.fields.clone()).unwrap_or_default();
        let mut next = FIELDS_START + fields.len() as u32;
        for field in &decl.fields {
            fields.push(FieldLayout {
                field: field.key,
                storage: repr::field_storage(&field.ty, self.graph, &decl.name)?,
                index: next,
                mutable: field.mutable,
            });
            next += 1;
        }

        Ok(ClassMetadata {
            key: decl.key,
            superclass: decl.superclass,
            virtual_methods: virtuals,
            interfaces,
            fields,
        })
    }

    /// Metadata for an interface: its own abstract-method list, declaration
    /// order, no inheritance merge.
    pub fn interface_metadata(&self, key: DeclKey) -> Result<Arc<InterfaceMetadata>> {
        if let Some(found) = self.interfaces.get(&key) {
            return Ok(found.clone());
        }
        let decl = self.graph.class(key)?;
        if !decl.is_interface() {
            return Err(CodegenError::shape(&decl.name, "class used as an interface"));
        }
        let methods = decl
            .methods()
            .map(|m| InterfaceSlot {
                signature: m.signature(),
                function: m.key,
                has_default: m.body.is_some(),
            })
            .collect();
        let md = Arc::new(InterfaceMetadata { key, methods });
        self.interfaces.entry(key).or_insert_with(|| md.clone());
        Ok(md)
    }
}

// ============================================================================
// Test fixtures
// ============================================================================
