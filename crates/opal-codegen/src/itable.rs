//! Whole-program interface slot numbering.
//!
//! Interface dispatch reads a per-class interface table indexed by a global
//! interface slot id. Slot ids must therefore be assigned once for the whole
//! program, before any fragment is generated: a single deterministic pre-pass
//! over the class graph (unit order, then declaration order) assigns each
//! implemented interface a dense slot and records whether any class
//! implements it at all.
//!
//! An interface no class implements gets no slot; a call through it compiles
//! to a trap, since dead-code elimination already proved no receiver instance
//! can exist.

use rustc_hash::FxHashMap;

use opal_core::DeclKey;
use opal_core::ir::{CompilationUnit, Decl};

use crate::metadata::MetadataCache;
use opal_core::CodegenError;

type Result<T> = std::result::Result<T, CodegenError>;

/// Immutable interface slot assignment, shared read-only by all fragments.
#[derive(Debug, Default)]
pub struct InterfaceTableInfo {
    slots: FxHashMap<DeclKey, u32>,
    /// Assignment order, for deterministic iteration.
    order: Vec<DeclKey>,
}

impl InterfaceTableInfo {
    /// Assign slots over all units, in unit order then declaration order.
    pub fn build(units: &[CompilationUnit], cache: &MetadataCache<'_>) -> Result<Self> {
        let mut info = InterfaceTableInfo::default();
        for unit in units {
            for decl in &unit.decls {
                info.visit(decl, cache)?;
            }
        }
        Ok(info)
    }

    fn visit(&mut self, decl: &Decl, cache: &MetadataCache<'_>) -> Result<()> {
        if let Decl::Class(class) = decl {
            if !class.is_interface() && !class.flags.contains(opal_core::ir::ClassFlags::FIXED_ARRAY)
            {
                let md = cache.class_metadata(class.key)?;
                for iface in &md.interfaces {
                    self.assign(*iface);
                }
            }
            for member in &class.members {
                self.visit(member, cache)?;
            }
        }
        Ok(())
    }

    fn assign(&mut self, iface: DeclKey) {
        if !self.slots.contains_key(&iface) {
            let slot = self.order.len() as u32;
            self.slots.insert(iface, slot);
            self.order.push(iface);
        }
    }

    /// The global slot of an interface, if any class implements it.
    pub fn slot_of(&self, iface: DeclKey) -> Option<u32> {
        self.slots.get(&iface).copied()
    }

    /// Whether any class in the program implements this interface.
    pub fn has_implementors(&self, iface: DeclKey) -> bool {
        self.slots.contains_key(&iface)
    }

    /// Length of the interface-table array a class with these interfaces
    /// needs: one past the highest assigned slot.
    pub fn table_len(&self, interfaces: &[DeclKey]) -> u32 {
        interfaces
            .iter()
            .filter_map(|i| self.slot_of(*i))
            .map(|s| s + 1)
            .max()
            .unwrap_or(0)
    }
}
