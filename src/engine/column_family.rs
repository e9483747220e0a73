//! Column family handles and per-family engine state.
//!
//! A column family is an isolated keyspace with its own memtable chain,
//! version chain, and options, sharing the WAL and the global sequence
//! with every other family. Handles are cheap ids; all lookups go
//! through the database's family map, so no owning cycles exist between
//! handles and the engine.

use std::sync::Arc;

use crate::memtable::MemTable;
use crate::types::ColumnFamilyId;

/// Cheap, copyable reference to a column family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFamilyHandle {
    id: ColumnFamilyId,
    name: String,
}

impl ColumnFamilyHandle {
    pub(crate) fn new(id: ColumnFamilyId, name: String) -> Self {
        Self { id, name }
    }

    /// Stable id (0 = default).
    pub fn id(&self) -> ColumnFamilyId {
        self.id
    }

    /// Unique name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Mutable per-family engine state (protected by the database mutex).
pub(crate) struct CfState {
    /// Active memtable receiving writes.
    pub mem: Arc<MemTable>,
    /// Immutable memtables awaiting flush, oldest first.
    pub imms: Vec<Arc<MemTable>>,
}

impl CfState {
    pub fn new(mem: Arc<MemTable>) -> Self {
        Self {
            mem,
            imms: Vec::new(),
        }
    }

    /// Memtables in read order: active first, then immutables newest
    /// first.
    pub fn read_order(&self) -> Vec<Arc<MemTable>> {
        let mut mems = Vec::with_capacity(1 + self.imms.len());
        mems.push(Arc::clone(&self.mem));
        for imm in self.imms.iter().rev() {
            mems.push(Arc::clone(imm));
        }
        mems
    }
}
