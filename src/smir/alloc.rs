//! Global allocations (`allocs` table)

use super::ty::TypeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Allocation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocId(pub i64);

/// Mutability as written by the extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutability {
    Not,
    Mut,
}

impl Mutability {
    /// `mutabilityMut` / `mutabilityNot`
    pub fn label(self) -> &'static str {
        match self {
            Mutability::Not => "mutabilityNot",
            Mutability::Mut => "mutabilityMut",
        }
    }
}

/// One entry of the `allocs` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocEntry {
    pub alloc_id: AllocId,
    pub ty: TypeId,
    pub global_alloc: GlobalAlloc,
}

/// What an allocation id refers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GlobalAlloc {
    /// A function instance (payload kept raw)
    Function(Value),
    /// A vtable for a type, with an optional trait binder
    VTable(Value),
    /// A static item, by def id
    Static(i64),
    /// Raw memory
    Memory(Allocation),
}

/// Raw bytes with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// `None` marks an uninitialised byte
    pub bytes: Vec<Option<u8>>,
    pub provenance: ProvenanceMap,
    pub align: u64,
    pub mutability: Mutability,
}

/// Pointer provenance inside an allocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceMap {
    /// `(byte offset, target allocation)` pairs
    pub ptrs: Vec<(u64, AllocId)>,
}

impl Allocation {
    /// Bytes with uninitialised positions read as zero
    pub fn data(&self) -> Vec<u8> {
        self.bytes.iter().map(|b| b.unwrap_or(0)).collect()
    }

    /// True if every provenance offset indexes into `bytes`
    pub fn provenance_in_bounds(&self) -> bool {
        self.provenance
            .ptrs
            .iter()
            .all(|(offset, _)| (*offset as usize) < self.bytes.len())
    }
}
