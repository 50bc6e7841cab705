//! Batch Hierarchy
//!
//! Rebuilds the Batch → UnitBatch → SubBatch forest from flat, keyed record
//! collections and provides the depth-first traversal shared by every writer.

mod assembler;
mod navigator;
mod walk;

pub use assembler::{assemble, Assembly, FlatHierarchy};
pub use navigator::{find_sub_batches_named, find_unit_batches};
pub use walk::{count_entities, walk, EntityCounts, HierarchyVisitor, SubBatchPosition};

use thiserror::Error;

/// Kind of record holding a dangling reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    UnitBatch,
    SubBatch,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::UnitBatch => write!(f, "unit batch"),
            RecordKind::SubBatch => write!(f, "sub-batch"),
        }
    }
}

/// Errors raised while assembling the forest
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HierarchyError {
    /// A record references a parent that is absent from the input
    #[error("{kind} '{owner_uid}' references missing parent '{ref_uid}'")]
    MissingReference {
        kind: RecordKind,
        owner_uid: String,
        ref_uid: String,
    },
}

/// Result type for hierarchy operations
pub type HierarchyResult<T> = Result<T, HierarchyError>;
