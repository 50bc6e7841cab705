//! Output Model
//!
//! The self-describing model produced by one extraction cycle: tags with their
//! encoded readings and the Batch → UnitBatch → SubBatch forest.

mod types;

pub use types::{
    Batch, ReadResult, Reading, ResultKind, SubBatch, Tag, TagValue, UnitBatch, ValueKind,
    SYNTHETIC_BATCH_PREFIX,
};
