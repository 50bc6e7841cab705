//! Local Sink
//!
//! Flat-file fallback for extraction results: one CSV table each for batches,
//! unit batches, sub-batches and tag readings per module or equipment.

mod local;

pub use local::{
    DateReformatter, LocalSink, BATCH_HEADER, SUB_BATCH_HEADER, TAG_HEADER, UNIT_BATCH_HEADER,
};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the local sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// A table file could not be created or opened
    #[error("Failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One record could not be written
    #[error("Failed to write {record}: {reason}")]
    Write { record: String, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Outcome of one sink call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub records_written: usize,
    /// Records skipped after a per-record failure
    pub records_failed: usize,
    pub files: Vec<PathBuf>,
}

impl SinkReport {
    pub fn merge(&mut self, other: SinkReport) {
        self.records_written += other.records_written;
        self.records_failed += other.records_failed;
        self.files.extend(other.files);
    }
}
