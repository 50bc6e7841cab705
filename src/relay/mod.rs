//! Extraction cycles
//!
//! [`CycleRunner`] drives one read → sink → deliver pass over every configured
//! equipment or module, isolating failures per module.

mod runner;

pub use runner::{CycleReport, CycleRunner, ModuleOutcome};

use crate::codec::{text::render_tags, xml::to_xml, CodecResult};
use crate::model::{ReadResult, ResultKind};
use std::str::FromStr;

/// What each cycle reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadMode {
    /// Time series of each equipment's points
    #[default]
    Tag,
    /// Batch forest of each module
    Batch,
}

impl std::fmt::Display for ReadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadMode::Tag => write!(f, "tag"),
            ReadMode::Batch => write!(f, "batch"),
        }
    }
}

impl FromStr for ReadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tag" | "tags" => Ok(ReadMode::Tag),
            "batch" | "batches" => Ok(ReadMode::Batch),
            other => Err(format!("unknown read mode: {}", other)),
        }
    }
}

/// Payload format sent to the broker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Serialization {
    #[default]
    Xml,
    /// `name: {encoded}` per tag; batch results still go out as XML
    Text,
}

impl std::fmt::Display for Serialization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Serialization::Xml => write!(f, "xml"),
            Serialization::Text => write!(f, "text"),
        }
    }
}

impl FromStr for Serialization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xml" => Ok(Serialization::Xml),
            "text" | "txt" => Ok(Serialization::Text),
            other => Err(format!("unknown serialization: {}", other)),
        }
    }
}

/// Render a result as a broker payload
pub fn serialize_result(result: &ReadResult, format: Serialization) -> CodecResult<String> {
    match (format, result.kind) {
        (Serialization::Text, ResultKind::Tag) => Ok(render_tags(&result.tags)),
        _ => to_xml(result),
    }
}
