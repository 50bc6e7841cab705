//! Core data types for the extraction output model
//!
//! This module defines the types every reader produces and every writer consumes:
//! - `Tag` / `Reading` / `TagValue`: one historian point and its time-ordered readings
//! - `Batch`, `UnitBatch`, `SubBatch`: the batch-production forest
//! - `ReadResult`: the aggregate result of one extraction cycle

use crate::codec::{self, Readings, Separators};
use crate::hierarchy::{self, EntityCounts};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Prefix of the uid given to placeholder batches that own an orphaned unit batch
pub const SYNTHETIC_BATCH_PREFIX: &str = "dummy-for-unitbatch-";

/// How the primary values of a tag are typed
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Continuous measurements, rendered with 8 fractional digits
    #[default]
    Decimal,
    /// Integer codes or enumerated states
    Integer,
    /// Free text, carried in the secondary value slot
    String,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Decimal => write!(f, "decimal"),
            ValueKind::Integer => write!(f, "integer"),
            ValueKind::String => write!(f, "string"),
        }
    }
}

impl FromStr for ValueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "decimal" | "float" | "double" => Ok(ValueKind::Decimal),
            "integer" | "int" | "state" => Ok(ValueKind::Integer),
            "string" | "text" => Ok(ValueKind::String),
            other => Err(format!("unknown value kind: {}", other)),
        }
    }
}

/// Primary value of a single reading
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// No primary value (string readings, undefined decimals)
    Empty,
    /// Finite decimal; build with [`TagValue::decimal`]
    Decimal(f64),
    Integer(i64),
    /// Canonical state label of an enumerated value
    State(String),
}

impl TagValue {
    /// Decimal value; NaN and infinities collapse to `Empty`
    pub fn decimal(value: f64) -> Self {
        if value.is_finite() {
            TagValue::Decimal(value)
        } else {
            TagValue::Empty
        }
    }

    /// Enumerated state label; an empty label collapses to `Empty`
    pub fn state(label: impl Into<String>) -> Self {
        let label = label.into();
        if label.is_empty() {
            TagValue::Empty
        } else {
            TagValue::State(label)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, TagValue::Empty)
    }
}

/// One `(timestamp, value, secondaryValue, status)` tuple
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Timestamp in the reader's external date format
    pub timestamp: String,
    pub value: TagValue,
    /// Secondary value; holds the text of string-typed points
    pub secondary: String,
    /// Quality code, 0 when the backend reports none
    pub status: i32,
}

impl Reading {
    /// Create a reading with an empty secondary value and status 0
    pub fn new(timestamp: impl Into<String>, value: TagValue) -> Self {
        Self {
            timestamp: timestamp.into(),
            value,
            secondary: String::new(),
            status: 0,
        }
    }

    /// Create a string reading: text in the secondary slot, no primary value
    pub fn text(timestamp: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            value: TagValue::Empty,
            secondary: text.into(),
            status: 0,
        }
    }

    /// Builder method: set the quality status
    pub fn status(mut self, status: i32) -> Self {
        self.status = status;
        self
    }

    /// Builder method: set the secondary value
    pub fn secondary(mut self, secondary: impl Into<String>) -> Self {
        self.secondary = secondary.into();
        self
    }

    /// True when the reading needs no secondary value or status to be represented
    pub fn is_trivial(&self) -> bool {
        self.secondary.is_empty() && self.status == 0
    }
}

/// A named historian point and its encoded readings
///
/// Readings are kept in their encoded form and decoded on demand with the
/// separators of the owning `ReadResult`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub is_phase: bool,
    pub value_kind: ValueKind,
    encoded: String,
}

impl Tag {
    /// Encode `readings` into a new tag
    pub fn encode(
        name: impl Into<String>,
        is_phase: bool,
        value_kind: ValueKind,
        readings: &[Reading],
        separators: &Separators,
    ) -> Self {
        Self {
            name: name.into(),
            is_phase,
            value_kind,
            encoded: codec::encode_readings(readings, value_kind, separators),
        }
    }

    /// Wrap an already encoded reading stream
    pub fn from_encoded(
        name: impl Into<String>,
        is_phase: bool,
        value_kind: ValueKind,
        encoded: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            is_phase,
            value_kind,
            encoded: encoded.into(),
        }
    }

    /// The encoded reading stream
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// True when the tag carries no readings
    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    /// Lazily decode readings; malformed readings surface as errors without
    /// stopping the iteration.
    pub fn readings<'a>(&'a self, separators: &'a Separators) -> Readings<'a> {
        codec::decode_readings(&self.encoded, self.value_kind, separators)
    }

    /// Decode every well-formed reading and count the malformed ones
    pub fn decode_lossy(&self, separators: &Separators) -> (Vec<Reading>, usize) {
        let mut readings = Vec::new();
        let mut malformed = 0;

        for reading in self.readings(separators) {
            match reading {
                Ok(r) => readings.push(r),
                Err(e) => {
                    tracing::warn!(tag = %self.name, error = %e, "Skipping malformed reading");
                    malformed += 1;
                }
            }
        }

        (readings, malformed)
    }
}

/// A recursively nested phase or step record under a unit batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubBatch {
    pub uid: String,
    pub unit_batch_uid: String,
    pub name: String,
    pub path: String,
    pub start_time: String,
    /// Absent while the sub-batch is still running
    pub end_time: Option<String>,
    pub heading_uid: Option<String>,
    /// Depth below the unit batch, 0-based
    pub level: u32,
    /// Absent for sub-batches hanging directly under the unit batch
    pub parent_uid: Option<String>,
    pub children: Vec<SubBatch>,
}

impl SubBatch {
    /// Create a root-level sub-batch of `unit_batch_uid`
    pub fn new(
        uid: impl Into<String>,
        unit_batch_uid: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            unit_batch_uid: unit_batch_uid.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder method: nest under another sub-batch
    pub fn parent(mut self, parent_uid: impl Into<String>) -> Self {
        self.parent_uid = non_empty(parent_uid.into());
        self
    }

    /// Builder method: set start and end times
    pub fn times(mut self, start: impl Into<String>, end: Option<String>) -> Self {
        self.start_time = start.into();
        self.end_time = end.and_then(non_empty);
        self
    }

    /// Builder method: set the depth level
    pub fn level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Builder method: set the heading uid
    pub fn heading(mut self, heading_uid: impl Into<String>) -> Self {
        self.heading_uid = non_empty(heading_uid.into());
        self
    }

    /// Builder method: set the historian path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Parent sub-batch uid, if any
    pub fn parent_uid(&self) -> Option<&str> {
        self.parent_uid.as_deref().filter(|s| !s.is_empty())
    }
}

/// An equipment-scoped execution record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitBatch {
    pub uid: String,
    pub batch_id: String,
    pub product: String,
    pub procedure: String,
    pub module_uid: String,
    /// Absent for unit batches not assigned to a batch
    pub batch_uid: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub sub_batches: Vec<SubBatch>,
}

impl UnitBatch {
    pub fn new(uid: impl Into<String>, batch_id: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            batch_id: batch_id.into(),
            ..Default::default()
        }
    }

    /// Builder method: assign to a batch
    pub fn batch(mut self, batch_uid: impl Into<String>) -> Self {
        self.batch_uid = non_empty(batch_uid.into());
        self
    }

    /// Builder method: set product and procedure
    pub fn product(mut self, product: impl Into<String>, procedure: impl Into<String>) -> Self {
        self.product = product.into();
        self.procedure = procedure.into();
        self
    }

    /// Builder method: set the module uid
    pub fn module(mut self, module_uid: impl Into<String>) -> Self {
        self.module_uid = module_uid.into();
        self
    }

    /// Builder method: set start and end times
    pub fn times(mut self, start: impl Into<String>, end: Option<String>) -> Self {
        self.start_time = start.into();
        self.end_time = end.and_then(non_empty);
        self
    }

    /// Owning batch uid, if any
    pub fn batch_uid(&self) -> Option<&str> {
        self.batch_uid.as_deref().filter(|s| !s.is_empty())
    }
}

/// A top-level manufacturing run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub uid: String,
    pub batch_id: String,
    pub product: String,
    pub recipe: String,
    pub campaign_uid: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub unit_batches: Vec<UnitBatch>,
}

impl Batch {
    pub fn new(uid: impl Into<String>, batch_id: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            batch_id: batch_id.into(),
            ..Default::default()
        }
    }

    /// Placeholder batch owning exactly one orphaned unit batch
    pub fn synthetic_for(unit_batch: UnitBatch) -> Self {
        let uid = format!("{}{}", SYNTHETIC_BATCH_PREFIX, unit_batch.uid);
        Self {
            batch_id: uid.clone(),
            uid,
            unit_batches: vec![unit_batch],
            ..Default::default()
        }
    }

    /// Builder method: set product and recipe
    pub fn product(mut self, product: impl Into<String>, recipe: impl Into<String>) -> Self {
        self.product = product.into();
        self.recipe = recipe.into();
        self
    }

    /// Builder method: set the campaign uid
    pub fn campaign(mut self, campaign_uid: impl Into<String>) -> Self {
        self.campaign_uid = non_empty(campaign_uid.into());
        self
    }

    /// Builder method: set start and end times
    pub fn times(mut self, start: impl Into<String>, end: Option<String>) -> Self {
        self.start_time = start.into();
        self.end_time = end.and_then(non_empty);
        self
    }

    /// True for placeholder batches created for orphaned unit batches
    pub fn is_synthetic(&self) -> bool {
        self.uid.starts_with(SYNTHETIC_BATCH_PREFIX)
    }
}

/// What a read produced
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    #[default]
    Tag,
    Batch,
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultKind::Tag => write!(f, "tag"),
            ResultKind::Batch => write!(f, "batch"),
        }
    }
}

impl FromStr for ResultKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tag" => Ok(ResultKind::Tag),
            "batch" => Ok(ResultKind::Batch),
            other => Err(format!("unknown result type: {}", other)),
        }
    }
}

/// Aggregate output of one extraction cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub kind: ResultKind,
    pub interval_start: String,
    pub interval_end: String,
    /// When the read finished, in the external date format
    pub produced_at: String,
    pub schedule_frequency_secs: Option<u64>,
    /// Synthetic batches first, then real batches in discovery order
    pub batches: Vec<Batch>,
    pub tags: Vec<Tag>,
    /// Separators every tag in this result is encoded with
    pub separators: Separators,
}

impl ReadResult {
    pub fn new(
        kind: ResultKind,
        interval_start: impl Into<String>,
        interval_end: impl Into<String>,
        separators: Separators,
    ) -> Self {
        Self {
            kind,
            interval_start: interval_start.into(),
            interval_end: interval_end.into(),
            produced_at: String::new(),
            schedule_frequency_secs: None,
            batches: Vec::new(),
            tags: Vec::new(),
            separators,
        }
    }

    /// Add a tag; tags without readings are not emitted
    pub fn push_tag(&mut self, tag: Tag) -> bool {
        if tag.is_empty() {
            tracing::debug!(tag = %tag.name, "Omitting tag without readings");
            return false;
        }
        self.tags.push(tag);
        true
    }

    /// Look up a tag by name
    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == name)
    }

    /// Count batches, unit batches and sub-batches in the forest
    pub fn entity_counts(&self) -> EntityCounts {
        hierarchy::count_entities(&self.batches)
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.tags.is_empty()
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_value_decimal_nan() {
        assert_eq!(TagValue::decimal(f64::NAN), TagValue::Empty);
        assert_eq!(TagValue::decimal(1.5), TagValue::Decimal(1.5));
    }

    #[test]
    fn test_reading_trivial() {
        assert!(Reading::new("t1", TagValue::Integer(3)).is_trivial());
        assert!(!Reading::text("t1", "leaktest").is_trivial());
        assert!(!Reading::new("t1", TagValue::Empty).status(2).is_trivial());
    }

    #[test]
    fn test_synthetic_batch() {
        let batch = Batch::synthetic_for(UnitBatch::new("U1", "LOT-1"));
        assert_eq!(batch.uid, "dummy-for-unitbatch-U1");
        assert_eq!(batch.batch_id, batch.uid);
        assert_eq!(batch.unit_batches.len(), 1);
        assert!(batch.is_synthetic());
        assert!(!Batch::new("B1", "LOT-1").is_synthetic());
    }

    #[test]
    fn test_empty_references_normalize_to_none() {
        let ub = UnitBatch::new("U1", "LOT").batch("");
        assert_eq!(ub.batch_uid(), None);

        let sb = SubBatch::new("S1", "U1", "Charge").parent("");
        assert_eq!(sb.parent_uid(), None);

        let sb = SubBatch::new("S2", "U1", "Heat").parent("S1");
        assert_eq!(sb.parent_uid(), Some("S1"));
    }

    #[test]
    fn test_push_tag_drops_empty() {
        let seps = Separators::default();
        let mut result = ReadResult::new(ResultKind::Tag, "a", "b", seps.clone());

        assert!(!result.push_tag(Tag::encode("EMPTY", false, ValueKind::Decimal, &[], &seps)));
        assert!(result.push_tag(Tag::encode(
            "T1",
            false,
            ValueKind::Decimal,
            &[Reading::new("t1", TagValue::Decimal(1.0))],
            &seps,
        )));

        assert_eq!(result.tags.len(), 1);
        assert!(result.tag("T1").is_some());
        assert!(result.tag("EMPTY").is_none());
    }

    #[test]
    fn test_value_kind_parse() {
        assert_eq!("decimal".parse::<ValueKind>().unwrap(), ValueKind::Decimal);
        assert_eq!("STRING".parse::<ValueKind>().unwrap(), ValueKind::String);
        assert!("blob".parse::<ValueKind>().is_err());
        assert_eq!(ValueKind::Integer.to_string(), "integer");
    }
}
