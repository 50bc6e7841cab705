//! XML payload
//!
//! Writes a `ReadResult` as a self-describing `<pidata>` document and parses
//! such documents back. Batch records nest as `batch` → `unitbatch` →
//! `subbatch`*; tags carry their encoded stream as element text.

use super::{CodecError, CodecResult, Separators};
use crate::model::{Batch, ReadResult, ResultKind, SubBatch, Tag, UnitBatch, ValueKind};
use serde::{Deserialize, Serialize};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// Serialize a result into an XML document
pub fn to_xml(result: &ReadResult) -> CodecResult<String> {
    let doc = PiDataXml::from(result);
    let body = quick_xml::se::to_string_with_root("pidata", &doc)
        .map_err(|e| CodecError::Xml(e.to_string()))?;
    Ok(format!("{}{}", XML_DECLARATION, body))
}

/// Parse an XML document back into a result
pub fn from_xml(xml: &str) -> CodecResult<ReadResult> {
    let doc: PiDataXml =
        quick_xml::de::from_str(xml).map_err(|e| CodecError::Xml(e.to_string()))?;
    doc.into_result()
}

// ============================================
// Document DTOs
// ============================================

#[derive(Debug, Serialize, Deserialize)]
struct PiDataXml {
    #[serde(rename = "@type")]
    kind: String,
    #[serde(rename = "@intervalstart", default)]
    interval_start: String,
    #[serde(rename = "@intervalend", default)]
    interval_end: String,
    #[serde(rename = "@readfinished", default)]
    read_finished: String,
    #[serde(
        rename = "@schedulefrequencysec",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    schedule_frequency_secs: Option<u64>,
    #[serde(rename = "@timeseparator", default)]
    time_separator: Option<String>,
    #[serde(rename = "@fieldseparator", default)]
    field_separator: Option<String>,
    #[serde(rename = "@valueseparator", default)]
    value_separator: Option<String>,
    #[serde(rename = "batch", default)]
    batches: Vec<BatchXml>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<TagsXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BatchXml {
    #[serde(rename = "@uid")]
    uid: String,
    #[serde(rename = "@batchid", default)]
    batch_id: String,
    #[serde(rename = "@starttime", default)]
    start_time: String,
    #[serde(rename = "@endtime", default, skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
    #[serde(rename = "@product", default)]
    product: String,
    #[serde(rename = "@recipe", default)]
    recipe: String,
    #[serde(rename = "@campaignuid", default, skip_serializing_if = "Option::is_none")]
    campaign_uid: Option<String>,
    #[serde(rename = "unitbatch", default)]
    unit_batches: Vec<UnitBatchXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct UnitBatchXml {
    #[serde(rename = "@uid")]
    uid: String,
    #[serde(rename = "@batchid", default)]
    batch_id: String,
    #[serde(rename = "@starttime", default)]
    start_time: String,
    #[serde(rename = "@endtime", default, skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
    #[serde(rename = "@product", default)]
    product: String,
    #[serde(rename = "@procedure", default)]
    procedure: String,
    #[serde(rename = "@moduleuid", default)]
    module_uid: String,
    #[serde(rename = "@batchuid", default, skip_serializing_if = "Option::is_none")]
    batch_uid: Option<String>,
    #[serde(rename = "subbatch", default)]
    sub_batches: Vec<SubBatchXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SubBatchXml {
    #[serde(rename = "@uid")]
    uid: String,
    #[serde(rename = "@unitbatchuid", default)]
    unit_batch_uid: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@path", default)]
    path: String,
    #[serde(rename = "@starttime", default)]
    start_time: String,
    #[serde(rename = "@endtime", default, skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
    #[serde(rename = "@headinguid", default, skip_serializing_if = "Option::is_none")]
    heading_uid: Option<String>,
    #[serde(rename = "@level", default)]
    level: u32,
    #[serde(rename = "@childcount", default)]
    child_count: usize,
    #[serde(rename = "@parentuid", default, skip_serializing_if = "Option::is_none")]
    parent_uid: Option<String>,
    #[serde(rename = "subbatch", default)]
    children: Vec<SubBatchXml>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TagsXml {
    #[serde(rename = "tag", default)]
    tags: Vec<TagXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TagXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@isphase", default)]
    is_phase: bool,
    #[serde(rename = "@valuekind", default, skip_serializing_if = "Option::is_none")]
    value_kind: Option<String>,
    #[serde(rename = "$text", default)]
    values: String,
}

// ============================================
// Conversions
// ============================================

impl From<&ReadResult> for PiDataXml {
    fn from(result: &ReadResult) -> Self {
        let tags = if result.tags.is_empty() {
            None
        } else {
            Some(TagsXml {
                tags: result.tags.iter().map(TagXml::from).collect(),
            })
        };

        Self {
            kind: result.kind.to_string(),
            interval_start: result.interval_start.clone(),
            interval_end: result.interval_end.clone(),
            read_finished: result.produced_at.clone(),
            schedule_frequency_secs: result.schedule_frequency_secs,
            time_separator: Some(result.separators.time().to_string()),
            field_separator: Some(result.separators.field().to_string()),
            value_separator: Some(result.separators.value().to_string()),
            batches: result.batches.iter().map(BatchXml::from).collect(),
            tags,
        }
    }
}

impl PiDataXml {
    fn into_result(self) -> CodecResult<ReadResult> {
        let defaults = Separators::default();
        let separators = Separators::new(
            self.time_separator
                .unwrap_or_else(|| defaults.time().to_string()),
            self.field_separator
                .unwrap_or_else(|| defaults.field().to_string()),
            self.value_separator
                .unwrap_or_else(|| defaults.value().to_string()),
        )?;
        let kind = self
            .kind
            .parse::<ResultKind>()
            .map_err(CodecError::Xml)?;

        let mut result = ReadResult::new(kind, self.interval_start, self.interval_end, separators);
        result.produced_at = self.read_finished;
        result.schedule_frequency_secs = self.schedule_frequency_secs;
        result.batches = self.batches.into_iter().map(Batch::from).collect();

        for tag in self.tags.unwrap_or_default().tags {
            let value_kind = match tag.value_kind.as_deref() {
                Some(kind) => kind.parse::<ValueKind>().map_err(CodecError::Xml)?,
                None if tag.is_phase => ValueKind::Integer,
                None => ValueKind::Decimal,
            };
            result.push_tag(Tag::from_encoded(
                tag.name,
                tag.is_phase,
                value_kind,
                tag.values,
            ));
        }

        Ok(result)
    }
}

impl From<&Batch> for BatchXml {
    fn from(batch: &Batch) -> Self {
        Self {
            uid: batch.uid.clone(),
            batch_id: batch.batch_id.clone(),
            start_time: batch.start_time.clone(),
            end_time: batch.end_time.clone(),
            product: batch.product.clone(),
            recipe: batch.recipe.clone(),
            campaign_uid: batch.campaign_uid.clone(),
            unit_batches: batch.unit_batches.iter().map(UnitBatchXml::from).collect(),
        }
    }
}

impl From<BatchXml> for Batch {
    fn from(xml: BatchXml) -> Self {
        Self {
            uid: xml.uid,
            batch_id: xml.batch_id,
            product: xml.product,
            recipe: xml.recipe,
            campaign_uid: xml.campaign_uid.filter(|s| !s.is_empty()),
            start_time: xml.start_time,
            end_time: xml.end_time.filter(|s| !s.is_empty()),
            unit_batches: xml.unit_batches.into_iter().map(UnitBatch::from).collect(),
        }
    }
}

impl From<&UnitBatch> for UnitBatchXml {
    fn from(ub: &UnitBatch) -> Self {
        Self {
            uid: ub.uid.clone(),
            batch_id: ub.batch_id.clone(),
            start_time: ub.start_time.clone(),
            end_time: ub.end_time.clone(),
            product: ub.product.clone(),
            procedure: ub.procedure.clone(),
            module_uid: ub.module_uid.clone(),
            batch_uid: ub.batch_uid.clone(),
            sub_batches: ub
                .sub_batches
                .iter()
                .map(|sb| SubBatchXml::at_level(sb, 0))
                .collect(),
        }
    }
}

impl From<UnitBatchXml> for UnitBatch {
    fn from(xml: UnitBatchXml) -> Self {
        Self {
            uid: xml.uid,
            batch_id: xml.batch_id,
            product: xml.product,
            procedure: xml.procedure,
            module_uid: xml.module_uid,
            batch_uid: xml.batch_uid.filter(|s| !s.is_empty()),
            start_time: xml.start_time,
            end_time: xml.end_time.filter(|s| !s.is_empty()),
            sub_batches: xml.sub_batches.into_iter().map(SubBatch::from).collect(),
        }
    }
}

impl SubBatchXml {
    /// The `level` attribute is the nesting depth below the unit batch
    fn at_level(sb: &SubBatch, level: u32) -> Self {
        Self {
            uid: sb.uid.clone(),
            unit_batch_uid: sb.unit_batch_uid.clone(),
            name: sb.name.clone(),
            path: sb.path.clone(),
            start_time: sb.start_time.clone(),
            end_time: sb.end_time.clone(),
            heading_uid: sb.heading_uid.clone(),
            level,
            child_count: sb.children.len(),
            parent_uid: sb.parent_uid.clone(),
            children: sb
                .children
                .iter()
                .map(|child| SubBatchXml::at_level(child, level + 1))
                .collect(),
        }
    }
}

impl From<SubBatchXml> for SubBatch {
    fn from(xml: SubBatchXml) -> Self {
        Self {
            uid: xml.uid,
            unit_batch_uid: xml.unit_batch_uid,
            name: xml.name,
            path: xml.path,
            start_time: xml.start_time,
            end_time: xml.end_time.filter(|s| !s.is_empty()),
            heading_uid: xml.heading_uid.filter(|s| !s.is_empty()),
            level: xml.level,
            parent_uid: xml.parent_uid.filter(|s| !s.is_empty()),
            children: xml.children.into_iter().map(SubBatch::from).collect(),
        }
    }
}

impl From<&Tag> for TagXml {
    fn from(tag: &Tag) -> Self {
        Self {
            name: tag.name.clone(),
            is_phase: tag.is_phase,
            value_kind: Some(tag.value_kind.to_string()),
            values: tag.encoded().to_string(),
        }
    }
}
