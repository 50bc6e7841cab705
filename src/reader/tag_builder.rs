//! Accumulates raw historian rows into a [`Tag`]

use crate::codec::Separators;
use crate::model::{Reading, Tag, TagValue, ValueKind};

/// Collects the readings of one point in arrival order
#[derive(Debug, Clone)]
pub struct TagBuilder {
    name: String,
    is_phase: bool,
    value_kind: Option<ValueKind>,
    readings: Vec<Reading>,
}

impl TagBuilder {
    pub fn new(name: impl Into<String>, is_phase: bool) -> Self {
        Self {
            name: name.into(),
            is_phase,
            value_kind: None,
            readings: Vec::new(),
        }
    }

    /// Builder method: fix the value kind instead of inferring it
    pub fn kind(mut self, kind: ValueKind) -> Self {
        self.value_kind = Some(kind);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind fixed so far; decimal until a row says otherwise
    pub fn value_kind(&self) -> ValueKind {
        self.value_kind.unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Append an already typed reading
    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    /// Append a raw row, inferring the value kind from the first one
    ///
    /// A non-empty `svalue` makes the point a string point. Phase points and
    /// integral values make it an integer point. Everything else is decimal.
    pub fn push_raw(&mut self, timestamp: &str, value: &str, svalue: &str, status: i32) {
        let value = value.trim();
        let is_phase = self.is_phase;
        let kind = *self
            .value_kind
            .get_or_insert_with(|| infer_kind(value, svalue, is_phase));

        let reading = match kind {
            ValueKind::String => Reading::text(timestamp, svalue),
            ValueKind::Integer => Reading::new(timestamp, integer_value(value)).secondary(svalue),
            ValueKind::Decimal => Reading::new(timestamp, decimal_value(value)).secondary(svalue),
        };
        self.readings.push(reading.status(status));
    }

    /// Encode the collected readings; points without readings yield nothing
    pub fn build(self, separators: &Separators) -> Option<Tag> {
        if self.readings.is_empty() {
            tracing::debug!(tag = %self.name, "No readings in window");
            return None;
        }
        Some(Tag::encode(
            self.name,
            self.is_phase,
            self.value_kind.unwrap_or_default(),
            &self.readings,
            separators,
        ))
    }
}

fn infer_kind(value: &str, svalue: &str, is_phase: bool) -> ValueKind {
    if !svalue.is_empty() {
        ValueKind::String
    } else if is_phase || value.parse::<i64>().is_ok() {
        ValueKind::Integer
    } else {
        ValueKind::Decimal
    }
}

fn integer_value(value: &str) -> TagValue {
    if value.is_empty() {
        return TagValue::Empty;
    }
    if let Ok(i) = value.parse::<i64>() {
        return TagValue::Integer(i);
    }
    match value.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => TagValue::Integer(f as i64),
        _ => TagValue::state(value),
    }
}

fn decimal_value(value: &str) -> TagValue {
    if value.is_empty() {
        return TagValue::Empty;
    }
    value
        .parse::<f64>()
        .map(TagValue::decimal)
        .unwrap_or_else(|_| TagValue::state(value))
}
