//! Delivery metrics

use serde::Serialize;
use std::time::Duration;

/// Cumulative counters of a delivery queue
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DeliveryStats {
    pub messages_published: u64,
    pub bytes_published: u64,
    pub publish_attempts: u64,
    pub publish_failures: u64,
    pub connect_attempts: u64,
    pub drains: u64,
    /// Payloads given up on after repeated rejections
    pub dead_lettered: u64,
}

impl DeliveryStats {
    pub(crate) fn record_drain(&mut self, report: &DrainReport) {
        self.drains += 1;
        self.publish_attempts += report.attempted;
        self.messages_published += report.confirmed;
        self.publish_failures += report.failed;
        self.bytes_published += report.bytes;
        self.dead_lettered += report.dead_lettered;
    }
}

impl std::fmt::Display for DeliveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} messages ({} bytes) published, {}/{} attempts failed, {} dead-lettered, {} drains",
            self.messages_published,
            self.bytes_published,
            self.publish_failures,
            self.publish_attempts,
            self.dead_lettered,
            self.drains
        )
    }
}

/// Outcome of one `drain` call
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DrainReport {
    pub topic: String,
    pub attempted: u64,
    pub confirmed: u64,
    pub failed: u64,
    /// Payloads moved to the dead-letter list during this drain
    pub dead_lettered: u64,
    pub bytes: u64,
    pub elapsed: Duration,
    /// Items still queued for the topic afterwards
    pub remaining: usize,
}

impl DrainReport {
    pub(crate) fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            ..Default::default()
        }
    }

    /// True when the topic queue was emptied
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Confirmed messages per second
    pub fn messages_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.confirmed as f64 / secs
        } else {
            0.0
        }
    }

    /// Confirmed bytes per second
    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}
