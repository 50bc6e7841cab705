//! XML export replay backend
//!
//! Replays `<pidata>` documents named `{equipment}.xml` or `{module}.xml` from
//! the source directory. The documents carry a native hierarchy, so no
//! assembly step runs; the forest is pruned to unit batches overlapping the
//! window and tag readings are filtered to the window and re-encoded with the
//! configured separators.

use super::window::PointWindow;
use super::{
    HistorianReader, ModuleRequest, ReaderError, ReaderResult, ReaderSettings, TagRequest,
};
use crate::codec::xml::from_xml;
use crate::extent::ReadInterval;
use crate::model::{Batch, ReadResult, ResultKind, Tag};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reader over exported `<pidata>` documents
pub struct XmlExportReader {
    settings: ReaderSettings,
    record_count: AtomicU64,
}

impl XmlExportReader {
    pub fn new(settings: ReaderSettings) -> Self {
        Self {
            settings,
            record_count: AtomicU64::new(0),
        }
    }

    pub fn document_path(&self, name: &str) -> PathBuf {
        self.settings.source_dir.join(format!("{}.xml", name))
    }

    fn load(&self, name: &str) -> ReaderResult<ReadResult> {
        let path = self.document_path(name);
        let content = std::fs::read_to_string(&path).map_err(|source| ReaderError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(from_xml(&content)?)
    }

    /// Keep the readings of `tag` selected by the window and boundary
    fn window_tag(&self, tag: &Tag, doc: &ReadResult, interval: &ReadInterval) -> (Tag, u64) {
        let (readings, _) = tag.decode_lossy(&doc.separators);
        let mut window = PointWindow::new(self.settings.boundary);
        for reading in readings {
            match self.settings.parse_time(&reading.timestamp) {
                Some(t) => window.offer(t, reading, interval),
                None => tracing::warn!(
                    tag = %tag.name,
                    time = %reading.timestamp,
                    "Skipping reading with unparsable time"
                ),
            }
        }

        let kept = window.into_items();
        let count = kept.len() as u64;
        let tag = Tag::encode(
            tag.name.clone(),
            tag.is_phase,
            tag.value_kind,
            &kept,
            &self.settings.separators,
        );
        (tag, count)
    }

    /// Drop unit batches outside the window and batches left without any
    fn window_batches(&self, batches: Vec<Batch>, interval: &ReadInterval) -> Vec<Batch> {
        batches
            .into_iter()
            .filter_map(|mut batch| {
                batch.unit_batches.retain(|ub| {
                    let Some(start) = self.settings.parse_time(&ub.start_time) else {
                        tracing::warn!(
                            uid = %ub.uid,
                            "Skipping unit batch with unparsable start time"
                        );
                        return false;
                    };
                    let end = ub.end_time.as_deref().and_then(|e| self.settings.parse_time(e));
                    interval.overlaps(start, end)
                });
                (!batch.unit_batches.is_empty()).then_some(batch)
            })
            .collect()
    }
}

#[async_trait]
impl HistorianReader for XmlExportReader {
    fn name(&self) -> &str {
        "xml"
    }

    async fn read_tags(
        &self,
        request: &TagRequest,
        interval: &ReadInterval,
    ) -> ReaderResult<ReadResult> {
        self.record_count.store(0, Ordering::SeqCst);
        let doc = self.load(&request.equipment)?;

        let mut result = self.settings.new_result(ResultKind::Tag, interval);
        let mut records = 0;
        for (name, is_phase) in request.all_points() {
            let Some(tag) = doc.tag(name) else {
                tracing::debug!(tag = %name, "Point not present in export");
                continue;
            };
            let (mut tag, count) = self.window_tag(tag, &doc, interval);
            tag.is_phase = is_phase;
            records += count;
            result.push_tag(tag);
        }

        self.record_count.store(records, Ordering::SeqCst);
        self.settings.finish(&mut result);
        Ok(result)
    }

    async fn read_batch_tree(
        &self,
        module: &ModuleRequest,
        interval: &ReadInterval,
    ) -> ReaderResult<ReadResult> {
        self.record_count.store(0, Ordering::SeqCst);
        let doc = self.load(&module.name)?;

        let mut result = self.settings.new_result(ResultKind::Batch, interval);
        result.batches = self.window_batches(doc.batches, interval);

        let counts = result.entity_counts();
        self.record_count.store(counts.total() as u64, Ordering::SeqCst);
        self.settings.finish(&mut result);
        Ok(result)
    }

    fn last_read_record_count(&self) -> u64 {
        self.record_count.load(Ordering::SeqCst)
    }
}
