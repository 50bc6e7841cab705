//! Flat row replay backend
//!
//! Replays historian table exports found in the source directory:
//!
//! ```text
//! pimodule.csv     uid,path,name
//! pibatch.csv      uid,batchid,starttime,endtime,product,recipe,campaignuid
//! piunitbatch.csv  uid,batchid,starttime,endtime,product,procedure,moduleuid,batchuid
//! pisubbatch.csv   uid,unitbatchuid,path,name,level,childcount,
//!                  starttime,endtime,headinguid,parentuid
//! picomp.csv       tag,time,value,svalue,status,flags
//! ```
//!
//! Unit batches of the module overlapping the window are the entry points.
//! Their batches and overlapping sub-batches are looked up by uid and the
//! forest is rebuilt with [`assemble`].

use super::window::PointWindow;
use super::{
    HistorianReader, ModuleRequest, ReaderError, ReaderResult, ReaderSettings, TagBuilder,
    TagRequest,
};
use crate::extent::ReadInterval;
use crate::hierarchy::{assemble, FlatHierarchy};
use crate::model::{Batch, ReadResult, ResultKind, SubBatch, UnitBatch};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};

pub const MODULE_FILE: &str = "pimodule.csv";
pub const BATCH_FILE: &str = "pibatch.csv";
pub const UNIT_BATCH_FILE: &str = "piunitbatch.csv";
pub const SUB_BATCH_FILE: &str = "pisubbatch.csv";
pub const COMP_FILE: &str = "picomp.csv";

/// Reader over flat CSV table exports
pub struct CsvRowReader {
    settings: ReaderSettings,
    record_count: AtomicU64,
}

impl CsvRowReader {
    pub fn new(settings: ReaderSettings) -> Self {
        Self {
            settings,
            record_count: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    fn load_rows<T: DeserializeOwned>(&self, file_name: &str) -> ReaderResult<Vec<T>> {
        let path = self.settings.source_dir.join(file_name);
        let file = File::open(&path).map_err(|source| ReaderError::Io {
            path: path.clone(),
            source,
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);
        reader.headers()?;

        let mut rows = Vec::new();
        for (line_num, result) in reader.deserialize::<T>().enumerate() {
            match result {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::warn!(
                        file = %file_name,
                        line = line_num + 2,
                        error = %e,
                        "Skipping unreadable row"
                    );
                }
            }
        }
        Ok(rows)
    }

    /// Resolve a backslash-separated module path to its uid
    pub fn resolve_module(&self, module_path: &str) -> ReaderResult<String> {
        let (parent, name) = match module_path.rfind('\\') {
            Some(idx) => module_path.split_at(idx + 1),
            None => ("", module_path),
        };

        let modules: Vec<ModuleRow> = self.load_rows(MODULE_FILE)?;
        modules
            .into_iter()
            .find(|m| m.path == parent && m.name == name)
            .map(|m| m.uid)
            .ok_or_else(|| ReaderError::UnknownModule(module_path.to_string()))
    }

    /// True when the record's time span overlaps the window
    fn in_window(&self, uid: &str, start: &str, end: &str, interval: &ReadInterval) -> bool {
        let Some(start) = self.settings.parse_time(start) else {
            tracing::warn!(
                uid = %uid,
                start = %start,
                "Skipping record with unparsable start time"
            );
            return false;
        };
        let end = if end.is_empty() {
            None
        } else {
            self.settings.parse_time(end)
        };
        interval.overlaps(start, end)
    }

    fn read_tags_sync(
        &self,
        request: &TagRequest,
        interval: &ReadInterval,
    ) -> ReaderResult<ReadResult> {
        let rows: Vec<CompRow> = self.load_rows(COMP_FILE)?;

        let boundary = self.settings.boundary;
        let mut windows: Vec<(TagBuilder, PointWindow<&CompRow>)> = request
            .all_points()
            .map(|(name, is_phase)| (TagBuilder::new(name, is_phase), PointWindow::new(boundary)))
            .collect();
        let index: HashMap<&str, usize> = request
            .all_points()
            .enumerate()
            .map(|(i, (name, _))| (name, i))
            .collect();

        for row in &rows {
            let Some(&i) = index.get(row.tag.as_str()) else {
                continue;
            };
            let Some(t) = self.settings.parse_time(&row.time) else {
                tracing::warn!(
                    tag = %row.tag,
                    time = %row.time,
                    "Skipping reading with unparsable time"
                );
                continue;
            };
            windows[i].1.offer(t, row, interval);
        }

        let mut result = self.settings.new_result(ResultKind::Tag, interval);
        let mut records = 0u64;
        for (mut builder, window) in windows {
            for row in window.into_items() {
                builder.push_raw(&row.time, &row.value, &row.svalue, row.status());
                records += 1;
            }
            if let Some(tag) = builder.build(&self.settings.separators) {
                result.push_tag(tag);
            }
        }

        self.record_count.store(records, Ordering::SeqCst);
        self.settings.finish(&mut result);
        Ok(result)
    }

    fn read_batch_tree_sync(
        &self,
        module: &ModuleRequest,
        interval: &ReadInterval,
    ) -> ReaderResult<ReadResult> {
        let module_uid = self.resolve_module(&module.path)?;
        let mut flat = FlatHierarchy::new();
        let mut batch_uids = HashSet::new();
        let mut unit_uids = HashSet::new();

        let unit_rows: Vec<UnitBatchRow> = self.load_rows(UNIT_BATCH_FILE)?;
        for row in unit_rows {
            if row.moduleuid != module_uid
                || !self.in_window(&row.uid, &row.starttime, &row.endtime, interval)
            {
                continue;
            }
            if !row.batchuid.is_empty() {
                batch_uids.insert(row.batchuid.clone());
            }
            unit_uids.insert(row.uid.clone());
            flat.insert_unit_batch(row.into());
        }

        if !batch_uids.is_empty() {
            let batch_rows: Vec<BatchRow> = self.load_rows(BATCH_FILE)?;
            for row in batch_rows {
                if batch_uids.contains(&row.uid) {
                    flat.insert_batch(row.into());
                }
            }
        }

        if !unit_uids.is_empty() {
            let sub_rows: Vec<SubBatchRow> = self.load_rows(SUB_BATCH_FILE)?;
            for row in sub_rows {
                if unit_uids.contains(&row.unitbatchuid)
                    && self.in_window(&row.uid, &row.starttime, &row.endtime, interval)
                {
                    flat.insert_sub_batch(row.into());
                }
            }
        }

        self.record_count.store(flat.len() as u64, Ordering::SeqCst);

        let assembly = assemble(flat)?;
        if assembly.dropped_sub_batches > 0 {
            tracing::warn!(
                module = %module.name,
                dropped = assembly.dropped_sub_batches,
                "Sub-batches without a reachable parent were dropped"
            );
        }

        let mut result = self.settings.new_result(ResultKind::Batch, interval);
        result.batches = assembly.into_batches();
        self.settings.finish(&mut result);
        Ok(result)
    }
}

#[async_trait]
impl HistorianReader for CsvRowReader {
    fn name(&self) -> &str {
        "csv"
    }

    async fn read_tags(
        &self,
        request: &TagRequest,
        interval: &ReadInterval,
    ) -> ReaderResult<ReadResult> {
        self.record_count.store(0, Ordering::SeqCst);
        self.read_tags_sync(request, interval)
    }

    async fn read_batch_tree(
        &self,
        module: &ModuleRequest,
        interval: &ReadInterval,
    ) -> ReaderResult<ReadResult> {
        self.record_count.store(0, Ordering::SeqCst);
        self.read_batch_tree_sync(module, interval)
    }

    fn last_read_record_count(&self) -> u64 {
        self.record_count.load(Ordering::SeqCst)
    }
}

// ============================================
// Row DTOs
// ============================================

#[derive(Debug, Deserialize)]
struct ModuleRow {
    uid: String,
    #[serde(default)]
    path: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct BatchRow {
    uid: String,
    #[serde(default)]
    batchid: String,
    #[serde(default)]
    starttime: String,
    #[serde(default)]
    endtime: String,
    #[serde(default)]
    product: String,
    #[serde(default)]
    recipe: String,
    #[serde(default)]
    campaignuid: String,
}

impl From<BatchRow> for Batch {
    fn from(row: BatchRow) -> Self {
        Batch::new(row.uid, row.batchid)
            .product(row.product, row.recipe)
            .campaign(row.campaignuid)
            .times(row.starttime, Some(row.endtime))
    }
}

#[derive(Debug, Deserialize)]
struct UnitBatchRow {
    uid: String,
    #[serde(default)]
    batchid: String,
    #[serde(default)]
    starttime: String,
    #[serde(default)]
    endtime: String,
    #[serde(default)]
    product: String,
    #[serde(default)]
    procedure: String,
    #[serde(default)]
    moduleuid: String,
    #[serde(default)]
    batchuid: String,
}

impl From<UnitBatchRow> for UnitBatch {
    fn from(row: UnitBatchRow) -> Self {
        UnitBatch::new(row.uid, row.batchid)
            .batch(row.batchuid)
            .product(row.product, row.procedure)
            .module(row.moduleuid)
            .times(row.starttime, Some(row.endtime))
    }
}

#[derive(Debug, Deserialize)]
struct SubBatchRow {
    uid: String,
    unitbatchuid: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    level: u32,
    #[serde(default)]
    starttime: String,
    #[serde(default)]
    endtime: String,
    #[serde(default)]
    headinguid: String,
    #[serde(default)]
    parentuid: String,
}

impl From<SubBatchRow> for SubBatch {
    fn from(row: SubBatchRow) -> Self {
        SubBatch::new(row.uid, row.unitbatchuid, row.name)
            .parent(row.parentuid)
            .path(row.path)
            .level(row.level)
            .heading(row.headinguid)
            .times(row.starttime, Some(row.endtime))
    }
}

#[derive(Debug, Deserialize)]
struct CompRow {
    tag: String,
    time: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    svalue: String,
    #[serde(default)]
    status: String,
}

impl CompRow {
    fn status(&self) -> i32 {
        self.status.parse().unwrap_or(0)
    }
}
