//! Local flat-file writer
//!
//! Writes four CSV tables per module or equipment name:
//!
//! ```text
//! {out}/batches/{name}.batch.csv
//! {out}/batches/{name}.ubatch.csv
//! {out}/batches/{name}.sbatch.csv
//! {out}/tags/{name}.tag.csv
//! ```
//!
//! Files are appended to; the header row is written only when a file is new.
//! Per-record failures are logged and counted, never fatal.

use super::{SinkError, SinkReport, SinkResult};
use crate::codec::format_value;
use crate::hierarchy::{walk, HierarchyVisitor, SubBatchPosition};
use crate::model::{Batch, ReadResult, ResultKind, SubBatch, UnitBatch};
use chrono::NaiveDateTime;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const BATCH_HEADER: [&str; 7] = [
    "uid",
    "batchid",
    "starttime",
    "endtime",
    "product",
    "recipe",
    "campaignuid",
];

pub const UNIT_BATCH_HEADER: [&str; 8] = [
    "uid",
    "batchid",
    "starttime",
    "endtime",
    "product",
    "procedure",
    "moduleuid",
    "batchuid",
];

pub const SUB_BATCH_HEADER: [&str; 10] = [
    "uid",
    "unitbatchuid",
    "path",
    "name",
    "level",
    "childcount",
    "starttime",
    "endtime",
    "headinguid",
    "parentuid",
];

pub const TAG_HEADER: [&str; 6] = ["tag", "time", "value", "svalue", "status", "flags"];

/// Converts timestamps from the reader format to the output format
#[derive(Debug, Clone)]
pub struct DateReformatter {
    input: String,
    output: String,
}

impl DateReformatter {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    /// Reformat one timestamp; empty stays empty, unparsable yields `None`
    pub fn reformat(&self, value: &str) -> Option<String> {
        if value.is_empty() {
            return Some(String::new());
        }
        let parsed = NaiveDateTime::parse_from_str(value, &self.input).ok()?;
        let mut out = String::new();
        write!(out, "{}", parsed.format(&self.output)).ok()?;
        Some(out)
    }

    /// Reformat for a table cell, logging failures as empty cells
    fn cell(&self, value: &str, record: &str) -> String {
        self.reformat(value).unwrap_or_else(|| {
            tracing::warn!(
                record = %record,
                value = %value,
                format = %self.input,
                "Unparsable timestamp written as empty"
            );
            String::new()
        })
    }
}

/// Hierarchy-aware flat-file writer
#[derive(Debug, Clone)]
pub struct LocalSink {
    out_dir: PathBuf,
    append: bool,
    dates: DateReformatter,
}

impl LocalSink {
    pub fn new(out_dir: impl Into<PathBuf>, append: bool, dates: DateReformatter) -> Self {
        Self {
            out_dir: out_dir.into(),
            append,
            dates,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Batch, unit-batch and sub-batch table paths for `name`
    pub fn batch_paths(&self, name: &str) -> [PathBuf; 3] {
        let dir = self.out_dir.join("batches");
        [
            dir.join(format!("{}.batch.csv", name)),
            dir.join(format!("{}.ubatch.csv", name)),
            dir.join(format!("{}.sbatch.csv", name)),
        ]
    }

    /// Tag table path for `name`
    pub fn tag_path(&self, name: &str) -> PathBuf {
        self.out_dir.join("tags").join(format!("{}.tag.csv", name))
    }

    /// Write whatever the result holds
    pub fn write(&self, name: &str, result: &ReadResult) -> SinkResult<SinkReport> {
        match result.kind {
            ResultKind::Batch => self.write_batches(name, &result.batches),
            ResultKind::Tag => self.write_tags(name, result),
        }
    }

    /// Write the forest depth-first, one row per entity
    pub fn write_batches(&self, name: &str, batches: &[Batch]) -> SinkResult<SinkReport> {
        let [batch_path, unit_path, sub_path] = self.batch_paths(name);

        let mut tables = BatchTables {
            batches: Table::open(batch_path, &BATCH_HEADER, self.append)?,
            units: Table::open(unit_path, &UNIT_BATCH_HEADER, self.append)?,
            subs: Table::open(sub_path, &SUB_BATCH_HEADER, self.append)?,
            dates: &self.dates,
        };
        walk(batches, &mut tables);

        let mut report = tables.batches.finish()?;
        report.merge(tables.units.finish()?);
        report.merge(tables.subs.finish()?);

        tracing::info!(
            name = %name,
            written = report.records_written,
            failed = report.records_failed,
            "Wrote batch tables"
        );
        Ok(report)
    }

    /// Write one row per decoded tag reading
    pub fn write_tags(&self, name: &str, result: &ReadResult) -> SinkResult<SinkReport> {
        let mut table = Table::open(self.tag_path(name), &TAG_HEADER, self.append)?;

        for tag in &result.tags {
            for reading in tag.readings(&result.separators) {
                match reading {
                    Ok(r) => {
                        let time = self.dates.cell(&r.timestamp, &tag.name);
                        let status = r.status.to_string();
                        table.row(
                            &tag.name,
                            &[
                                &tag.name,
                                &time,
                                &format_value(&r.value),
                                &r.secondary,
                                &status,
                                "",
                            ],
                        );
                    }
                    Err(e) => {
                        tracing::warn!(tag = %tag.name, error = %e, "Skipping malformed reading");
                        table.failed += 1;
                    }
                }
            }
        }

        let report = table.finish()?;
        tracing::info!(
            name = %name,
            written = report.records_written,
            failed = report.records_failed,
            "Wrote tag table"
        );
        Ok(report)
    }
}

/// One open CSV table
///
/// Every record is encoded on its own and written straight through, so a
/// record counts as written only once its bytes reached the file.
struct Table<W = File> {
    path: PathBuf,
    out: W,
    written: usize,
    failed: usize,
}

impl Table {
    fn open(path: PathBuf, header: &[&str], append: bool) -> SinkResult<Self> {
        let open_err = |source| SinkError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(open_err)?;
        }

        let is_new = !append || fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let file = if append {
            OpenOptions::new().create(true).append(true).open(&path)
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
        }
        .map_err(open_err)?;

        let mut table = Table::new(path, file);
        if is_new {
            table.out.write_all(&encode_record(header)?)?;
        }
        Ok(table)
    }
}

impl<W: Write> Table<W> {
    fn new(path: PathBuf, out: W) -> Self {
        Self {
            path,
            out,
            written: 0,
            failed: 0,
        }
    }

    fn row(&mut self, record: &str, fields: &[&str]) {
        let outcome = encode_record(fields)
            .map_err(|e| e.to_string())
            .and_then(|bytes| self.out.write_all(&bytes).map_err(|e| e.to_string()));

        match outcome {
            Ok(()) => self.written += 1,
            Err(reason) => {
                let err = SinkError::Write {
                    record: record.to_string(),
                    reason,
                };
                tracing::warn!(path = ?self.path, error = %err, "Record skipped");
                self.failed += 1;
            }
        }
    }

    fn finish(mut self) -> SinkResult<SinkReport> {
        self.out.flush()?;
        Ok(SinkReport {
            records_written: self.written,
            records_failed: self.failed,
            files: vec![self.path],
        })
    }
}

/// One CSV line, terminator included
fn encode_record(fields: &[&str]) -> csv::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer.into_inner().map_err(|e| e.into_error().into())
}

struct BatchTables<'s> {
    batches: Table,
    units: Table,
    subs: Table,
    dates: &'s DateReformatter,
}

impl<'a, 's> HierarchyVisitor<'a> for BatchTables<'s> {
    fn visit_batch(&mut self, batch: &'a Batch) {
        let start = self.dates.cell(&batch.start_time, &batch.uid);
        let end = self
            .dates
            .cell(batch.end_time.as_deref().unwrap_or(""), &batch.uid);

        self.batches.row(
            &batch.uid,
            &[
                &batch.uid,
                &batch.batch_id,
                &start,
                &end,
                &batch.product,
                &batch.recipe,
                batch.campaign_uid.as_deref().unwrap_or(""),
            ],
        );
    }

    fn visit_unit_batch(&mut self, batch: &'a Batch, unit: &'a UnitBatch) {
        let start = self.dates.cell(&unit.start_time, &unit.uid);
        let end = self
            .dates
            .cell(unit.end_time.as_deref().unwrap_or(""), &unit.uid);

        self.units.row(
            &unit.uid,
            &[
                &unit.uid,
                &unit.batch_id,
                &start,
                &end,
                &unit.product,
                &unit.procedure,
                &unit.module_uid,
                &batch.uid,
            ],
        );
    }

    fn visit_sub_batch(
        &mut self,
        unit: &'a UnitBatch,
        sub: &'a SubBatch,
        position: SubBatchPosition<'_>,
    ) {
        let start = self.dates.cell(&sub.start_time, &sub.uid);
        let end = self
            .dates
            .cell(sub.end_time.as_deref().unwrap_or(""), &sub.uid);
        let level = position.level.to_string();
        let child_count = sub.children.len().to_string();

        self.subs.row(
            &sub.uid,
            &[
                &sub.uid,
                &unit.uid,
                position.path,
                &sub.name,
                &level,
                &child_count,
                &start,
                &end,
                sub.heading_uid.as_deref().unwrap_or(""),
                position.parent_uid.unwrap_or(""),
            ],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Separators;
    use crate::model::{Reading, Tag, TagValue, ValueKind};
    use tempfile::tempdir;

    const IN_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";
    const OUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    fn sink(dir: &Path, append: bool) -> LocalSink {
        LocalSink::new(dir, append, DateReformatter::new(IN_FORMAT, OUT_FORMAT))
    }

    fn forest() -> Vec<Batch> {
        let mut heat = SubBatch::new("S1", "U2", "Heat")
            .times("2024-03-01T10-00-00", Some("2024-03-01T11-00-00".into()))
            .heading("H1");
        heat.children
            .push(SubBatch::new("S2", "U2", "Ramp").parent("S1").level(1));

        let mut ub = UnitBatch::new("U2", "LOT-7")
            .batch("B1")
            .product("Resin", "Polymerize")
            .module("M1")
            .times("2024-03-01T09-00-00", None);
        ub.sub_batches.push(heat);

        let mut batch = Batch::new("B1", "LOT-7")
            .product("Resin", "R-12")
            .times("2024-03-01T08-00-00", None);
        batch.unit_batches.push(ub);

        vec![Batch::synthetic_for(UnitBatch::new("U1", "LOT-6")), batch]
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_date_reformatter() {
        let dates = DateReformatter::new(IN_FORMAT, OUT_FORMAT);
        assert_eq!(
            dates.reformat("2024-03-01T10-15-30").as_deref(),
            Some("2024-03-01 10:15:30")
        );
        assert_eq!(dates.reformat("").as_deref(), Some(""));
        assert_eq!(dates.reformat("yesterday"), None);
    }

    #[test]
    fn test_write_batches() {
        let dir = tempdir().unwrap();
        let sink = sink(dir.path(), true);

        let report = sink.write_batches("Unit1", &forest()).unwrap();
        assert_eq!(report.records_written, 2 + 2 + 2);
        assert_eq!(report.records_failed, 0);

        let [batch_path, unit_path, sub_path] = sink.batch_paths("Unit1");

        let batches = lines(&batch_path);
        assert_eq!(batches[0], BATCH_HEADER.join(","));
        assert!(batches[1].starts_with("dummy-for-unitbatch-U1,dummy-for-unitbatch-U1,"));
        assert_eq!(batches[2], "B1,LOT-7,2024-03-01 08:00:00,,Resin,R-12,");

        let units = lines(&unit_path);
        assert_eq!(units[0], UNIT_BATCH_HEADER.join(","));
        assert!(units[1].ends_with(",dummy-for-unitbatch-U1"));
        assert_eq!(
            units[2],
            "U2,LOT-7,2024-03-01 09:00:00,,Resin,Polymerize,M1,B1"
        );

        let subs = lines(&sub_path);
        assert_eq!(subs[0], SUB_BATCH_HEADER.join(","));
        assert_eq!(
            subs[1],
            "S1,U2,/,Heat,0,1,2024-03-01 10:00:00,2024-03-01 11:00:00,H1,"
        );
        assert_eq!(subs[2], "S2,U2,/Heat/,Ramp,1,0,,,,S1");
    }

    #[test]
    fn test_append_writes_header_once() {
        let dir = tempdir().unwrap();
        let sink = sink(dir.path(), true);

        sink.write_batches("Unit1", &forest()).unwrap();
        sink.write_batches("Unit1", &forest()).unwrap();

        let [batch_path, _, _] = sink.batch_paths("Unit1");
        let batches = lines(&batch_path);
        assert_eq!(batches.len(), 1 + 2 * 2);
        assert_eq!(
            batches.iter().filter(|l| l.starts_with("uid,")).count(),
            1
        );
    }

    #[test]
    fn test_overwrite_mode_truncates() {
        let dir = tempdir().unwrap();
        sink(dir.path(), true).write_batches("Unit1", &forest()).unwrap();

        let sink = sink(dir.path(), false);
        sink.write_batches("Unit1", &forest()[1..]).unwrap();

        let [batch_path, _, _] = sink.batch_paths("Unit1");
        assert_eq!(lines(&batch_path).len(), 2);
    }

    #[test]
    fn test_bad_dates_become_empty_cells() {
        let dir = tempdir().unwrap();
        let sink = sink(dir.path(), true);
        let batch = Batch::new("B1", "LOT").times("not a date", None);

        let report = sink.write_batches("Unit1", &[batch]).unwrap();
        assert_eq!(report.records_failed, 0);

        let [batch_path, _, _] = sink.batch_paths("Unit1");
        assert_eq!(lines(&batch_path)[1], "B1,LOT,,,,,");
    }

    #[test]
    fn test_write_tags() {
        let dir = tempdir().unwrap();
        let sink = sink(dir.path(), true);
        let seps = Separators::default();

        let mut result = ReadResult::new(ResultKind::Tag, "a", "b", seps.clone());
        result.push_tag(Tag::encode(
            "TI-101",
            false,
            ValueKind::Decimal,
            &[
                Reading::new("2024-03-01T10-00-00", TagValue::Decimal(14.3021288)),
                Reading::text("2024-03-01T10-00-05", "leaktest").status(3),
            ],
            &seps,
        ));
        result.push_tag(Tag::from_encoded(
            "BROKEN",
            false,
            ValueKind::Decimal,
            "2024-03-01T10-00-00:1.0,garbage",
        ));

        let report = sink.write("Line1", &result).unwrap();
        assert_eq!(report.records_written, 3);
        assert_eq!(report.records_failed, 1);

        let rows = lines(&sink.tag_path("Line1"));
        assert_eq!(rows[0], "tag,time,value,svalue,status,flags");
        assert_eq!(rows[1], "TI-101,2024-03-01 10:00:00,14.30212880,,0,");
        assert_eq!(rows[2], "TI-101,2024-03-01 10:00:05,,leaktest,3,");
        assert_eq!(rows[3], "BROKEN,2024-03-01 10:00:00,1.00000000,,0,");
    }

    /// Accepts `room` bytes, then fails every write
    struct FullDisk {
        room: usize,
        data: Vec<u8>,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if buf.len() > self.room {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left"));
            }
            self.room -= buf.len();
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failures_are_counted_per_record() {
        let disk = FullDisk {
            room: 20,
            data: Vec::new(),
        };
        let mut table = Table::new(PathBuf::from("full.csv"), disk);

        table.row("r1", &["aaaa", "bbbb"]);
        table.row("r2", &["cccc", "dddd"]);
        table.row("r3", &["eeee", "ffff"]);
        assert_eq!(table.out.data, b"aaaa,bbbb\ncccc,dddd\n");

        let report = table.finish().unwrap();
        assert_eq!(report.records_written, 2);
        assert_eq!(report.records_failed, 1);
    }

    #[test]
    fn test_open_failure() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("out");
        fs::write(&blocker, "not a directory").unwrap();

        let sink = sink(&blocker, true);
        let err = sink.write_batches("Unit1", &forest()).unwrap_err();
        assert!(matches!(err, SinkError::Open { .. }));
    }
}
