//! Historian Readers
//!
//! Backends implement [`HistorianReader`] and hand back a [`ReadResult`]:
//! - [`CsvRowReader`]: replays flat `pi*.csv` row exports and assembles the forest
//! - [`XmlExportReader`]: replays `<pidata>` documents with a native hierarchy
//!
//! Proprietary historian access stays outside this crate; anything that can
//! produce rows or documents plugs in behind the same trait.

mod csv_rows;
mod tag_builder;
mod window;
mod xml_export;

pub use csv_rows::CsvRowReader;
pub use tag_builder::TagBuilder;
pub use xml_export::XmlExportReader;

use crate::codec::{CodecError, Separators};
use crate::extent::ReadInterval;
use crate::hierarchy::HierarchyError;
use crate::model::{ReadResult, ResultKind};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// How readings at the window edges are selected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Boundary {
    /// Only readings inside the window
    #[default]
    Inside,
    /// Also the last reading before and the first after the window
    Outside,
    /// Values interpolated at the edges; replay backends treat it as inside
    Interpolated,
}

impl std::fmt::Display for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Boundary::Inside => write!(f, "inside"),
            Boundary::Outside => write!(f, "outside"),
            Boundary::Interpolated => write!(f, "interpolated"),
        }
    }
}

impl FromStr for Boundary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inside" => Ok(Boundary::Inside),
            "outside" => Ok(Boundary::Outside),
            "interpolated" => Ok(Boundary::Interpolated),
            other => Err(format!("unknown boundary type: {}", other)),
        }
    }
}

/// Points to read for one piece of equipment
#[derive(Debug, Clone, Default)]
pub struct TagRequest {
    pub equipment: String,
    pub tags: Vec<String>,
    /// Enumerated phase points
    pub phases: Vec<String>,
}

impl TagRequest {
    pub fn new(equipment: impl Into<String>) -> Self {
        Self {
            equipment: equipment.into(),
            ..Default::default()
        }
    }

    /// Builder method: add ordinary points
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Builder method: add phase points
    pub fn phases<I, S>(mut self, phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.phases.extend(phases.into_iter().map(Into::into));
        self
    }

    pub fn is_phase(&self, name: &str) -> bool {
        self.phases.iter().any(|p| p == name)
    }

    /// Ordinary points first, then phase points
    pub fn all_points(&self) -> impl Iterator<Item = (&str, bool)> {
        self.tags
            .iter()
            .map(|t| (t.as_str(), false))
            .chain(self.phases.iter().map(|p| (p.as_str(), true)))
    }
}

/// A batch module and its historian path
#[derive(Debug, Clone, Default)]
pub struct ModuleRequest {
    pub name: String,
    /// Full backslash-separated module path
    pub path: String,
}

impl ModuleRequest {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Settings shared by every backend
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub source_dir: PathBuf,
    /// Pattern of every timestamp read and produced
    pub date_format: String,
    pub boundary: Boundary,
    pub separators: Separators,
}

impl ReaderSettings {
    pub fn new(source_dir: impl Into<PathBuf>, separators: Separators) -> Self {
        Self {
            source_dir: source_dir.into(),
            date_format: "%Y-%m-%dT%H-%M-%S".to_string(),
            boundary: Boundary::default(),
            separators,
        }
    }

    /// Builder method: set the date pattern
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    /// Builder method: set the boundary type
    pub fn boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub(crate) fn parse_time(&self, value: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(value.trim(), &self.date_format).ok()
    }

    /// Empty result stamped with the window bounds
    pub(crate) fn new_result(&self, kind: ResultKind, interval: &ReadInterval) -> ReadResult {
        let (start, end) = interval.format_with(&self.date_format);
        ReadResult::new(kind, start, end, self.separators.clone())
    }

    /// Stamp the completion time
    pub(crate) fn finish(&self, result: &mut ReadResult) {
        result.produced_at = Local::now()
            .naive_local()
            .format(&self.date_format)
            .to_string();
    }
}

/// Capability every historian backend provides
#[async_trait]
pub trait HistorianReader: Send + Sync {
    fn name(&self) -> &str;

    /// Read the requested points over the window
    async fn read_tags(
        &self,
        request: &TagRequest,
        interval: &ReadInterval,
    ) -> ReaderResult<ReadResult>;

    /// Read the batch forest of a module over the window
    async fn read_batch_tree(
        &self,
        module: &ModuleRequest,
        interval: &ReadInterval,
    ) -> ReaderResult<ReadResult>;

    /// Number of source records the last read touched
    fn last_read_record_count(&self) -> u64;
}

/// Build the backend named in configuration
pub fn open_reader(
    backend: &str,
    settings: ReaderSettings,
) -> ReaderResult<Arc<dyn HistorianReader>> {
    match backend.to_lowercase().as_str() {
        "csv" => Ok(Arc::new(CsvRowReader::new(settings))),
        "xml" => Ok(Arc::new(XmlExportReader::new(settings))),
        other => Err(ReaderError::UnsupportedBackend(other.to_string())),
    }
}

/// Errors that can occur while reading from a backend
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("Unknown module path: {0}")]
    UnknownModule(String),

    #[error("Unsupported reader backend: {0}")]
    UnsupportedBackend(String),
}

/// Result type for reader operations
pub type ReaderResult<T> = Result<T, ReaderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_parse() {
        assert_eq!("Outside".parse::<Boundary>().unwrap(), Boundary::Outside);
        assert_eq!(Boundary::Interpolated.to_string(), "interpolated");
        assert!("edge".parse::<Boundary>().is_err());
        assert_eq!(Boundary::default(), Boundary::Inside);
    }

    #[test]
    fn test_tag_request_points() {
        let request = TagRequest::new("Reactor1")
            .tags(["TI-101", "PI-102"])
            .phases(["PH-1"]);

        let points: Vec<_> = request.all_points().collect();
        assert_eq!(
            points,
            vec![("TI-101", false), ("PI-102", false), ("PH-1", true)]
        );
        assert!(request.is_phase("PH-1"));
        assert!(!request.is_phase("TI-101"));
    }

    #[test]
    fn test_open_reader() {
        let settings = ReaderSettings::new("/tmp", Separators::default());
        assert_eq!(open_reader("CSV", settings.clone()).unwrap().name(), "csv");
        assert_eq!(open_reader("xml", settings.clone()).unwrap().name(), "xml");
        assert!(matches!(
            open_reader("oledb", settings),
            Err(ReaderError::UnsupportedBackend(_))
        ));
    }
}
