//! # historian-relay
//!
//! Extracts batch hierarchies and tag time series from a process historian and
//! relays them to a message broker and to local flat files.
//!
//! ## Modules
//!
//! - [`hierarchy`]: Rebuilds the Batch → UnitBatch → SubBatch forest from flat records
//! - [`codec`]: Compact delimited time-series encoding and the XML document form
//! - [`delivery`]: Per-topic reliable delivery queue over a reconnecting transport
//! - [`sink`]: Flat-file writer for batches and tags
//! - [`reader`]: Historian reader backends
//! - [`relay`]: Extraction cycle orchestration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use historian_relay::delivery::{DeliveryConfig, DeliveryQueue, MemoryTransport};
//! use historian_relay::extent::ReadExtent;
//! use historian_relay::reader::{open_reader, ReaderSettings, TagRequest};
//! use historian_relay::relay::{CycleRunner, ReadMode};
//! use historian_relay::codec::Separators;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let reader = open_reader("csv", ReaderSettings::new("./historian", Separators::default()))?;
//!
//!     let queue = Arc::new(DeliveryQueue::new(
//!         Arc::new(MemoryTransport::new()),
//!         DeliveryConfig::default(),
//!     ));
//!     queue.connect().await?;
//!
//!     let mut runner = CycleRunner::new(
//!         reader,
//!         ReadExtent::Relative { read_past: chrono::Duration::hours(1) },
//!         ReadMode::Tag,
//!     )
//!     .equipment(TagRequest::new("Reactor1").tags(["TI-101"]), "plant/reactor1")
//!     .delivery(Arc::clone(&queue));
//!
//!     let report = runner.run_cycle(chrono::Local::now().naive_local()).await;
//!     println!("{}", report);
//!
//!     queue.close().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod delivery;
pub mod extent;
pub mod hierarchy;
pub mod model;
pub mod reader;
pub mod relay;
pub mod sink;

// Re-export top-level types for convenience
pub use model::{
    Batch, ReadResult, Reading, ResultKind, SubBatch, Tag, TagValue, UnitBatch, ValueKind,
};

pub use codec::{CodecError, CodecResult, Separators};

pub use hierarchy::{assemble, walk, FlatHierarchy, HierarchyError, HierarchyVisitor};

pub use delivery::{
    ConnectionState, DeliveryConfig, DeliveryQueue, DrainReport, Payload, Transport,
    TransportError,
};

pub use sink::{LocalSink, SinkError, SinkReport};

pub use reader::{open_reader, HistorianReader, ReaderError, ReaderResult};

pub use extent::{ReadExtent, ReadInterval};

pub use relay::{CycleReport, CycleRunner, ReadMode, Serialization};

pub use config::{Config, ConfigError, LoggingConfig};
