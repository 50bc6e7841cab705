//! historian-relay
//!
//! Periodically extracts batch hierarchies or tag time series from a process
//! historian and relays them to a broker and to local flat files.
//!
//! # Usage
//!
//! ```bash
//! historian-relay init-config --output config.toml
//! historian-relay --config config.toml once
//! historian-relay --config config.toml run
//! historian-relay decode export/Reactor1.xml
//! ```

use anyhow::{bail, Context};
use chrono::Local;
use clap::{Parser, Subcommand};
use historian_relay::config::{generate_default_config, Config, LoggingConfig};
use historian_relay::codec::xml::from_xml;
use historian_relay::delivery::{
    DeliveryQueue, HttpTransport, HttpTransportConfig, MemoryTransport, Transport,
};
use historian_relay::hierarchy::{count_entities, walk, HierarchyVisitor, SubBatchPosition};
use historian_relay::model::{Batch, SubBatch, UnitBatch};
use historian_relay::reader::{open_reader, Boundary, ReaderSettings};
use historian_relay::relay::CycleRunner;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "historian-relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Relay process historian batches and tags to a message broker",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to the standard search path)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run extraction cycles on the configured schedule until Ctrl-C
    Run,

    /// Run a single extraction cycle and exit
    Once,

    /// Generate a default configuration file
    InitConfig {
        /// Output path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the tags and batch forest of an exported XML document
    Decode {
        /// Path to a `<pidata>` document
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig { output } => {
            let config = generate_default_config();
            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", config),
            }
        }

        Commands::Decode { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let result = from_xml(&content)?;
            print_document(&result);
        }

        Commands::Run | Commands::Once => {
            let config = match &cli.config {
                Some(path) => Config::load_with_env(path)?,
                None => Config::load_default(),
            };
            init_tracing(&config.logging);
            config.validate()?;

            tracing::info!("historian-relay v{}", env!("CARGO_PKG_VERSION"));
            relay(&config, matches!(cli.command, Commands::Run)).await?;
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("historian_relay={}", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn relay(config: &Config, scheduled: bool) -> anyhow::Result<()> {
    let boundary: Boundary = config
        .reader
        .boundary
        .parse()
        .map_err(anyhow::Error::msg)?;
    let separators = config.separators.to_separators()?;
    let settings = ReaderSettings::new(&config.reader.source_dir, separators)
        .date_format(&config.reader.date_format)
        .boundary(boundary);
    let reader = open_reader(&config.reader.backend, settings)?;
    tracing::info!(backend = %reader.name(), source = %config.reader.source_dir, "Reader ready");

    let queue = if config.broker.enabled {
        let queue = Arc::new(DeliveryQueue::new(
            build_transport(config)?,
            config.broker.delivery_config(),
        ));
        let supervisor = queue.spawn_supervisor();
        if let Err(e) = queue.connect().await {
            tracing::warn!(url = %config.broker.url, error = %e, "Broker not reachable yet");
        }
        Some((queue, supervisor))
    } else {
        tracing::info!("Broker delivery disabled");
        None
    };

    let mut runner =
        CycleRunner::from_config(config, reader, queue.as_ref().map(|(q, _)| Arc::clone(q)))?;

    if scheduled {
        let every = runner
            .extent()
            .frequency_secs()
            .unwrap_or(config.extent.every_secs);
        tracing::info!(mode = %runner.mode(), every_secs = every, "Starting scheduled extraction");
        runner
            .run_every(Duration::from_secs(every), async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                }
            })
            .await;
    } else {
        let report = runner.run_cycle(Local::now().naive_local()).await;
        println!("{}", report);
    }

    if let Some((queue, supervisor)) = queue {
        let pending = queue.pending_total();
        if pending > 0 {
            tracing::warn!(pending, "Closing with undelivered payloads");
        }
        queue.close().await;
        let _ = supervisor.await;
        tracing::info!("Delivery stats: {}", queue.stats());
    }

    Ok(())
}

fn build_transport(config: &Config) -> anyhow::Result<Arc<dyn Transport>> {
    let broker = &config.broker;
    match broker.transport.to_lowercase().as_str() {
        "http" => {
            let transport = HttpTransport::new(HttpTransportConfig {
                base_url: broker.url.clone(),
                publish_path: broker.publish_path.clone(),
                status_path: broker.status_path.clone(),
                client_id: broker.client_name.clone(),
                username: broker.username.clone(),
                password: broker.password.clone(),
                timeout: Duration::from_secs(broker.timeout_secs),
                retain: broker.retain,
            })?;
            Ok(Arc::new(transport))
        }
        "memory" => Ok(Arc::new(MemoryTransport::new())),
        other => bail!("unknown broker transport: {}", other),
    }
}

fn print_document(result: &historian_relay::model::ReadResult) {
    println!(
        "{} [{}, {}] read at {}",
        result.kind, result.interval_start, result.interval_end, result.produced_at
    );

    for tag in &result.tags {
        let (readings, malformed) = tag.decode_lossy(&result.separators);
        println!(
            "tag {} ({}{}) {} readings",
            tag.name,
            tag.value_kind,
            if tag.is_phase { ", phase" } else { "" },
            readings.len()
        );
        for reading in &readings {
            println!(
                "  {}  {:?}  {:?}  {}",
                reading.timestamp, reading.value, reading.secondary, reading.status
            );
        }
        if malformed > 0 {
            println!("  ({} malformed readings skipped)", malformed);
        }
    }

    if !result.batches.is_empty() {
        walk(&result.batches, &mut ForestPrinter);
        let counts = count_entities(&result.batches);
        println!(
            "{} batches ({} synthetic), {} unit batches, {} sub-batches, depth {}",
            counts.batches,
            counts.synthetic_batches,
            counts.unit_batches,
            counts.sub_batches,
            counts.depth
        );
    }
}

struct ForestPrinter;

impl<'a> HierarchyVisitor<'a> for ForestPrinter {
    fn visit_batch(&mut self, batch: &'a Batch) {
        let marker = if batch.is_synthetic() { " (synthetic)" } else { "" };
        println!("batch {} {}{}", batch.uid, batch.batch_id, marker);
    }

    fn visit_unit_batch(&mut self, _batch: &'a Batch, unit: &'a UnitBatch) {
        println!("  unit {} {} {}", unit.uid, unit.batch_id, unit.start_time);
    }

    fn visit_sub_batch(
        &mut self,
        _unit: &'a UnitBatch,
        sub: &'a SubBatch,
        position: SubBatchPosition<'_>,
    ) {
        let indent = "  ".repeat(position.level as usize + 2);
        println!("{}{}{} ({})", indent, position.path, sub.name, sub.uid);
    }
}
