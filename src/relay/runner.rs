//! Cycle orchestration
//!
//! One cycle reads every target, writes the result to the local sink and
//! hands a serialized payload to the delivery queue. A failing target is
//! recorded in the [`CycleReport`] and the cycle moves on to the next one.

use super::{serialize_result, ReadMode, Serialization};
use crate::config::{Config, ConfigError};
use crate::delivery::{DeliveryQueue, DrainReport};
use crate::extent::{ReadExtent, ReadInterval, REFERENCE_FORMAT};
use crate::reader::{HistorianReader, ModuleRequest, ReaderResult, TagRequest};
use crate::sink::{DateReformatter, LocalSink, SinkReport};
use crate::model::ReadResult;
use chrono::{Local, NaiveDateTime};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One read target and its destination topic
#[derive(Debug, Clone)]
enum Target {
    Equipment { request: TagRequest, topic: String },
    Module { request: ModuleRequest, topic: String },
}

impl Target {
    fn name(&self) -> &str {
        match self {
            Target::Equipment { request, .. } => &request.equipment,
            Target::Module { request, .. } => &request.name,
        }
    }

    fn topic(&self) -> &str {
        match self {
            Target::Equipment { topic, .. } | Target::Module { topic, .. } => topic,
        }
    }
}

/// What happened to one target during a cycle
#[derive(Debug, Clone)]
pub struct ModuleOutcome {
    pub name: String,
    pub topic: String,
    pub interval: ReadInterval,
    pub read_time: Duration,
    /// Source records touched by the read
    pub records: u64,
    pub tags: usize,
    pub batches: usize,
    pub sink: Option<SinkReport>,
    pub delivered: Option<DrainReport>,
    /// Read, sink or serialization failure
    pub error: Option<String>,
}

impl ModuleOutcome {
    fn new(target: &Target, interval: ReadInterval) -> Self {
        Self {
            name: target.name().to_string(),
            topic: target.topic().to_string(),
            interval,
            read_time: Duration::ZERO,
            records: 0,
            tags: 0,
            batches: 0,
            sink: None,
            delivered: None,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: NaiveDateTime,
    pub elapsed: Duration,
    pub outcomes: Vec<ModuleOutcome>,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Read time per target
    pub fn read_times(&self) -> HashMap<&str, Duration> {
        self.outcomes
            .iter()
            .map(|o| (o.name.as_str(), o.read_time))
            .collect()
    }

    pub fn drains(&self) -> impl Iterator<Item = &DrainReport> {
        self.outcomes.iter().filter_map(|o| o.delivered.as_ref())
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let confirmed: u64 = self.drains().map(|d| d.confirmed).sum();
        write!(
            f,
            "{} targets ({} failed), {} payloads delivered in {:.2}s",
            self.outcomes.len(),
            self.failed(),
            confirmed,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Runs extraction cycles over a reader
pub struct CycleRunner {
    reader: Arc<dyn HistorianReader>,
    extent: ReadExtent,
    mode: ReadMode,
    targets: Vec<Target>,
    serialization: Serialization,
    sink: Option<LocalSink>,
    delivery: Option<Arc<DeliveryQueue>>,
    last_read_end: HashMap<String, NaiveDateTime>,
}

impl CycleRunner {
    pub fn new(reader: Arc<dyn HistorianReader>, extent: ReadExtent, mode: ReadMode) -> Self {
        Self {
            reader,
            extent,
            mode,
            targets: Vec::new(),
            serialization: Serialization::default(),
            sink: None,
            delivery: None,
            last_read_end: HashMap::new(),
        }
    }

    /// Build a runner from configuration; the delivery queue is wired by the caller
    pub fn from_config(
        config: &Config,
        reader: Arc<dyn HistorianReader>,
        delivery: Option<Arc<DeliveryQueue>>,
    ) -> Result<Self, ConfigError> {
        let extent = ReadExtent::from_config(&config.extent, &config.reader.date_format)?;
        let mode: ReadMode = config.reader.mode.parse().map_err(ConfigError::Invalid)?;
        let serialization: Serialization = config
            .broker
            .serialization
            .parse()
            .map_err(ConfigError::Invalid)?;

        let mut runner = Self::new(reader, extent, mode).serialization(serialization);

        match mode {
            ReadMode::Tag => {
                for eq in &config.equipment {
                    let request = TagRequest::new(&eq.name)
                        .tags(eq.tags.iter().cloned())
                        .phases(eq.phases.iter().cloned());
                    runner = runner.equipment(request, eq.topic());
                }
            }
            ReadMode::Batch => {
                for module in &config.modules {
                    runner = runner.module(
                        ModuleRequest::new(&module.name, &module.path),
                        module.topic(),
                    );
                }
            }
        }

        if config.output.enabled {
            runner = runner.sink(LocalSink::new(
                PathBuf::from(&config.output.dir),
                config.output.append,
                DateReformatter::new(&config.reader.date_format, &config.output.date_format),
            ));
        }

        if let Some(queue) = delivery {
            runner = runner.delivery(queue);
        }

        Ok(runner)
    }

    /// Builder method: add an equipment target
    pub fn equipment(mut self, request: TagRequest, topic: impl Into<String>) -> Self {
        self.targets.push(Target::Equipment {
            request,
            topic: topic.into(),
        });
        self
    }

    /// Builder method: add a module target
    pub fn module(mut self, request: ModuleRequest, topic: impl Into<String>) -> Self {
        self.targets.push(Target::Module {
            request,
            topic: topic.into(),
        });
        self
    }

    /// Builder method: set the payload format
    pub fn serialization(mut self, serialization: Serialization) -> Self {
        self.serialization = serialization;
        self
    }

    /// Builder method: write every result to local files
    pub fn sink(mut self, sink: LocalSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builder method: deliver every result to the broker
    pub fn delivery(mut self, queue: Arc<DeliveryQueue>) -> Self {
        self.delivery = Some(queue);
        self
    }

    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    pub fn extent(&self) -> &ReadExtent {
        &self.extent
    }

    /// End of the last successful read of `name`
    pub fn last_read_end(&self, name: &str) -> Option<NaiveDateTime> {
        self.last_read_end.get(name).copied()
    }

    /// Run one cycle with the window computed at `now`
    pub async fn run_cycle(&mut self, now: NaiveDateTime) -> CycleReport {
        let started = Instant::now();
        tracing::info!(mode = %self.mode, targets = self.targets.len(), "Cycle started");

        let mut outcomes = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let interval = self
                .extent
                .interval_at(now, self.last_read_end.get(target.name()).copied());
            let mut outcome = ModuleOutcome::new(target, interval);

            tracing::info!(
                module = %target.name(),
                interval = %interval,
                "Reading"
            );

            let read_started = Instant::now();
            let read = self.read(target, &interval).await;
            outcome.read_time = read_started.elapsed();

            let mut result = match read {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(module = %target.name(), error = %e, "Read failed");
                    outcome.error = Some(e.to_string());
                    if let Some(queue) = &self.delivery {
                        outcome.delivered = Some(queue.drain(target.topic()).await);
                    }
                    outcomes.push(outcome);
                    continue;
                }
            };

            result.schedule_frequency_secs = self.extent.frequency_secs();
            outcome.records = self.reader.last_read_record_count();
            outcome.tags = result.tags.len();
            outcome.batches = result.batches.len();
            self.last_read_end
                .insert(target.name().to_string(), interval.end);

            tracing::info!(
                equipment = %target.name(),
                end = %interval.end.format(REFERENCE_FORMAT),
                records = outcome.records,
                tags = outcome.tags,
                batches = outcome.batches,
                read_secs = outcome.read_time.as_secs_f64(),
                "read end"
            );

            if let Some(sink) = &self.sink {
                match sink.write(target.name(), &result) {
                    Ok(report) => outcome.sink = Some(report),
                    Err(e) => {
                        tracing::error!(module = %target.name(), error = %e, "Local write failed");
                        outcome.error = Some(e.to_string());
                    }
                }
            }

            if let Some(queue) = &self.delivery {
                outcome.delivered = Some(
                    self.deliver(queue, target.topic(), &result, &mut outcome.error)
                        .await,
                );
            }

            outcomes.push(outcome);
        }

        let report = CycleReport {
            started_at: now,
            elapsed: started.elapsed(),
            outcomes,
        };
        tracing::info!("Cycle finished: {}", report);
        report
    }

    /// Run cycles every `period` until `shutdown` resolves
    pub async fn run_every<F>(&mut self, period: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle(Local::now().naive_local()).await;
                }
            }
        }
    }

    async fn read(&self, target: &Target, interval: &ReadInterval) -> ReaderResult<ReadResult> {
        match target {
            Target::Equipment { request, .. } => self.reader.read_tags(request, interval).await,
            Target::Module { request, .. } => {
                self.reader.read_batch_tree(request, interval).await
            }
        }
    }

    async fn deliver(
        &self,
        queue: &DeliveryQueue,
        topic: &str,
        result: &ReadResult,
        error: &mut Option<String>,
    ) -> DrainReport {
        match serialize_result(result, self.serialization) {
            Ok(payload) => queue.enqueue(topic, payload),
            Err(e) => {
                tracing::error!(topic = %topic, error = %e, "Serialization failed");
                *error = Some(e.to_string());
            }
        }

        // the backlog drains even when this cycle has nothing new
        queue.drain(topic).await
    }
}
