//! Delivery Queue
//!
//! Buffers payloads per topic and drains them over a [`Transport`] with
//! publish-then-dequeue semantics: an item leaves its queue only after the
//! broker confirmed it, so failures cause at most a duplicate, never a loss.
//!
//! A payload the broker keeps rejecting without dropping the connection is
//! moved to a dead-letter list after `max_publish_attempts`, so one bad
//! payload cannot hold back the rest of its topic.
//!
//! Connection state lives in a watch channel. A supervisor task reconnects
//! after a fixed delay whenever the state drops to `Disconnected`, until the
//! queue is closed.

use super::{DeliveryStats, DrainReport, Payload, Transport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Connection state of a delivery queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; reached only through `close()`
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Offline notices go here unless configured otherwise
pub const DEFAULT_LAST_WILL_TOPIC: &str = "/pireaderlastwill";

/// A payload given up on after repeated rejections
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub topic: String,
    pub payload: Payload,
    pub attempts: u32,
    pub error: String,
}

/// Delivery queue configuration
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Client identity used in logs
    pub client_name: String,
    /// Reconnect automatically after connection loss
    pub reconnect: bool,
    /// Wait before each reconnection attempt
    pub reconnect_delay: Duration,
    /// Rejections of one payload before it is dead-lettered; 0 retries forever
    pub max_publish_attempts: u32,
    /// Topic that receives an offline notice when the queue closes
    pub last_will_topic: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            client_name: "historian-relay".to_string(),
            reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            max_publish_attempts: 3,
            last_will_topic: Some(DEFAULT_LAST_WILL_TOPIC.to_string()),
        }
    }
}

/// Per-topic FIFO queues over a reconnecting transport
pub struct DeliveryQueue {
    transport: Arc<dyn Transport>,
    config: DeliveryConfig,
    queues: Mutex<HashMap<String, VecDeque<Payload>>>,
    /// Rejections of the current head, per topic
    head_rejections: Mutex<HashMap<String, u32>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    state: watch::Sender<ConnectionState>,
    reconnect: AtomicBool,
    connect_gate: tokio::sync::Mutex<()>,
    drain_gate: tokio::sync::Mutex<()>,
    stats: Mutex<DeliveryStats>,
    reports: Mutex<Option<mpsc::UnboundedSender<DrainReport>>>,
}

impl DeliveryQueue {
    /// Create a disconnected queue
    pub fn new(transport: Arc<dyn Transport>, config: DeliveryConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let reconnect = AtomicBool::new(config.reconnect);

        Self {
            transport,
            config,
            queues: Mutex::new(HashMap::new()),
            head_rejections: Mutex::new(HashMap::new()),
            dead_letters: Mutex::new(Vec::new()),
            state,
            reconnect,
            connect_gate: tokio::sync::Mutex::new(()),
            drain_gate: tokio::sync::Mutex::new(()),
            stats: Mutex::new(DeliveryStats::default()),
            reports: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes; `Closed` is the closed notification
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Receive a report after every drain; replaces any earlier subscriber
    pub fn subscribe_reports(&self) -> mpsc::UnboundedReceiver<DrainReport> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.reports) = Some(tx);
        rx
    }

    /// Cumulative counters
    pub fn stats(&self) -> DeliveryStats {
        lock(&self.stats).clone()
    }

    /// Attempt a single connection
    ///
    /// On failure the state stays `Disconnected`; the supervisor, if running,
    /// retries after the reconnect delay.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let _gate = self.connect_gate.lock().await;

        match self.state() {
            ConnectionState::Closed => return Err(TransportError::Closed),
            ConnectionState::Connected => return Ok(()),
            _ => {}
        }

        self.transition(ConnectionState::Connecting);
        lock(&self.stats).connect_attempts += 1;
        tracing::info!(
            transport = self.transport.name(),
            client = %self.config.client_name,
            "Connecting to broker"
        );

        match self.transport.connect().await {
            Ok(()) => {
                if !self.transition(ConnectionState::Connected) {
                    // Closed while connecting
                    let _ = self.transport.disconnect().await;
                    return Err(TransportError::Closed);
                }
                tracing::info!(transport = self.transport.name(), "Connected to broker");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    transport = self.transport.name(),
                    error = %e,
                    "Connection to broker failed"
                );
                self.transition(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Append a payload to the topic queue; never blocks on the transport
    pub fn enqueue(&self, topic: &str, payload: impl Into<Payload>) {
        let payload = payload.into();
        let mut queues = lock(&self.queues);
        let queue = queues.entry(topic.to_string()).or_default();
        queue.push_back(payload);
        tracing::debug!(topic = %topic, pending = queue.len(), "Payload queued");
    }

    /// Publish queued payloads for `topic` in order until the queue is empty
    /// or a publish fails
    ///
    /// A rejected head is retried on the next drain. Once it has been
    /// rejected `max_publish_attempts` times it is dead-lettered and the
    /// drain moves on to the next payload.
    pub async fn drain(&self, topic: &str) -> DrainReport {
        let _gate = self.drain_gate.lock().await;
        let started = Instant::now();
        let qos = self.transport.max_qos();
        let mut report = DrainReport::new(topic);

        loop {
            if !self.is_connected() {
                break;
            }
            let Some(head) = self.peek(topic) else {
                break;
            };

            report.attempted += 1;
            match self.transport.publish(topic, &head, qos).await {
                Ok(()) => {
                    self.pop_head(topic);
                    report.confirmed += 1;
                    report.bytes += head.len() as u64;
                }
                Err(e) if e.is_connection_loss() => {
                    report.failed += 1;
                    tracing::warn!(
                        topic = %topic,
                        error = %e,
                        "Publish failed, payload stays queued"
                    );
                    self.notify_disconnected();
                    break;
                }
                Err(e) => {
                    report.failed += 1;
                    let attempts = self.count_rejection(topic);
                    let limit = self.config.max_publish_attempts;
                    if limit == 0 || attempts < limit {
                        tracing::warn!(
                            topic = %topic,
                            attempts,
                            error = %e,
                            "Publish rejected, payload stays queued"
                        );
                        break;
                    }

                    tracing::error!(
                        topic = %topic,
                        attempts,
                        bytes = head.len(),
                        error = %e,
                        "Publish rejected repeatedly, payload dead-lettered"
                    );
                    self.pop_head(topic);
                    report.dead_lettered += 1;
                    lock(&self.dead_letters).push(DeadLetter {
                        topic: topic.to_string(),
                        payload: head,
                        attempts,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.elapsed = started.elapsed();
        report.remaining = self.pending(topic);
        lock(&self.stats).record_drain(&report);

        if report.attempted > 0 || report.remaining > 0 {
            tracing::info!(
                topic = %topic,
                confirmed = report.confirmed,
                attempted = report.attempted,
                bytes = report.bytes,
                remaining = report.remaining,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Drained topic"
            );
        }

        if let Some(tx) = lock(&self.reports).as_ref() {
            let _ = tx.send(report.clone());
        }

        report
    }

    /// Mark the connection as lost; the supervisor takes over reconnection
    pub fn notify_disconnected(&self) {
        if self.transition(ConnectionState::Disconnected) {
            tracing::warn!(transport = self.transport.name(), "Broker connection lost");
        }
    }

    /// Disable reconnection, disconnect and publish the `Closed` state
    ///
    /// While connected, an offline notice is published to the last-will
    /// topic first. Queued payloads are kept; they can still be inspected
    /// with `pending`.
    pub async fn close(&self) {
        self.reconnect.store(false, Ordering::SeqCst);

        if let Some(topic) = self.config.last_will_topic.as_deref() {
            if self.is_connected() {
                self.publish_offline_notice(topic).await;
            }
        }

        if let Err(e) = self.transport.disconnect().await {
            tracing::warn!(error = %e, "Error while disconnecting from broker");
        }

        self.state.send_replace(ConnectionState::Closed);
        tracing::info!(
            pending = self.pending_total(),
            "Delivery queue closed"
        );
    }

    /// Number of payloads queued for `topic`
    pub fn pending(&self, topic: &str) -> usize {
        lock(&self.queues).get(topic).map_or(0, VecDeque::len)
    }

    /// Payloads given up on, oldest first
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        lock(&self.dead_letters).clone()
    }

    /// Number of payloads queued across all topics
    pub fn pending_total(&self) -> usize {
        lock(&self.queues).values().map(VecDeque::len).sum()
    }

    /// Topics that currently hold queued payloads
    pub fn pending_topics(&self) -> Vec<String> {
        lock(&self.queues)
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Start the reconnect supervisor
    pub fn spawn_supervisor(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let mut state_rx = self.state.subscribe();

        tokio::spawn(async move {
            loop {
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Closed => break,
                    ConnectionState::Disconnected if queue.reconnect.load(Ordering::SeqCst) => {
                        tokio::select! {
                            _ = tokio::time::sleep(queue.config.reconnect_delay) => {}
                            changed = state_rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                                continue;
                            }
                        }

                        if queue.reconnect.load(Ordering::SeqCst) {
                            tracing::info!("Attempting broker reconnection");
                            // Failure leaves the state Disconnected and loops again
                            let _ = queue.connect().await;
                        }
                        continue;
                    }
                    _ => {}
                }

                if state_rx.changed().await.is_err() {
                    break;
                }
            }

            tracing::debug!("Reconnect supervisor stopped");
        })
    }

    async fn publish_offline_notice(&self, topic: &str) {
        let notice = Payload::from(format!("Client {} offline", self.config.client_name));
        match self
            .transport
            .publish(topic, &notice, self.transport.max_qos())
            .await
        {
            Ok(()) => tracing::info!(topic = %topic, "Offline notice published"),
            Err(e) => tracing::warn!(topic = %topic, error = %e, "Offline notice failed"),
        }
    }

    /// Move to `next` unless closed; returns whether the state changed
    fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                false
            } else {
                *state = next;
                true
            }
        })
    }

    fn peek(&self, topic: &str) -> Option<Payload> {
        lock(&self.queues)
            .get(topic)
            .and_then(|q| q.front().cloned())
    }

    fn pop_head(&self, topic: &str) {
        if let Some(queue) = lock(&self.queues).get_mut(topic) {
            queue.pop_front();
        }
        lock(&self.head_rejections).remove(topic);
    }

    fn count_rejection(&self, topic: &str) -> u32 {
        let mut rejections = lock(&self.head_rejections);
        let count = rejections.entry(topic.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
