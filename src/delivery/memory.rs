//! In-process loopback transport
//!
//! Records every confirmed publish. Used for dry runs and to script broker
//! outages and rejected publishes.

use super::{Payload, Qos, Transport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// A message accepted by [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Payload,
    pub qos: Qos,
}

/// Loopback transport that keeps published messages in memory
#[derive(Debug, Default)]
pub struct MemoryTransport {
    published: Mutex<Vec<PublishedMessage>>,
    unreachable: AtomicBool,
    connected: AtomicBool,
    fail_publishes: AtomicU32,
    connect_attempts: AtomicU64,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the broker going away or coming back
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
        if !reachable {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Reject the next `count` publishes without dropping the connection
    pub fn fail_next_publishes(&self, count: u32) {
        self.fail_publishes.store(count, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// All confirmed messages in publish order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Confirmed payloads of one topic, as text
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.to_text())
            .collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("loopback unreachable".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &Payload,
        qos: Qos,
    ) -> Result<(), TransportError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("loopback unreachable".into()));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let rejected = self
            .fail_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(TransportError::Rejected {
                status: 503,
                message: "simulated publish failure".into(),
            });
        }

        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PublishedMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
                qos,
            });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let transport = MemoryTransport::new();
        let payload = Payload::from("p");

        assert!(matches!(
            transport.publish("t", &payload, Qos::ExactlyOnce).await,
            Err(TransportError::Closed)
        ));

        transport.connect().await.unwrap();
        transport.publish("t", &payload, Qos::ExactlyOnce).await.unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].qos, Qos::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let transport = MemoryTransport::new();
        transport.connect().await.unwrap();
        transport.fail_next_publishes(2);

        let payload = Payload::from("p");
        assert!(transport.publish("t", &payload, Qos::AtLeastOnce).await.is_err());
        assert!(transport.publish("t", &payload, Qos::AtLeastOnce).await.is_err());
        assert!(transport.publish("t", &payload, Qos::AtLeastOnce).await.is_ok());
        assert_eq!(transport.published_on("t"), vec!["p".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable() {
        let transport = MemoryTransport::new();
        transport.set_reachable(false);
        assert!(transport.connect().await.is_err());
        assert_eq!(transport.connect_attempts(), 1);
    }
}
