//! Reliable Delivery
//!
//! Per-topic FIFO queues drained over a reconnecting broker transport:
//! - [`DeliveryQueue`]: at-least-once, publish-then-dequeue driver
//! - [`Transport`]: the broker seam, with [`HttpTransport`] for REST publish
//!   endpoints and [`MemoryTransport`] as an in-process loopback

mod http;
mod memory;
mod queue;
mod stats;

pub use http::{HttpTransport, HttpTransportConfig};
pub use memory::{MemoryTransport, PublishedMessage};
pub use queue::{
    ConnectionState, DeadLetter, DeliveryConfig, DeliveryQueue, DEFAULT_LAST_WILL_TOPIC,
};
pub use stats::{DeliveryStats, DrainReport};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Broker acknowledgment level
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    /// Numeric level as used on the wire
    pub fn level(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

/// An immutable, cheaply cloneable message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(Arc<[u8]>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Body as text, replacing invalid UTF-8
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload(Arc::from(s.into_bytes()))
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload(Arc::from(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload(Arc::from(bytes))
    }
}

/// A broker connection
///
/// Implementations report connection loss through the error kind returned
/// by `publish`; the queue owns reconnection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Strongest acknowledgment level this transport supports
    fn max_qos(&self) -> Qos {
        Qos::ExactlyOnce
    }

    /// Open the connection
    async fn connect(&self) -> Result<(), TransportError>;

    /// Publish one payload; `Ok` means the broker confirmed it
    async fn publish(&self, topic: &str, payload: &Payload, qos: Qos)
        -> Result<(), TransportError>;

    /// Close the connection
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Errors raised by a transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Broker rejected publish ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Transport not connected")]
    Closed,
}

impl TransportError {
    /// True if the connection must be re-established before publishing again
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            TransportError::Unavailable(_) | TransportError::Timeout | TransportError::Closed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        assert_eq!(Qos::AtMostOnce.level(), 0);
        assert_eq!(Qos::ExactlyOnce.level(), 2);
        assert!(Qos::ExactlyOnce > Qos::AtLeastOnce);
    }

    #[test]
    fn test_payload() {
        let payload = Payload::from("hello");
        assert_eq!(payload.len(), 5);
        assert_eq!(payload.to_text(), "hello");
        assert_eq!(payload.clone(), Payload::from(String::from("hello")));
        assert!(Payload::from(Vec::new()).is_empty());
    }

    #[test]
    fn test_connection_loss_classification() {
        assert!(TransportError::Timeout.is_connection_loss());
        assert!(TransportError::Closed.is_connection_loss());
        assert!(TransportError::Unavailable("refused".into()).is_connection_loss());
        assert!(!TransportError::Rejected {
            status: 400,
            message: "bad topic".into()
        }
        .is_connection_loss());
    }
}
