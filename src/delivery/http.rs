//! HTTP broker transport
//!
//! Publishes through a broker's REST publish endpoint (EMQX-style
//! `POST /api/v5/publish`). "Connecting" checks the broker status endpoint;
//! connect and timeout failures on publish are reported as connection loss.

use super::{Payload, Qos, Transport, TransportError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Configuration for [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Broker base URL (e.g., "http://localhost:18083")
    pub base_url: String,
    pub publish_path: String,
    pub status_path: String,
    /// Client identity sent with every publish
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    pub retain: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:18083".to_string(),
            publish_path: "/api/v5/publish".to_string(),
            status_path: "/api/v5/status".to_string(),
            client_id: "historian-relay".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(10),
            retain: false,
        }
    }
}

/// Broker transport over HTTP
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
    connected: AtomicBool,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            connected: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.password.as_deref()),
            None => request,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let url = self.url(&self.config.status_path);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(map_request_error)?;

        if response.status().is_success() {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(TransportError::Unavailable(format!(
                "status endpoint returned {}",
                response.status()
            )))
        }
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &Payload,
        qos: Qos,
    ) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let url = self.url(&self.config.publish_path);
        let body = PublishRequest {
            topic,
            clientid: &self.config.client_id,
            payload: payload.to_text(),
            payload_encoding: "plain",
            qos: qos.level(),
            retain: self.config.retain,
        };

        let result = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(map_request_error);

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if e.is_connection_loss() {
                    self.connected.store(false, Ordering::SeqCst);
                }
                return Err(e);
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::BAD_GATEWAY {
            self.connected.store(false, Ordering::SeqCst);
            return Err(TransportError::Unavailable(message));
        }

        Err(TransportError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn map_request_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Unavailable(e.to_string())
    } else {
        TransportError::Request(e)
    }
}

// ============================================
// Request DTOs
// ============================================

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    topic: &'a str,
    clientid: &'a str,
    payload: String,
    payload_encoding: &'static str,
    qos: u8,
    retain: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HttpTransportConfig::default();
        assert_eq!(config.publish_path, "/api/v5/publish");
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_url_joining() {
        let transport = HttpTransport::new(HttpTransportConfig {
            base_url: "http://broker:18083/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            transport.url("/api/v5/publish"),
            "http://broker:18083/api/v5/publish"
        );
    }

    #[test]
    fn test_publish_body() {
        let body = PublishRequest {
            topic: "plant/p10",
            clientid: "relay",
            payload: "T1: {t1:1.00000000}".into(),
            payload_encoding: "plain",
            qos: Qos::ExactlyOnce.level(),
            retain: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["topic"], "plant/p10");
        assert_eq!(json["qos"], 2);
        assert_eq!(json["payload_encoding"], "plain");
    }

    #[tokio::test]
    async fn test_publish_before_connect() {
        let transport = HttpTransport::new(HttpTransportConfig::default()).unwrap();
        let result = transport
            .publish("t", &Payload::from("p"), Qos::ExactlyOnce)
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker() {
        let transport = HttpTransport::new(HttpTransportConfig {
            base_url: "http://127.0.0.1:1".into(),
            timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap();

        let err = transport.connect().await.unwrap_err();
        assert!(err.is_connection_loss());
    }
}
