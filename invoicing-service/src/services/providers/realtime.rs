//! Realtime pub/sub publishing for chat updates.

use super::ProviderError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use serde_json::Value;
use service_core::utils::sign_payload;
use std::sync::Mutex;
use std::time::Duration;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

#[async_trait]
pub trait RealtimePublisher: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: Value)
        -> Result<(), ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedEvent {
    pub channel: String,
    pub event: String,
    pub data: Value,
}

/// Posts events to an HTTP relay. With a secret configured, the body is signed
/// with HMAC-SHA256 over `"<timestamp>.<body>"`.
pub struct HttpRealtimePublisher {
    client: Client,
    endpoint: String,
    secret: Option<Secret<String>>,
}

impl HttpRealtimePublisher {
    pub fn new(endpoint: String, secret: Option<Secret<String>>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ProviderError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint,
            secret,
        })
    }
}

#[async_trait]
impl RealtimePublisher for HttpRealtimePublisher {
    async fn publish(
        &self,
        channel: &str,
        event: &str,
        payload: Value,
    ) -> Result<(), ProviderError> {
        let body = serde_json::to_vec(&PublishedEvent {
            channel: channel.to_string(),
            event: event.to_string(),
            data: payload,
        })
        .map_err(|e| ProviderError::SendFailed(format!("Failed to encode event: {}", e)))?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json");

        if let Some(secret) = &self.secret {
            let timestamp = Utc::now().timestamp();
            let signature = sign_payload(secret.expose_secret(), timestamp, &body)
                .map_err(|e| ProviderError::Configuration(e.to_string()))?;
            request = request
                .header(TIMESTAMP_HEADER, timestamp.to_string())
                .header(SIGNATURE_HEADER, signature);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(format!("Realtime relay unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(ProviderError::SendFailed(format!(
                "Realtime relay returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Used when no realtime relay is configured.
#[derive(Debug, Default)]
pub struct NoopPublisher;

#[async_trait]
impl RealtimePublisher for NoopPublisher {
    async fn publish(
        &self,
        channel: &str,
        event: &str,
        _payload: Value,
    ) -> Result<(), ProviderError> {
        tracing::debug!(channel, event, "Realtime publishing disabled");
        Ok(())
    }
}

/// Keeps published events in memory for assertions.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<PublishedEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn on_channel(&self, channel: &str) -> Vec<PublishedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.channel == channel)
            .collect()
    }
}

#[async_trait]
impl RealtimePublisher for RecordingPublisher {
    async fn publish(
        &self,
        channel: &str,
        event: &str,
        payload: Value,
    ) -> Result<(), ProviderError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(PublishedEvent {
                channel: channel.to_string(),
                event: event.to_string(),
                data: payload,
            });
        }
        Ok(())
    }
}
