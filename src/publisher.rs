//! Message-bus publisher collaborator.
//!
//! The triage core republishes quarantined payloads through this narrow
//! interface; the production implementation talks to the RabbitMQ management
//! API so the backend needs no AMQP client of its own.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};

use crate::error::{TriageError, TriageResult};
use crate::http::shared_client;

/// Publishes a raw payload to a queue on the message bus.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        content_type: Option<&str>,
        headers: &Map<String, Value>,
        persistent: bool,
    ) -> TriageResult<()>;
}

/// Publisher backed by the RabbitMQ management API.
///
/// Publishes through the default exchange, which routes directly to the
/// queue named by the routing key.
pub struct RabbitMqHttpPublisher {
    api_url: String,
    /// Percent-encoded vhost, e.g. "%2f"
    vhost: String,
    user: String,
    password: String,
}

impl RabbitMqHttpPublisher {
    pub fn new(api_url: String, vhost: String, user: String, password: String) -> Self {
        Self {
            api_url,
            vhost,
            user,
            password,
        }
    }
}

#[async_trait]
impl MessagePublisher for RabbitMqHttpPublisher {
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        content_type: Option<&str>,
        headers: &Map<String, Value>,
        persistent: bool,
    ) -> TriageResult<()> {
        let url = format!(
            "{}/api/exchanges/{}/amq.default/publish",
            self.api_url.trim_end_matches('/'),
            self.vhost
        );

        let mut properties = Map::new();
        if persistent {
            properties.insert("delivery_mode".to_string(), Value::from(2));
        }
        if let Some(content_type) = content_type {
            properties.insert("content_type".to_string(), Value::from(content_type));
        }
        if !headers.is_empty() {
            properties.insert("headers".to_string(), Value::Object(headers.clone()));
        }

        let body = json!({
            "routing_key": queue,
            "properties": properties,
            "payload": STANDARD.encode(payload),
            "payload_encoding": "base64",
        });

        let response = shared_client()
            .post(&url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| TriageError::Publish(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TriageError::Publish(format!(
                "bus API returned {}",
                response.status()
            )));
        }

        let outcome: Value = response
            .json()
            .await
            .map_err(|e| TriageError::Publish(e.to_string()))?;
        if outcome.get("routed").and_then(Value::as_bool) != Some(true) {
            return Err(TriageError::Publish(format!(
                "message was not routed to queue {queue}"
            )));
        }

        Ok(())
    }
}
