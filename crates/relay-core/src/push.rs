//! Multicast push delivery.
//!
//! The dispatcher talks to a [`PushProvider`]; production uses
//! [`HttpPushProvider`] against a multicast push gateway, and deployments
//! without one fall back to [`DryRunPushProvider`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
}

/// One push request addressed to many device tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastMessage {
    pub tokens: Vec<String>,
    pub notification: PushNotification,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

/// Per-token results, in the same order as `MulticastMessage::tokens`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticastResponse {
    pub success_count: usize,
    pub failure_count: usize,
    #[serde(default)]
    pub responses: Vec<SendResponse>,
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push provider unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("push provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed multicast request: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Deliver one message to every token in a single provider call.
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastResponse, PushError>;
}

/// Posts multicast messages as JSON to a push gateway endpoint.
pub struct HttpPushProvider {
    client: reqwest::Client,
    endpoint: String,
    server_key: Option<String>,
}

impl HttpPushProvider {
    pub fn new(endpoint: impl Into<String>, server_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            server_key,
        }
    }
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastResponse, PushError> {
        if message.tokens.is_empty() {
            return Err(PushError::Malformed("multicast without tokens".into()));
        }

        let mut req = self.client.post(&self.endpoint).json(message);
        if let Some(key) = &self.server_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PushError::Rejected { status: status.as_u16(), body });
        }

        Ok(resp.json::<MulticastResponse>().await?)
    }
}

/// Logs each message instead of sending it and reports every token delivered.
#[derive(Debug, Default)]
pub struct DryRunPushProvider;

#[async_trait]
impl PushProvider for DryRunPushProvider {
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastResponse, PushError> {
        if message.tokens.is_empty() {
            return Err(PushError::Malformed("multicast without tokens".into()));
        }

        info!(
            "Dry-run push to {} token(s): {} / {}",
            message.tokens.len(),
            message.notification.title,
            message.notification.body
        );

        Ok(MulticastResponse {
            success_count: message.tokens.len(),
            failure_count: 0,
            responses: message
                .tokens
                .iter()
                .map(|_| SendResponse { success: true, ..Default::default() })
                .collect(),
        })
    }
}
