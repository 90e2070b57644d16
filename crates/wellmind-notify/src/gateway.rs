use crate::error::NotifyError;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use wellmind_common::types::Priority;

/// One push message addressed to a single device token.
#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Ok,
    Error,
}

/// Per-message delivery outcome returned by the gateway.
#[derive(Debug, Clone)]
pub struct PushTicket {
    pub status: TicketStatus,
    pub message: Option<String>,
}

/// The external push gateway consumed by the dispatcher.
///
/// Implementations must accept up to [`PushGateway::max_batch_size`]
/// messages per call and return exactly one ticket per message, in
/// order. Transport failures are transient: the engine never retries
/// inline, only via the next scheduled tick.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>>;

    /// Gateway-defined maximum chunk size.
    fn max_batch_size(&self) -> usize;
}

/// Whether a token is syntactically an Expo push token. Anything else
/// is filtered out before batching.
///
/// # Examples
///
/// ```
/// use wellmind_notify::gateway::is_valid_token;
///
/// assert!(is_valid_token("ExponentPushToken[abc123]"));
/// assert!(!is_valid_token("abc123"));
/// assert!(!is_valid_token("ExponentPushToken[]"));
/// ```
pub fn is_valid_token(token: &str) -> bool {
    token
        .strip_prefix("ExponentPushToken[")
        .and_then(|rest| rest.strip_suffix(']'))
        .is_some_and(|inner| !inner.is_empty())
}

#[derive(Deserialize)]
struct TicketPayload {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct BatchResponse {
    data: Vec<TicketPayload>,
}

/// HTTP implementation of [`PushGateway`] speaking the Expo push API
/// batch format, with a bounded request timeout.
pub struct HttpPushGateway {
    client: reqwest::Client,
    url: String,
    max_batch_size: usize,
}

impl HttpPushGateway {
    pub fn new(url: &str, timeout_secs: u64, max_batch_size: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            max_batch_size: max_batch_size.max(1),
        })
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>> {
        let response = self
            .client
            .post(&self.url)
            .json(messages)
            .send()
            .await
            .map_err(NotifyError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::GatewayStatus {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let parsed: BatchResponse = response.json().await.map_err(NotifyError::Http)?;
        if parsed.data.len() != messages.len() {
            return Err(NotifyError::TicketMismatch {
                expected: messages.len(),
                got: parsed.data.len(),
            }
            .into());
        }

        Ok(parsed
            .data
            .into_iter()
            .map(|t| PushTicket {
                status: if t.status == "ok" {
                    TicketStatus::Ok
                } else {
                    TicketStatus::Error
                },
                message: t.message,
            })
            .collect())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}
