//! HTTP transport for the remote message service.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use outbox_types::{MessagePayload, QueuedMessage};

use super::{RemoteTransport, TransportError};

/// Header carrying the message id so the service can deduplicate resends.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Request body for one message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    id: &'a str,
    payload: &'a MessagePayload,
    created_at: i64,
    retry_count: u32,
    offline: bool,
}

/// Optional acknowledgement body.
#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Delivers messages with `POST {endpoint}/messages`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport for the service at `endpoint`.
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Create a transport reusing an existing client.
    pub fn with_client(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            url: format!("{}/messages", endpoint.trim_end_matches('/')),
        }
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn send_message(&self, record: &QueuedMessage) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.url)
            .header(IDEMPOTENCY_HEADER, record.id.as_str())
            .json(&SendMessageRequest {
                id: record.id.as_str(),
                payload: &record.payload,
                created_at: record.created_at,
                retry_count: record.retry_count,
                offline: record.offline,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else if e.is_builder() {
                    TransportError::Malformed(e.to_string())
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;
            return acknowledgement(&bytes);
        }

        if is_transient_status(status) {
            tracing::debug!(id = %record.id, status = status.as_u16(), "Transient HTTP failure");
            return Err(TransportError::Server {
                status: status.as_u16(),
            });
        }

        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            let reason = if text.trim().is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                format!("HTTP {}: {}", status.as_u16(), text.trim())
            };
            return Err(TransportError::Rejected { reason });
        }

        Err(TransportError::Server {
            status: status.as_u16(),
        })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Interpret a 2xx body. Empty or non-JSON bodies count as an ack.
fn acknowledgement(bytes: &[u8]) -> Result<(), TransportError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }
    match serde_json::from_slice::<SendMessageResponse>(bytes) {
        Ok(ack) if !ack.success => Err(TransportError::Rejected {
            reason: ack
                .error
                .unwrap_or_else(|| "rejected by remote service".to_string()),
        }),
        _ => Ok(()),
    }
}
