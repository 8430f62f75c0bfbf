//! The persisted unit of work.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{MessageId, MessagePayload, TypesError};

/// Delivery status of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting for the next drain (first attempt or retry).
    Pending,
    /// Dispatched to the remote transport, no answer yet.
    Sending,
    /// Acknowledged by the remote side. Records are removed on ack, so this
    /// status is only observed transiently.
    Sent,
    /// Terminal: retries exhausted or rejected by the remote side.
    Failed,
}

impl MessageStatus {
    /// Status as stored on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// True for statuses that still count towards `pendingMessages`.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Sending)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(TypesError::UnknownStatus(other.to_string())),
        }
    }
}

/// A message held by the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    /// Client-generated id, stable across retries.
    pub id: MessageId,
    /// Message body plus metadata.
    pub payload: MessagePayload,
    /// Enqueue time (Unix millis), strictly increasing within one context.
    pub created_at: i64,
    /// Current delivery status.
    pub status: MessageStatus,
    /// Delivery attempts that failed so far.
    pub retry_count: u32,
    /// Time of the most recent attempt.
    pub last_attempt_at: Option<i64>,
    /// True if created while disconnected. Informational only.
    #[serde(rename = "offlineFlag")]
    pub offline: bool,
    /// Text of the most recent failure.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueuedMessage {
    /// Create a fresh pending record.
    pub fn new(id: MessageId, payload: MessagePayload, created_at: i64, offline: bool) -> Self {
        Self {
            id,
            payload,
            created_at,
            status: MessageStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            offline,
            last_error: None,
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec_named(self).map_err(TypesError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::Deserialization)
    }
}

/// A message as handed over by the UI collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Id to use; one is generated when absent.
    pub id: Option<MessageId>,
    /// Message body.
    pub payload: MessagePayload,
}

impl NewMessage {
    /// A message with a generated id.
    pub fn new(payload: MessagePayload) -> Self {
        Self { id: None, payload }
    }

    /// A message with a caller-chosen id.
    pub fn with_id(id: MessageId, payload: MessagePayload) -> Self {
        Self {
            id: Some(id),
            payload,
        }
    }
}
