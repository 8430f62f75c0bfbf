//! Error types for the outbox data model.

use thiserror::Error;

/// Errors raised while validating or encoding outbox records.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Message id failed validation
    #[error("invalid message id: {0}")]
    InvalidId(String),

    /// Payload carries no content
    #[error("message payload is empty")]
    EmptyPayload,

    /// Status string did not match a known status
    #[error("unknown message status: {0}")]
    UnknownStatus(String),

    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),
}
