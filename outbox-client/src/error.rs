//! Error types for outbox-client.

use std::path::PathBuf;

use outbox_types::TypesError;

use crate::config::ConfigError;

/// Errors surfaced by [`Outbox`](crate::Outbox) and
/// [`SyncEngineContext`](crate::SyncEngineContext) operations.
///
/// Store write failures are not in here: they are logged and degrade
/// durability instead of failing the caller.
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    /// The message carries no content.
    #[error("message payload is empty")]
    EmptyPayload,

    /// The message id failed validation.
    #[error("invalid message id: {0}")]
    InvalidId(String),

    /// Every retained record is in flight and the queue is at capacity.
    #[error("outbox full: {capacity} messages in flight")]
    QueueFull {
        /// Configured capacity.
        capacity: usize,
    },

    /// Storage error while opening the store.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<TypesError> for OutboxError {
    fn from(err: TypesError) -> Self {
        match err {
            TypesError::InvalidId(reason) => Self::InvalidId(reason),
            TypesError::EmptyPayload => Self::EmptyPayload,
            other => Self::Storage(StorageError::Codec(other)),
        }
    }
}

/// Durable store errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error on the fallback file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or snapshot failed to encode/decode.
    #[error("codec error: {0}")]
    Codec(#[from] TypesError),

    /// Payload column failed to encode/decode.
    #[error("payload JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store path cannot be used.
    #[error("invalid store path: {}", .0.display())]
    InvalidPath(PathBuf),
}

/// Errors from the platform background-sync facility.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackgroundSyncError {
    /// The platform has no background sync.
    #[error("background sync not supported")]
    Unsupported,

    /// The host stopped listening for registrations.
    #[error("background sync host unavailable")]
    HostUnavailable,

    /// The platform refused the registration.
    #[error("background sync registration failed: {0}")]
    Platform(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn types_errors_map_to_outbox_errors() {
        assert!(matches!(
            OutboxError::from(TypesError::InvalidId("bad".into())),
            OutboxError::InvalidId(_)
        ));
        assert!(matches!(
            OutboxError::from(TypesError::EmptyPayload),
            OutboxError::EmptyPayload
        ));
        assert!(matches!(
            OutboxError::from(TypesError::UnknownStatus("x".into())),
            OutboxError::Storage(StorageError::Codec(_))
        ));
    }

    #[test]
    fn queue_full_display() {
        let err = OutboxError::QueueFull { capacity: 100 };
        assert_eq!(err.to_string(), "outbox full: 100 messages in flight");
    }

    #[test]
    fn invalid_path_display() {
        let err = StorageError::InvalidPath(PathBuf::from("/nope/outbox.db"));
        assert_eq!(err.to_string(), "invalid store path: /nope/outbox.db");
    }
}
