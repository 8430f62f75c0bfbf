//! Remote transport abstraction.
//!
//! The engine needs exactly one remote operation: deliver a record and learn
//! whether it was accepted. Implementations:
//! - [`HttpTransport`] - POSTs to the message service
//! - [`MockTransport`] - scripted outcomes for tests
//!
//! The remote side must deduplicate on the record id: a lost acknowledgement
//! leads to the same record being sent again.
//!
//! # Example
//!
//! ```ignore
//! let transport = HttpTransport::new("https://chat.example.com/api")?;
//! transport.send_message(&record).await?;
//! ```

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::MockTransport;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use outbox_core::DeliveryFailure;
use outbox_types::QueuedMessage;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Remote side unreachable.
    #[error("network error: {0}")]
    Network(String),

    /// No answer within the send timeout.
    #[error("send timed out")]
    Timeout,

    /// Remote side answered with an error status.
    #[error("server error: HTTP {status}")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// Remote side refused the message (validation).
    #[error("rejected: {reason}")]
    Rejected {
        /// Reason given by the remote side.
        reason: String,
    },

    /// The message could not be encoded for sending.
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Check if another automatic attempt may succeed.
    ///
    /// Network errors, timeouts, 5xx, 408 and 429 are transient; everything
    /// else is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Server { status } => *status >= 500 || *status == 408 || *status == 429,
            Self::Rejected { .. } | Self::Malformed(_) => false,
        }
    }
}

impl From<TransportError> for DeliveryFailure {
    fn from(err: TransportError) -> Self {
        DeliveryFailure {
            retryable: err.is_retryable(),
            reason: err.to_string(),
        }
    }
}

/// Trait for delivering queued messages to the remote service.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Deliver one record. `Ok(())` means the remote side acknowledged it.
    ///
    /// Implementations need not enforce a timeout: the engine wraps every
    /// call in one.
    async fn send_message(&self, record: &QueuedMessage) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: RemoteTransport + ?Sized> RemoteTransport for Arc<T> {
    async fn send_message(&self, record: &QueuedMessage) -> Result<(), TransportError> {
        (**self).send_message(record).await
    }
}
