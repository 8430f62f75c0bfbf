//! # outbox-types
//!
//! Shared data model for the offline-first outbox.
//!
//! This crate provides the foundational types used across all outbox crates:
//! - [`MessageId`], [`ContextId`] - Identity types
//! - [`MessagePayload`] - Tagged union over the message kinds the outbox carries
//! - [`QueuedMessage`], [`MessageStatus`] - The persisted unit of work
//! - [`SyncEvent`], [`SyncSummary`] - Events consumed by the UI collaborator
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod events;
mod ids;
mod payload;
mod record;
mod time;

pub use error::TypesError;
pub use events::{SyncEvent, SyncSummary};
pub use ids::{ContextId, MessageId};
pub use payload::{ChatMessage, ControlCommand, MessagePayload};
pub use record::{MessageStatus, NewMessage, QueuedMessage};
pub use time::unix_millis;
