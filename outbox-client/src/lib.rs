//! # outbox-client
//!
//! Offline-first outbox queue and sync engine.
//!
//! Messages are persisted before any network attempt, survive restarts, and
//! are drained against a remote transport when connectivity allows, with
//! bounded retries and at-least-once delivery keyed on the message id.
//!
//! ## Features
//!
//! - **Tiered Store**: SQLite primary, MessagePack snapshot fallback, memory
//! - **Transport Abstraction**: Pluggable remote transport (HTTP, mock)
//! - **Cross-Context Safety**: Drain lease plus reload-on-change for contexts
//!   sharing a store
//! - **Pure State Machines**: Uses outbox-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use outbox_client::{HttpTransport, OutboxConfig, SyncEngineContext};
//! use outbox_types::{MessagePayload, NewMessage};
//!
//! let transport = HttpTransport::new("https://chat.example.com/api")?;
//! let context = SyncEngineContext::open(OutboxConfig::default(), data_dir, transport).await?;
//! context.start().await;
//!
//! context
//!     .enqueue(NewMessage::new(MessagePayload::chat("agendar revisão", now)))
//!     .await?;
//!
//! let stats = context.get_stats().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod channel;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod outbox;
pub mod stats;
pub mod store;
pub mod transport;

pub use background::{
    BackgroundSync, BackgroundSyncRegistrar, ChannelBackgroundSync, UnsupportedBackgroundSync,
};
pub use channel::{StorageChange, StorageChannel};
pub use config::{ConfigError, OutboxConfig};
pub use connectivity::ConnectivityMonitor;
pub use context::SyncEngineContext;
pub use engine::{DrainOutcome, EngineSettings, SyncEngine};
pub use error::{BackgroundSyncError, OutboxError, StorageError};
pub use events::EventBus;
pub use outbox::Outbox;
pub use stats::{LastSync, LastSyncStatus, SyncStats};
pub use store::{
    open_store, DurableStore, FileStore, MemoryStore, SqliteStore, StorageUsage, StoreTier,
};
pub use transport::{HttpTransport, MockTransport, RemoteTransport, TransportError};
