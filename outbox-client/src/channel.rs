//! Storage-change notifications between contexts sharing a store.
//!
//! Contexts built over the same store share one [`StorageChannel`]. Every
//! mutation publishes a [`StorageChange`]; the other contexts reload their
//! in-memory view instead of trusting it.

use tokio::sync::broadcast;

use outbox_types::ContextId;

/// A context changed the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageChange {
    /// Context that wrote.
    pub origin: ContextId,
}

/// Broadcast channel for [`StorageChange`]s. Clones share the channel.
#[derive(Debug, Clone)]
pub struct StorageChannel {
    tx: broadcast::Sender<StorageChange>,
}

impl StorageChannel {
    /// Create a new channel.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Announce a write by `origin`.
    pub fn publish(&self, origin: ContextId) {
        let _ = self.tx.send(StorageChange { origin });
    }

    /// Subscribe to future changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.tx.subscribe()
    }
}

impl Default for StorageChannel {
    fn default() -> Self {
        Self::new()
    }
}
