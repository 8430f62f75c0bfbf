//! Durable store for queued messages.
//!
//! Three tiers implement [`DurableStore`]:
//! - [`SqliteStore`] - primary, crash-durable, indexed by status and creation time
//! - [`FileStore`] - best-effort snapshot file, used when the primary fails to open
//! - [`MemoryStore`] - process-local, used in tests and when both durable tiers fail
//!
//! The store also keeps the drain lease record so contexts sharing a store
//! can agree on who dispatches.

mod fallback;
mod memory;
mod sqlite;

pub use fallback::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use outbox_types::{ContextId, MessageId, MessageStatus, QueuedMessage};

use crate::config::StorageConfig;
use crate::error::StorageError;

/// Which tier backs a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreTier {
    /// SQLite database.
    Primary,
    /// Snapshot file.
    Fallback,
    /// Process memory only.
    Memory,
}

impl StoreTier {
    /// Tier name for logs and status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Memory => "memory",
        }
    }

    /// True if records survive a process restart.
    pub fn is_durable(&self) -> bool {
        !matches!(self, Self::Memory)
    }
}

impl std::fmt::Display for StoreTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort storage footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    /// Bytes currently used.
    pub used_bytes: u64,
    /// Upper bound, when the backend reports one.
    pub quota_bytes: Option<u64>,
}

/// Trait for durable store backends.
///
/// Implementations must be safe to share between contexts: clones (or
/// separate handles to the same path) see the same records and the same
/// lease.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Tier backing this store.
    fn tier(&self) -> StoreTier;

    /// Insert or replace a record by id.
    async fn put(&self, record: &QueuedMessage) -> Result<(), StorageError>;

    /// Look up a record by id.
    async fn get(&self, id: &MessageId) -> Result<Option<QueuedMessage>, StorageError>;

    /// All records with the given status, oldest first.
    async fn get_all_by_status(
        &self,
        status: MessageStatus,
    ) -> Result<Vec<QueuedMessage>, StorageError>;

    /// All records, oldest first.
    async fn all(&self) -> Result<Vec<QueuedMessage>, StorageError>;

    /// Delete a record. Deleting a missing id is not an error.
    async fn delete(&self, id: &MessageId) -> Result<(), StorageError>;

    /// Delete every record.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Take or renew the named lease for `holder` until `now + ttl_ms`.
    ///
    /// Returns false if another holder has an unexpired claim.
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: ContextId,
        now: i64,
        ttl_ms: i64,
    ) -> Result<bool, StorageError>;

    /// Drop the named lease if `holder` owns it.
    async fn release_lease(&self, name: &str, holder: ContextId) -> Result<(), StorageError>;

    /// Storage footprint.
    async fn usage(&self) -> Result<StorageUsage, StorageError>;
}

/// Open the best available tier under `data_dir`.
///
/// Tries SQLite first, then the snapshot file, then memory. Failures are
/// logged; this never fails because the memory tier always opens.
pub async fn open_store(config: &StorageConfig, data_dir: &Path) -> Arc<dyn DurableStore> {
    let database = config.database_path(data_dir);
    match SqliteStore::open(&database).await {
        Ok(store) => {
            tracing::debug!("Opened primary store at {}", database.display());
            return Arc::new(store);
        }
        Err(e) => {
            tracing::warn!(
                path = %database.display(),
                error = %e,
                "Primary store unavailable, trying fallback"
            );
        }
    }

    let fallback = config.fallback_path(data_dir);
    match FileStore::open(&fallback).await {
        Ok(store) => {
            tracing::warn!("Using fallback store at {}", fallback.display());
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                path = %fallback.display(),
                error = %e,
                "Fallback store unavailable, messages will only be kept in memory"
            );
            Arc::new(MemoryStore::new())
        }
    }
}

pub(crate) fn sort_fifo(records: &mut [QueuedMessage]) {
    records.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_store_prefers_primary() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&StorageConfig::default(), dir.path()).await;
        assert_eq!(store.tier(), StoreTier::Primary);
    }

    #[tokio::test]
    async fn open_store_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the database file should be makes SQLite fail.
        std::fs::create_dir(dir.path().join("outbox.db")).unwrap();

        let store = open_store(&StorageConfig::default(), dir.path()).await;
        assert_eq!(store.tier(), StoreTier::Fallback);
    }

    #[tokio::test]
    async fn open_store_degrades_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("outbox.db")).unwrap();
        std::fs::write(dir.path().join("outbox.fallback"), b"\xc1 not a snapshot").unwrap();

        let store = open_store(&StorageConfig::default(), dir.path()).await;
        assert_eq!(store.tier(), StoreTier::Memory);
        assert!(!store.tier().is_durable());
    }
}
