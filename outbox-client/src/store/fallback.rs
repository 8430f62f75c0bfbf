//! Snapshot-file tier of the durable store.
//!
//! Holds every record and lease in one MessagePack file. Each mutation
//! rewrites the whole file through a temp file and a rename, so a crash
//! leaves either the old or the new snapshot. Best-effort: the platform may
//! discard the file under storage pressure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use outbox_core::Lease;
use outbox_types::{ContextId, MessageId, MessageStatus, QueuedMessage, TypesError};

use super::{sort_fifo, DurableStore, StorageUsage, StoreTier};
use crate::error::StorageError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    records: BTreeMap<String, QueuedMessage>,
    leases: BTreeMap<String, Lease>,
}

/// File-backed message store. Clones share the write lock.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileStore {
    /// Open the snapshot at `path`, creating an empty one if missing.
    ///
    /// Fails if an existing file cannot be decoded.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if path.file_name().is_none() {
            return Err(StorageError::InvalidPath(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let store = Self {
            path: path.to_path_buf(),
            lock: Arc::new(Mutex::new(())),
        };

        if tokio::fs::try_exists(path).await? {
            // Validate before trusting the file.
            store.load().await?;
        } else {
            store.save(&Snapshot::default()).await?;
        }

        Ok(store)
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Snapshot, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            // Discarded by the platform: start over empty.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
            Err(e) => return Err(e.into()),
        };
        rmp_serde::from_slice(&bytes).map_err(|e| TypesError::Deserialization(e).into())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let bytes = rmp_serde::to_vec_named(snapshot).map_err(TypesError::Serialization)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn modify<R: Send>(
        &self,
        f: impl FnOnce(&mut Snapshot) -> R + Send,
    ) -> Result<R, StorageError> {
        let _guard = self.lock.lock().await;
        let mut snapshot = self.load().await?;
        let result = f(&mut snapshot);
        self.save(&snapshot).await?;
        Ok(result)
    }
}

#[async_trait]
impl DurableStore for FileStore {
    fn tier(&self) -> StoreTier {
        StoreTier::Fallback
    }

    async fn put(&self, record: &QueuedMessage) -> Result<(), StorageError> {
        let record = record.clone();
        self.modify(move |s| {
            s.records.insert(record.id.to_string(), record);
        })
        .await
    }

    async fn get(&self, id: &MessageId) -> Result<Option<QueuedMessage>, StorageError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.records.remove(id.as_str()))
    }

    async fn get_all_by_status(
        &self,
        status: MessageStatus,
    ) -> Result<Vec<QueuedMessage>, StorageError> {
        let mut records: Vec<QueuedMessage> = self
            .all()
            .await?
            .into_iter()
            .filter(|r| r.status == status)
            .collect();
        sort_fifo(&mut records);
        Ok(records)
    }

    async fn all(&self) -> Result<Vec<QueuedMessage>, StorageError> {
        let _guard = self.lock.lock().await;
        let mut records: Vec<QueuedMessage> = self.load().await?.records.into_values().collect();
        sort_fifo(&mut records);
        Ok(records)
    }

    async fn delete(&self, id: &MessageId) -> Result<(), StorageError> {
        let key = id.to_string();
        self.modify(move |s| {
            s.records.remove(&key);
        })
        .await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.modify(|s| s.records.clear()).await
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: ContextId,
        now: i64,
        ttl_ms: i64,
    ) -> Result<bool, StorageError> {
        let name = name.to_string();
        self.modify(move |s| {
            if Lease::can_acquire(s.leases.get(&name), holder, now) {
                s.leases.insert(name, Lease::new(holder, now, ttl_ms));
                true
            } else {
                false
            }
        })
        .await
    }

    async fn release_lease(&self, name: &str, holder: ContextId) -> Result<(), StorageError> {
        let name = name.to_string();
        self.modify(move |s| {
            if s.leases.get(&name).is_some_and(|l| l.holder == holder) {
                s.leases.remove(&name);
            }
        })
        .await
    }

    async fn usage(&self) -> Result<StorageUsage, StorageError> {
        let used_bytes = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(StorageUsage {
            used_bytes,
            quota_bytes: None,
        })
    }
}
