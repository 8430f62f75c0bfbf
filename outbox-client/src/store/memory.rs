//! In-memory tier of the durable store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use outbox_core::Lease;
use outbox_types::{ContextId, MessageId, MessageStatus, QueuedMessage};

use super::{sort_fifo, DurableStore, StorageUsage, StoreTier};
use crate::error::StorageError;

/// Process-local message store.
///
/// Clones share state, so two contexts built from clones of one store
/// behave like two tabs over the same origin storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    records: HashMap<MessageId, QueuedMessage>,
    leases: HashMap<String, Lease>,
    fail_writes: bool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until switched off (for testing degraded
    /// durability).
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn writable(&self) -> Result<MutexGuard<'_, MemoryStoreInner>, StorageError> {
        let inner = self.lock();
        if inner.fail_writes {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "memory store writes disabled",
            )));
        }
        Ok(inner)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    fn tier(&self) -> StoreTier {
        StoreTier::Memory
    }

    async fn put(&self, record: &QueuedMessage) -> Result<(), StorageError> {
        self.writable()?
            .records
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &MessageId) -> Result<Option<QueuedMessage>, StorageError> {
        Ok(self.lock().records.get(id).cloned())
    }

    async fn get_all_by_status(
        &self,
        status: MessageStatus,
    ) -> Result<Vec<QueuedMessage>, StorageError> {
        let mut records: Vec<QueuedMessage> = self
            .lock()
            .records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        sort_fifo(&mut records);
        Ok(records)
    }

    async fn all(&self) -> Result<Vec<QueuedMessage>, StorageError> {
        let mut records: Vec<QueuedMessage> = self.lock().records.values().cloned().collect();
        sort_fifo(&mut records);
        Ok(records)
    }

    async fn delete(&self, id: &MessageId) -> Result<(), StorageError> {
        self.writable()?.records.remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.writable()?.records.clear();
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: ContextId,
        now: i64,
        ttl_ms: i64,
    ) -> Result<bool, StorageError> {
        let mut inner = self.writable()?;
        if Lease::can_acquire(inner.leases.get(name), holder, now) {
            inner
                .leases
                .insert(name.to_string(), Lease::new(holder, now, ttl_ms));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn release_lease(&self, name: &str, holder: ContextId) -> Result<(), StorageError> {
        let mut inner = self.writable()?;
        if inner.leases.get(name).is_some_and(|l| l.holder == holder) {
            inner.leases.remove(name);
        }
        Ok(())
    }

    async fn usage(&self) -> Result<StorageUsage, StorageError> {
        let used_bytes = self
            .lock()
            .records
            .values()
            .map(|r| r.to_bytes().map(|b| b.len() as u64).unwrap_or(0))
            .sum();
        Ok(StorageUsage {
            used_bytes,
            quota_bytes: None,
        })
    }
}
