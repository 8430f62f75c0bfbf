//! Outbox - the queue of messages waiting for delivery.
//!
//! [`Outbox`] owns the in-memory [`OutboxBuffer`] and mirrors every change
//! into the [`DurableStore`]. It is the only writer of the store: the engine
//! goes through its operations for status transitions and for the drain
//! lease.
//!
//! Store failures never reach callers. They are logged and flip the outbox
//! to degraded durability, after which the in-memory view is authoritative
//! for the rest of the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use outbox_core::{
    on_outcome, BufferError, DeliveryFailure, DeliveryOutcome, InsertOutcome, OutboxBuffer,
    QueueCounts, RetryPolicy, StatusChange, DRAIN_LEASE,
};
use outbox_types::{unix_millis, ContextId, MessageId, NewMessage, QueuedMessage, SyncEvent};

use crate::channel::StorageChannel;
use crate::error::{OutboxError, StorageError};
use crate::events::EventBus;
use crate::store::{DurableStore, StorageUsage, StoreTier};

/// Persisted outbox queue.
pub struct Outbox {
    context: ContextId,
    buffer: Mutex<OutboxBuffer>,
    store: Arc<dyn DurableStore>,
    channel: StorageChannel,
    events: EventBus,
    degraded: AtomicBool,
}

impl Outbox {
    /// Create an outbox over `store`. Call [`Self::recover`] before use.
    pub fn new(
        context: ContextId,
        capacity: usize,
        store: Arc<dyn DurableStore>,
        channel: StorageChannel,
        events: EventBus,
    ) -> Self {
        Self {
            context,
            buffer: Mutex::new(OutboxBuffer::new(capacity)),
            store,
            channel,
            events,
            degraded: AtomicBool::new(false),
        }
    }

    /// Context this outbox belongs to.
    pub fn context(&self) -> ContextId {
        self.context
    }

    // ===========================================
    // Queue operations
    // ===========================================

    /// Accept a message for delivery.
    ///
    /// Re-enqueuing an id that is `pending` or `sending` returns the
    /// existing record unchanged. An id whose record is terminal `failed`
    /// is replaced with a fresh record. When full, the oldest `pending` or
    /// `failed` record is evicted.
    pub async fn enqueue(
        &self,
        message: NewMessage,
        offline: bool,
    ) -> Result<QueuedMessage, OutboxError> {
        if message.payload.is_empty() {
            return Err(OutboxError::EmptyPayload);
        }
        let id = message.id.unwrap_or_else(MessageId::generate);

        let mut buffer = self.buffer.lock().await;
        let created_at = buffer.next_created_at(unix_millis());
        let record = QueuedMessage::new(id, message.payload, created_at, offline);

        match buffer.insert(record) {
            Ok(InsertOutcome::Duplicate(existing)) => {
                tracing::debug!("Duplicate enqueue of {} ignored", existing.id);
                Ok(existing)
            }
            Ok(InsertOutcome::Inserted {
                record,
                evicted,
                replaced,
            }) => {
                for id in &evicted {
                    tracing::warn!("Outbox full, evicted oldest message {}", id);
                    self.persist_delete(id).await;
                }
                self.persist_put(&record).await;
                if replaced {
                    tracing::debug!("Replaced failed message {}", record.id);
                }
                let counts = buffer.counts();
                drop(buffer);

                self.announce(counts);
                Ok(record)
            }
            Err(BufferError::Full { capacity }) => Err(OutboxError::QueueFull { capacity }),
        }
    }

    /// Records eligible for the next drain, oldest first.
    pub async fn dequeue_batch(&self) -> Vec<QueuedMessage> {
        self.buffer.lock().await.drainable()
    }

    /// Claim records for dispatch, persisting `sending` before any send.
    ///
    /// Returns the records actually claimed (ids no longer pending are
    /// skipped).
    pub async fn mark_sending(&self, ids: &[MessageId]) -> Vec<QueuedMessage> {
        let mut buffer = self.buffer.lock().await;
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = buffer.mark_sending(id) {
                self.persist_put(&record).await;
                claimed.push(record);
            }
        }
        drop(buffer);

        if !claimed.is_empty() {
            self.channel.publish(self.context);
        }
        claimed
    }

    /// Return an undispatched record to `pending` without counting an attempt.
    pub async fn release(&self, id: &MessageId) -> bool {
        let mut buffer = self.buffer.lock().await;
        match buffer.release(id) {
            Some(record) => {
                self.persist_put(&record).await;
                drop(buffer);
                self.channel.publish(self.context);
                true
            }
            None => false,
        }
    }

    /// Record an acknowledged delivery: the record is removed.
    pub async fn mark_sent(&self, id: &MessageId) -> Option<StatusChange> {
        self.complete(id, DeliveryOutcome::Delivered, &RetryPolicy::default())
            .await
    }

    /// Record a failed attempt: `retry_count` and `last_attempt_at` advance,
    /// and the record returns to `pending` or becomes terminal `failed`.
    pub async fn mark_failed(
        &self,
        id: &MessageId,
        failure: DeliveryFailure,
        policy: &RetryPolicy,
    ) -> Option<StatusChange> {
        self.complete(id, DeliveryOutcome::Failed(failure), policy)
            .await
    }

    async fn complete(
        &self,
        id: &MessageId,
        outcome: DeliveryOutcome,
        policy: &RetryPolicy,
    ) -> Option<StatusChange> {
        let mut buffer = self.buffer.lock().await;
        let current = buffer.get(id).cloned()?;

        let change = on_outcome(current, outcome, policy, unix_millis());
        match &change {
            StatusChange::Remove(id) => {
                buffer.remove(id);
                self.persist_delete(id).await;
            }
            StatusChange::Retry(record) | StatusChange::Fail(record) => {
                buffer.update(record.clone());
                self.persist_put(record).await;
            }
            StatusChange::Unchanged(record) => {
                tracing::debug!("Message {} not in flight, outcome ignored", record.id);
                return Some(change);
            }
        }
        let counts = buffer.counts();
        drop(buffer);

        self.announce(counts);
        Some(change)
    }

    /// Reset every terminal failure to `pending` with `retry_count = 0`.
    ///
    /// Returns the number of records reset.
    pub async fn reset_failed(&self) -> usize {
        let mut buffer = self.buffer.lock().await;
        let reset = buffer.reset_failed();
        for record in &reset {
            self.persist_put(record).await;
        }
        let counts = buffer.counts();
        drop(buffer);

        if !reset.is_empty() {
            tracing::info!("Reset {} failed messages for retry", reset.len());
            self.announce(counts);
        }
        reset.len()
    }

    /// Discard every record, in memory and in the store.
    pub async fn clear(&self) {
        let mut buffer = self.buffer.lock().await;
        let discarded = buffer.len();
        buffer.clear();
        if let Err(e) = self.store.clear().await {
            self.degrade("clear", &e);
        }
        let counts = buffer.counts();
        drop(buffer);

        tracing::info!("Discarded {} queued messages", discarded);
        self.announce(counts);
    }

    // ===========================================
    // Store synchronization
    // ===========================================

    /// Load the store into memory at startup.
    ///
    /// With `reconcile`, records left `sending` by a previous run go back to
    /// `pending`: no acknowledgement was ever recorded for them. Returns the
    /// number of reconciled records.
    pub async fn recover(&self, reconcile: bool) -> usize {
        let mut buffer = self.buffer.lock().await;
        match self.store.all().await {
            Ok(records) => buffer.replace_all(records),
            Err(e) => {
                self.degrade("load", &e);
                return 0;
            }
        }

        let reconciled = if reconcile {
            buffer.reconcile_in_flight()
        } else {
            Vec::new()
        };
        for record in &reconciled {
            self.persist_put(record).await;
        }
        let counts = buffer.counts();
        drop(buffer);

        tracing::info!(
            "Recovered {} queued messages ({} reconciled from sending)",
            counts.total,
            reconciled.len()
        );
        if !reconciled.is_empty() {
            self.channel.publish(self.context);
        }
        self.events.emit(SyncEvent::QueueChanged {
            pending_messages: counts.active(),
        });
        reconciled.len()
    }

    /// Replace the in-memory view with the store contents.
    ///
    /// Skipped once durability is degraded: the store no longer holds
    /// everything.
    pub async fn reload(&self) {
        if self.is_degraded() {
            tracing::debug!("Reload skipped, store degraded");
            return;
        }

        let mut buffer = self.buffer.lock().await;
        let before = buffer.counts();
        match self.store.all().await {
            Ok(records) => buffer.replace_all(records),
            Err(e) => {
                self.degrade("reload", &e);
                return;
            }
        }
        let after = buffer.counts();
        drop(buffer);

        if after != before {
            tracing::debug!("Reloaded outbox: {} records", after.total);
            self.events.emit(SyncEvent::QueueChanged {
                pending_messages: after.active(),
            });
        }
    }

    /// Return every `sending` record to `pending`.
    ///
    /// Only valid for the drain lease holder between passes: no send of its
    /// own is in flight, so any `sending` record was stranded by a context
    /// that died mid-drain. Returns the number of records reset.
    pub async fn reconcile_orphans(&self) -> usize {
        let mut buffer = self.buffer.lock().await;
        let reconciled = buffer.reconcile_in_flight();
        for record in &reconciled {
            self.persist_put(record).await;
        }
        drop(buffer);

        if !reconciled.is_empty() {
            tracing::info!(
                "Reconciled {} messages stranded in sending",
                reconciled.len()
            );
            self.channel.publish(self.context);
        }
        reconciled.len()
    }

    // ===========================================
    // Drain lease
    // ===========================================

    /// Take or renew the drain lease for this context.
    ///
    /// If the store cannot answer, the lease is treated as granted so a
    /// degraded session still delivers.
    pub async fn try_acquire_drain_lease(&self, ttl_ms: i64) -> bool {
        match self
            .store
            .try_acquire_lease(DRAIN_LEASE, self.context, unix_millis(), ttl_ms)
            .await
        {
            Ok(granted) => granted,
            Err(e) => {
                self.degrade("lease", &e);
                true
            }
        }
    }

    /// Release the drain lease if this context holds it.
    pub async fn release_drain_lease(&self) {
        if let Err(e) = self.store.release_lease(DRAIN_LEASE, self.context).await {
            tracing::warn!("Failed to release drain lease: {}", e);
        }
    }

    // ===========================================
    // Accessors
    // ===========================================

    /// Counts by status.
    pub async fn counts(&self) -> QueueCounts {
        self.buffer.lock().await.counts()
    }

    /// All records, oldest first.
    pub async fn records(&self) -> Vec<QueuedMessage> {
        self.buffer.lock().await.records()
    }

    /// Look up a record.
    pub async fn get(&self, id: &MessageId) -> Option<QueuedMessage> {
        self.buffer.lock().await.get(id).cloned()
    }

    /// Check if any record is waiting for a drain.
    pub async fn has_drainable(&self) -> bool {
        self.buffer.lock().await.has_drainable()
    }

    /// Configured capacity.
    pub async fn capacity(&self) -> usize {
        self.buffer.lock().await.capacity()
    }

    /// Tier backing the store.
    pub fn tier(&self) -> StoreTier {
        self.store.tier()
    }

    /// True once a store operation has failed this session.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// True if queued records survive a restart.
    pub fn is_durable(&self) -> bool {
        self.tier().is_durable() && !self.is_degraded()
    }

    /// Store footprint, if the store can report it.
    pub async fn usage(&self) -> Option<StorageUsage> {
        match self.store.usage().await {
            Ok(usage) => Some(usage),
            Err(e) => {
                tracing::debug!("Storage usage unavailable: {}", e);
                None
            }
        }
    }

    // ===========================================
    // Internals
    // ===========================================

    async fn persist_put(&self, record: &QueuedMessage) {
        if let Err(e) = self.store.put(record).await {
            self.degrade("write", &e);
        }
    }

    async fn persist_delete(&self, id: &MessageId) {
        if let Err(e) = self.store.delete(id).await {
            self.degrade("delete", &e);
        }
    }

    fn degrade(&self, operation: &str, error: &StorageError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                tier = %self.store.tier(),
                "Store {} failed, continuing with in-memory durability only: {}",
                operation,
                error
            );
        } else {
            tracing::debug!("Store {} failed again: {}", operation, error);
        }
    }

    fn announce(&self, counts: QueueCounts) {
        self.channel.publish(self.context);
        self.events.emit(SyncEvent::QueueChanged {
            pending_messages: counts.active(),
        });
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("context", &self.context)
            .field("tier", &self.store.tier())
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}
