//! In-memory view of the outbox queue.
//!
//! This module provides the bookkeeping behind the outbox with:
//! - Idempotent insertion keyed by [`MessageId`]
//! - A hard capacity with FIFO eviction of the oldest `pending`/`failed` record
//! - FIFO selection of drainable records by `created_at`
//! - Status transitions that never touch in-flight (`sending`) records
//!   except through the explicit `release`/`reconcile` paths
//!
//! The buffer never persists anything. `outbox-client` mirrors every change
//! it reports into the durable store.

use std::collections::HashMap;
use thiserror::Error;

use outbox_types::{MessageId, MessageStatus, QueuedMessage};

use crate::delivery::reset_for_retry;

/// Error type for buffer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Buffer is at capacity and every retained record is in flight.
    #[error("outbox full (capacity: {capacity}, all records in flight)")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },
}

/// Result of inserting a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was stored.
    Inserted {
        /// The stored record.
        record: QueuedMessage,
        /// Records evicted to make room, oldest first.
        evicted: Vec<MessageId>,
        /// True if a terminal `failed` record with the same id was replaced.
        replaced: bool,
    },
    /// A non-terminal record with this id already exists; nothing changed.
    Duplicate(QueuedMessage),
}

/// Record counts by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueCounts {
    /// All retained records.
    pub total: usize,
    /// Records waiting for a drain.
    pub pending: usize,
    /// Records dispatched and awaiting an answer.
    pub sending: usize,
    /// Terminal failures retained for inspection.
    pub failed: usize,
}

impl QueueCounts {
    /// Records still waiting on delivery (pending + sending).
    pub fn active(&self) -> usize {
        self.pending + self.sending
    }
}

/// Outbox buffer with capacity and FIFO eviction.
///
/// Records flow through the buffer in this order:
/// 1. `insert()` - add as `pending`
/// 2. `mark_sending()` - claimed by a drain pass
/// 3. `remove()` on ack, or `update()` with the record produced by
///    [`on_outcome`](crate::on_outcome) on failure
#[derive(Debug)]
pub struct OutboxBuffer {
    /// Maximum number of retained records (all statuses).
    max_size: usize,
    records: HashMap<MessageId, QueuedMessage>,
    /// Highest `created_at` handed out or observed.
    last_created_at: i64,
}

impl OutboxBuffer {
    /// Create a new buffer with the given maximum size.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            records: HashMap::new(),
            last_created_at: 0,
        }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Next enqueue timestamp: `now`, bumped past the previous one if needed
    /// so ordering by `created_at` stays total.
    pub fn next_created_at(&mut self, now: i64) -> i64 {
        let ts = now.max(self.last_created_at + 1);
        self.last_created_at = ts;
        ts
    }

    /// Insert a record, evicting the oldest evictable records if at capacity.
    ///
    /// Re-inserting an id that is `pending` or `sending` is a no-op reported
    /// as [`InsertOutcome::Duplicate`]. An id whose record is terminal
    /// `failed` is replaced.
    pub fn insert(&mut self, record: QueuedMessage) -> Result<InsertOutcome, BufferError> {
        let mut replaced = None;
        if let Some(existing) = self.records.get(&record.id) {
            if existing.status != MessageStatus::Failed {
                return Ok(InsertOutcome::Duplicate(existing.clone()));
            }
            replaced = self.records.remove(&record.id);
        }

        let mut evicted = Vec::new();
        while self.records.len() >= self.max_size {
            match self.oldest_evictable() {
                Some(id) => {
                    self.records.remove(&id);
                    evicted.push(id);
                }
                None => {
                    // Undo: nothing may be lost on a rejected insert.
                    if let Some(old) = replaced {
                        self.records.insert(old.id.clone(), old);
                    }
                    return Err(BufferError::Full {
                        capacity: self.max_size,
                    });
                }
            }
        }

        self.last_created_at = self.last_created_at.max(record.created_at);
        self.records.insert(record.id.clone(), record.clone());
        Ok(InsertOutcome::Inserted {
            record,
            evicted,
            replaced: replaced.is_some(),
        })
    }

    fn oldest_evictable(&self) -> Option<MessageId> {
        self.records
            .values()
            .filter(|r| matches!(r.status, MessageStatus::Pending | MessageStatus::Failed))
            .min_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
            .map(|r| r.id.clone())
    }

    /// Look up a record.
    pub fn get(&self, id: &MessageId) -> Option<&QueuedMessage> {
        self.records.get(id)
    }

    /// Records eligible for the next drain pass, oldest first.
    ///
    /// Only `pending` records qualify: in-flight records are excluded to
    /// prevent double dispatch and terminal failures wait for an explicit
    /// retry.
    pub fn drainable(&self) -> Vec<QueuedMessage> {
        let mut batch: Vec<QueuedMessage> = self
            .records
            .values()
            .filter(|r| r.status == MessageStatus::Pending)
            .cloned()
            .collect();
        sort_fifo(&mut batch);
        batch
    }

    /// Check if any record is waiting for a drain.
    pub fn has_drainable(&self) -> bool {
        self.records
            .values()
            .any(|r| r.status == MessageStatus::Pending)
    }

    /// Claim a pending record for dispatch.
    ///
    /// Returns the updated record, or `None` if the record is missing or not
    /// pending.
    pub fn mark_sending(&mut self, id: &MessageId) -> Option<QueuedMessage> {
        let record = self.records.get_mut(id)?;
        if record.status != MessageStatus::Pending {
            return None;
        }
        record.status = MessageStatus::Sending;
        Some(record.clone())
    }

    /// Return an undispatched in-flight record to `pending`.
    ///
    /// `retry_count` is untouched: no attempt was made.
    pub fn release(&mut self, id: &MessageId) -> Option<QueuedMessage> {
        let record = self.records.get_mut(id)?;
        if record.status != MessageStatus::Sending {
            return None;
        }
        record.status = MessageStatus::Pending;
        Some(record.clone())
    }

    /// Remove a record (delivery acknowledged).
    pub fn remove(&mut self, id: &MessageId) -> Option<QueuedMessage> {
        self.records.remove(id)
    }

    /// Replace an existing record with a new state of itself.
    ///
    /// Returns false if the record is no longer present (evicted, cleared,
    /// or removed by another context).
    pub fn update(&mut self, record: QueuedMessage) -> bool {
        match self.records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record;
                true
            }
            None => false,
        }
    }

    /// Reset every terminal failure to a fresh `pending` record.
    ///
    /// Returns the reset records, oldest first.
    pub fn reset_failed(&mut self) -> Vec<QueuedMessage> {
        let mut reset = Vec::new();
        for record in self.records.values_mut() {
            if record.status == MessageStatus::Failed {
                reset_for_retry(record);
                reset.push(record.clone());
            }
        }
        sort_fifo(&mut reset);
        reset
    }

    /// Move every `sending` record back to `pending`.
    ///
    /// Used at startup: a record left `sending` by a crash never received
    /// an acknowledgement.
    pub fn reconcile_in_flight(&mut self) -> Vec<QueuedMessage> {
        let mut reconciled = Vec::new();
        for record in self.records.values_mut() {
            if record.status == MessageStatus::Sending {
                record.status = MessageStatus::Pending;
                reconciled.push(record.clone());
            }
        }
        sort_fifo(&mut reconciled);
        reconciled
    }

    /// Replace the whole view with records loaded from the store.
    pub fn replace_all(&mut self, records: Vec<QueuedMessage>) {
        self.records.clear();
        for record in records {
            self.last_created_at = self.last_created_at.max(record.created_at);
            self.records.insert(record.id.clone(), record);
        }
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<QueuedMessage> {
        let mut all: Vec<QueuedMessage> = self.records.values().cloned().collect();
        sort_fifo(&mut all);
        all
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the buffer holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Counts by status.
    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            total: self.records.len(),
            ..QueueCounts::default()
        };
        for record in self.records.values() {
            match record.status {
                MessageStatus::Pending => counts.pending += 1,
                MessageStatus::Sending => counts.sending += 1,
                MessageStatus::Failed => counts.failed += 1,
                MessageStatus::Sent => {}
            }
        }
        counts
    }
}

fn sort_fifo(records: &mut [QueuedMessage]) {
    records.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
}
