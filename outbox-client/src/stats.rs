//! Capability and queue statistics for the UI collaborator.

use serde::Serialize;

use outbox_types::SyncSummary;

use crate::store::{StorageUsage, StoreTier};

/// How the last completed drain went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LastSyncStatus {
    /// Every attempt was acknowledged.
    Success,
    /// Some attempts failed.
    Partial,
    /// No attempt was acknowledged.
    Failed,
}

impl LastSyncStatus {
    /// Classify a drain summary.
    pub fn from_summary(summary: &SyncSummary) -> Self {
        if summary.failed_count == 0 {
            Self::Success
        } else if summary.synced_count > 0 {
            Self::Partial
        } else {
            Self::Failed
        }
    }
}

/// The last drain that made at least one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastSync {
    /// Completion time (Unix millis).
    pub at: i64,
    /// Consolidated counts.
    pub summary: SyncSummary,
    /// Classification of `summary`.
    pub status: LastSyncStatus,
}

impl LastSync {
    /// Record a completed drain.
    pub fn new(at: i64, summary: SyncSummary) -> Self {
        Self {
            at,
            summary,
            status: LastSyncStatus::from_summary(&summary),
        }
    }
}

/// Read-only snapshot of the engine's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    /// Current connectivity.
    pub is_online: bool,
    /// All retained records, `failed` included.
    pub queue_length: usize,
    /// Records in `pending` or `sending`.
    pub pending_messages: usize,
    /// Records in terminal `failed`.
    pub failed_messages: usize,
    /// Completion time of the last drain with attempts.
    pub last_sync_time: Option<i64>,
    /// Outcome of that drain.
    pub last_sync_status: Option<LastSyncStatus>,
    /// Tier backing the store.
    pub store_tier: StoreTier,
    /// Durable store opened and no write has failed.
    pub durable_store_ready: bool,
    /// Platform background sync available.
    pub background_sync_supported: bool,
    /// Storage footprint, best-effort.
    pub storage_usage: Option<StorageUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(synced: usize, failed: usize) -> SyncSummary {
        SyncSummary {
            synced_count: synced,
            failed_count: failed,
            total_attempted: synced + failed,
        }
    }

    #[test]
    fn status_from_summary() {
        assert_eq!(LastSyncStatus::from_summary(&summary(3, 0)), LastSyncStatus::Success);
        assert_eq!(LastSyncStatus::from_summary(&summary(2, 1)), LastSyncStatus::Partial);
        assert_eq!(LastSyncStatus::from_summary(&summary(0, 2)), LastSyncStatus::Failed);
    }

    #[test]
    fn stats_serialize_camel_case() {
        let stats = SyncStats {
            is_online: true,
            queue_length: 2,
            pending_messages: 1,
            failed_messages: 1,
            last_sync_time: Some(42),
            last_sync_status: Some(LastSyncStatus::Partial),
            store_tier: StoreTier::Primary,
            durable_store_ready: true,
            background_sync_supported: false,
            storage_usage: Some(StorageUsage {
                used_bytes: 4096,
                quota_bytes: None,
            }),
        };

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["isOnline"], true);
        assert_eq!(json["pendingMessages"], 1);
        assert_eq!(json["lastSyncStatus"], "partial");
        assert_eq!(json["storeTier"], "primary");
        assert_eq!(json["storageUsage"]["usedBytes"], 4096);
    }
}
