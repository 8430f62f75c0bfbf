//! Events emitted to the UI collaborator.

use serde::{Deserialize, Serialize};

/// Consolidated result of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Messages acknowledged by the remote side.
    pub synced_count: usize,
    /// Attempts that failed (retry-pending or terminal).
    pub failed_count: usize,
    /// Messages dispatched in this pass.
    pub total_attempted: usize,
}

/// Events the engine emits for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    /// A drain pass began dispatching.
    SyncStarted,
    /// A drain pass finished.
    SyncCompleted(SyncSummary),
    /// Queue contents changed.
    #[serde(rename_all = "camelCase")]
    QueueChanged {
        /// Records still waiting on delivery (pending + sending).
        pending_messages: usize,
    },
    /// Online/offline transition.
    #[serde(rename_all = "camelCase")]
    ConnectivityChanged {
        /// New connectivity.
        is_online: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_event_wire_shape() {
        let event = SyncEvent::SyncCompleted(SyncSummary {
            synced_count: 1,
            failed_count: 0,
            total_attempted: 1,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "sync-completed");
        assert_eq!(json["syncedCount"], 1);
        assert_eq!(json["failedCount"], 0);
        assert_eq!(json["totalAttempted"], 1);
    }

    #[test]
    fn queue_and_connectivity_event_names() {
        let queue = serde_json::to_value(SyncEvent::QueueChanged {
            pending_messages: 3,
        })
        .unwrap();
        assert_eq!(queue["type"], "queue-changed");
        assert_eq!(queue["pendingMessages"], 3);

        let conn = serde_json::to_value(SyncEvent::ConnectivityChanged { is_online: false }).unwrap();
        assert_eq!(conn["type"], "connectivity-changed");
        assert_eq!(conn["isOnline"], false);

        let started = serde_json::to_value(SyncEvent::SyncStarted).unwrap();
        assert_eq!(started["type"], "sync-started");
    }
}
