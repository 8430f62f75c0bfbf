//! One drain pass, accumulated into a single completion summary.

use std::collections::BTreeSet;

use outbox_types::{MessageId, SyncSummary};

use crate::delivery::StatusChange;

/// Ephemeral record of one drain pass. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSession {
    started_at: i64,
    finished_at: Option<i64>,
    attempted: BTreeSet<MessageId>,
    synced: BTreeSet<MessageId>,
    failed: BTreeSet<MessageId>,
    deferred: BTreeSet<MessageId>,
}

impl SyncSession {
    /// Start a session at `now`.
    pub fn start(now: i64) -> Self {
        Self {
            started_at: now,
            finished_at: None,
            attempted: BTreeSet::new(),
            synced: BTreeSet::new(),
            failed: BTreeSet::new(),
            deferred: BTreeSet::new(),
        }
    }

    /// Record the change produced by one attempt.
    pub fn record(&mut self, change: &StatusChange) {
        match change {
            StatusChange::Remove(id) => {
                self.attempted.insert(id.clone());
                self.synced.insert(id.clone());
            }
            StatusChange::Retry(record) | StatusChange::Fail(record) => {
                self.attempted.insert(record.id.clone());
                self.failed.insert(record.id.clone());
            }
            StatusChange::Unchanged(_) => {}
        }
    }

    /// Record a message released without an attempt (went offline mid-pass).
    pub fn defer(&mut self, id: MessageId) {
        self.deferred.insert(id);
    }

    /// Ids dispatched in this pass.
    pub fn attempted(&self) -> &BTreeSet<MessageId> {
        &self.attempted
    }

    /// Ids released without an attempt.
    pub fn deferred(&self) -> &BTreeSet<MessageId> {
        &self.deferred
    }

    /// True if at least one attempt completed.
    pub fn has_attempts(&self) -> bool {
        !self.attempted.is_empty()
    }

    /// Session start time.
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// Session end time, once finished.
    pub fn finished_at(&self) -> Option<i64> {
        self.finished_at
    }

    /// Close the session and produce the consolidated summary.
    pub fn finish(&mut self, now: i64) -> SyncSummary {
        self.finished_at = Some(now);
        self.summary()
    }

    /// Summary of what was recorded so far.
    pub fn summary(&self) -> SyncSummary {
        SyncSummary {
            synced_count: self.synced.len(),
            failed_count: self.failed.len(),
            total_attempted: self.attempted.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_types::{MessagePayload, MessageStatus, QueuedMessage};

    fn record(id: &str, status: MessageStatus) -> QueuedMessage {
        let mut record = QueuedMessage::new(
            MessageId::new(id).unwrap(),
            MessagePayload::chat("x", 0),
            0,
            false,
        );
        record.status = status;
        record
    }

    #[test]
    fn empty_session_has_no_attempts() {
        let mut session = SyncSession::start(100);
        assert!(!session.has_attempts());
        assert_eq!(session.finish(200), SyncSummary::default());
        assert_eq!(session.finished_at(), Some(200));
    }

    #[test]
    fn summary_counts_each_outcome() {
        let mut session = SyncSession::start(0);
        session.record(&StatusChange::Remove(MessageId::new("a").unwrap()));
        session.record(&StatusChange::Retry(record("b", MessageStatus::Pending)));
        session.record(&StatusChange::Fail(record("c", MessageStatus::Failed)));
        session.record(&StatusChange::Unchanged(record("d", MessageStatus::Pending)));
        session.defer(MessageId::new("e").unwrap());

        let summary = session.finish(10);

        assert_eq!(summary.synced_count, 1);
        assert_eq!(summary.failed_count, 2);
        assert_eq!(summary.total_attempted, 3);
        assert_eq!(session.deferred().len(), 1);
        assert!(!session.attempted().contains(&MessageId::new("d").unwrap()));
    }
}
