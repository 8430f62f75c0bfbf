//! Delivery state machine for queued messages.
//!
//! A record moves `pending -> sending -> {removed | pending | failed}`. This
//! module decides the last step: given the record that was dispatched and
//! what the transport reported, produce the record's next state. The caller
//! (outbox-client) applies the change to the buffer and the store.

use outbox_types::{MessageId, MessageStatus, QueuedMessage};

/// What the transport reported for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Remote side acknowledged the message.
    Delivered,
    /// The attempt failed.
    Failed(DeliveryFailure),
}

/// Details of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Human-readable failure text, retained on the record.
    pub reason: String,
    /// Whether another automatic attempt may succeed.
    pub retryable: bool,
}

impl DeliveryFailure {
    /// Transient failure (network, timeout, 5xx).
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// Non-retryable failure (validation rejection, malformed payload).
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
        }
    }
}

/// Retry policy for automatic drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed before a record becomes terminal `failed`.
    pub retry_attempts: u32,
}

impl RetryPolicy {
    /// Create a policy. Zero is clamped to one attempt.
    pub fn new(retry_attempts: u32) -> Self {
        Self {
            retry_attempts: retry_attempts.max(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Change to apply after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// Delivered: drop the record.
    Remove(MessageId),
    /// Transient failure with attempts left: back to `pending`.
    Retry(QueuedMessage),
    /// Terminal failure: retained as `failed`.
    Fail(QueuedMessage),
    /// The record was not in flight; nothing to apply.
    Unchanged(QueuedMessage),
}

impl StatusChange {
    /// True for a failed attempt (retry-pending or terminal).
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Retry(_) | Self::Fail(_))
    }
}

/// Compute the next state of a dispatched record.
///
/// This is a pure function. Only a record in `sending` is transitioned;
/// anything else comes back as [`StatusChange::Unchanged`].
pub fn on_outcome(
    mut record: QueuedMessage,
    outcome: DeliveryOutcome,
    policy: &RetryPolicy,
    now: i64,
) -> StatusChange {
    if record.status != MessageStatus::Sending {
        return StatusChange::Unchanged(record);
    }

    match outcome {
        DeliveryOutcome::Delivered => StatusChange::Remove(record.id),
        DeliveryOutcome::Failed(failure) => {
            record.retry_count = record.retry_count.saturating_add(1);
            record.last_attempt_at = Some(now);
            record.last_error = Some(failure.reason);

            if failure.retryable && record.retry_count < policy.retry_attempts {
                record.status = MessageStatus::Pending;
                StatusChange::Retry(record)
            } else {
                record.status = MessageStatus::Failed;
                StatusChange::Fail(record)
            }
        }
    }
}

/// Reset a record for an explicit user retry.
pub fn reset_for_retry(record: &mut QueuedMessage) {
    record.status = MessageStatus::Pending;
    record.retry_count = 0;
    record.last_error = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_types::MessagePayload;

    fn sending(retry_count: u32) -> QueuedMessage {
        let mut record = QueuedMessage::new(
            MessageId::new("m2").unwrap(),
            MessagePayload::chat("hello", 1),
            1,
            false,
        );
        record.status = MessageStatus::Sending;
        record.retry_count = retry_count;
        record
    }

    #[test]
    fn delivered_removes_record() {
        let change = on_outcome(sending(0), DeliveryOutcome::Delivered, &RetryPolicy::default(), 10);
        assert_eq!(change, StatusChange::Remove(MessageId::new("m2").unwrap()));
        assert!(!change.is_failure());
    }

    #[test]
    fn transient_failure_returns_to_pending() {
        let change = on_outcome(
            sending(0),
            DeliveryOutcome::Failed(DeliveryFailure::transient("connection reset")),
            &RetryPolicy::new(3),
            10,
        );

        match change {
            StatusChange::Retry(record) => {
                assert_eq!(record.status, MessageStatus::Pending);
                assert_eq!(record.retry_count, 1);
                assert_eq!(record.last_attempt_at, Some(10));
                assert_eq!(record.last_error.as_deref(), Some("connection reset"));
            }
            other => panic!("expected Retry, got {:?}", other),
        }
    }

    #[test]
    fn exhausted_attempts_become_terminal() {
        let policy = RetryPolicy::new(3);
        let mut record = sending(0);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let change = on_outcome(
                record,
                DeliveryOutcome::Failed(DeliveryFailure::transient("503")),
                &policy,
                attempts,
            );
            match change {
                StatusChange::Retry(mut next) => {
                    next.status = MessageStatus::Sending;
                    record = next;
                }
                StatusChange::Fail(done) => {
                    assert_eq!(done.status, MessageStatus::Failed);
                    assert_eq!(done.retry_count, 3);
                    break;
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(attempts, 3);
    }

    #[test]
    fn non_retryable_failure_is_terminal_immediately() {
        let change = on_outcome(
            sending(0),
            DeliveryOutcome::Failed(DeliveryFailure::permanent("validation rejected")),
            &RetryPolicy::new(5),
            10,
        );

        match change {
            StatusChange::Fail(record) => {
                assert_eq!(record.retry_count, 1);
                assert_eq!(record.status, MessageStatus::Failed);
            }
            other => panic!("expected Fail, got {:?}", other),
        }
    }

    #[test]
    fn records_not_in_flight_are_unchanged() {
        let mut record = sending(0);
        record.status = MessageStatus::Pending;

        let change = on_outcome(
            record.clone(),
            DeliveryOutcome::Failed(DeliveryFailure::transient("x")),
            &RetryPolicy::default(),
            10,
        );
        assert_eq!(change, StatusChange::Unchanged(record));
    }

    #[test]
    fn zero_attempt_policy_clamps_to_one() {
        assert_eq!(RetryPolicy::new(0).retry_attempts, 1);
    }

    #[test]
    fn reset_clears_failure_details() {
        let mut record = sending(3);
        record.status = MessageStatus::Failed;
        record.last_error = Some("boom".into());
        record.last_attempt_at = Some(99);

        reset_for_retry(&mut record);

        assert_eq!(record.status, MessageStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(record.last_error.is_none());
        assert_eq!(record.last_attempt_at, Some(99));
    }
}
