//! Mock transport for testing.
//!
//! Allows scripting outcomes, capturing attempts, and holding sends open to
//! exercise concurrency.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};

use outbox_types::{MessageId, QueuedMessage};

use super::{RemoteTransport, TransportError};

/// Mock transport for testing.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another.
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    paused: Arc<watch::Sender<bool>>,
    send_started: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    attempts: Vec<MessageId>,
    delivered: Vec<MessageId>,
    scripted: VecDeque<Result<(), TransportError>>,
    fail_always: Option<TransportError>,
    delay: Option<Duration>,
}

impl Default for MockTransport {
    fn default() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
            paused: Arc::new(paused),
            send_started: Arc::new(Notify::new()),
        }
    }
}

impl MockTransport {
    /// Create a mock that acknowledges everything.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cause the next send to fail with the given error.
    ///
    /// Scripted outcomes are consumed in order before `fail_always` applies.
    pub fn fail_next(&self, error: TransportError) {
        self.lock().scripted.push_back(Err(error));
    }

    /// Cause the next send to succeed even while `fail_always` is set.
    pub fn succeed_next(&self) {
        self.lock().scripted.push_back(Ok(()));
    }

    /// Fail every send with the given error until [`Self::recover`].
    pub fn fail_always(&self, error: TransportError) {
        self.lock().fail_always = Some(error);
    }

    /// Stop failing.
    pub fn recover(&self) {
        let mut inner = self.lock();
        inner.fail_always = None;
        inner.scripted.clear();
    }

    /// Wait this long before answering each send.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Hold every send open until [`Self::resume`].
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Release held sends.
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Wait until a send has started.
    pub async fn wait_for_send(&self) {
        self.send_started.notified().await;
    }

    /// Ids of every attempt, in order.
    pub fn attempts(&self) -> Vec<MessageId> {
        self.lock().attempts.clone()
    }

    /// Number of attempts made for one id.
    pub fn attempts_for(&self, id: &MessageId) -> usize {
        self.lock().attempts.iter().filter(|a| *a == id).count()
    }

    /// Ids that were acknowledged, in order.
    pub fn delivered(&self) -> Vec<MessageId> {
        self.lock().delivered.clone()
    }

    /// Clear all state.
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
        self.resume();
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn send_message(&self, record: &QueuedMessage) -> Result<(), TransportError> {
        let delay = {
            let mut inner = self.lock();
            inner.attempts.push(record.id.clone());
            inner.delay
        };
        self.send_started.notify_one();

        let mut gate = self.paused.subscribe();
        // The sender lives as long as self, so this only ends when resumed.
        let _ = gate.wait_for(|paused| !*paused).await;

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        let outcome = match inner.scripted.pop_front() {
            Some(scripted) => scripted,
            None => match &inner.fail_always {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            },
        };
        if outcome.is_ok() {
            inner.delivered.push(record.id.clone());
        }
        outcome
    }
}
