//! SyncEngine - drains the outbox against the remote transport.
//!
//! # Architecture
//!
//! The engine interprets the pure delivery state machine from outbox-core
//! and performs the I/O: store updates through [`Outbox`], sends through
//! the [`RemoteTransport`], and timers through tokio.
//!
//! ```text
//! trigger → drain() → lease → reload → reconcile → mark_sending → send → mark_sent/failed
//!                                                                  ↓
//!                                                        residual? schedule_retry()
//! ```
//!
//! Guarantees:
//! - Drains never overlap within one context; a request while one runs
//!   returns [`DrainOutcome::Coalesced`].
//! - Only the lease holder dispatches among contexts sharing a store. A
//!   pass that loses the lease hands its undispatched records back.
//! - Every trigger cancels the pending delayed re-drain.
//! - Every send is bounded by the configured timeout, which counts as a
//!   transient failure.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use outbox_core::{DrainReason, RetryPolicy, StatusChange, SyncSession};
use outbox_types::{unix_millis, MessageId, SyncEvent, SyncSummary};

use crate::background::BackgroundSyncRegistrar;
use crate::config::OutboxConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::events::EventBus;
use crate::outbox::Outbox;
use crate::stats::LastSync;
use crate::transport::{RemoteTransport, TransportError};

/// Result of a drain request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// A pass ran over a non-empty batch.
    Completed(SyncSummary),
    /// Nothing was drainable.
    Idle,
    /// A drain was already running in this context.
    Coalesced,
    /// Offline; the next `online` transition drains.
    Offline,
    /// Another context holds the drain lease.
    LeaseHeld,
}

impl DrainOutcome {
    /// The pass summary, if a pass ran.
    pub fn summary(&self) -> Option<SyncSummary> {
        match self {
            Self::Completed(summary) => Some(*summary),
            _ => None,
        }
    }
}

/// Engine timing and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Attempts before terminal failure.
    pub policy: RetryPolicy,
    /// Delay before re-draining residual records.
    pub retry_delay: Duration,
    /// Bound on each send.
    pub send_timeout: Duration,
    /// Drain lease lifetime in milliseconds.
    pub lease_ttl_ms: i64,
}

impl EngineSettings {
    /// Settings from configuration.
    pub fn from_config(config: &OutboxConfig) -> Self {
        Self {
            policy: RetryPolicy::new(config.queue.retry_attempts),
            retry_delay: config.sync.retry_delay(),
            send_timeout: config.sync.send_timeout(),
            lease_ttl_ms: config.sync.lease_ttl_ms(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&OutboxConfig::default())
    }
}

struct ScheduledDrain {
    generation: u64,
    handle: JoinHandle<()>,
}

struct EngineInner<T> {
    outbox: Arc<Outbox>,
    transport: T,
    connectivity: Arc<ConnectivityMonitor>,
    background: Arc<BackgroundSyncRegistrar>,
    events: EventBus,
    settings: EngineSettings,
    draining: AtomicBool,
    scheduled: Mutex<Option<ScheduledDrain>>,
    generation: AtomicU64,
    last_sync: Mutex<Option<LastSync>>,
}

/// Resets the draining flag when a pass ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the outbox. Clones share state.
pub struct SyncEngine<T> {
    inner: Arc<EngineInner<T>>,
}

impl<T> Clone for SyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: RemoteTransport + 'static> SyncEngine<T> {
    /// Create an engine.
    pub fn new(
        outbox: Arc<Outbox>,
        transport: T,
        connectivity: Arc<ConnectivityMonitor>,
        background: Arc<BackgroundSyncRegistrar>,
        events: EventBus,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                outbox,
                transport,
                connectivity,
                background,
                events,
                settings,
                draining: AtomicBool::new(false),
                scheduled: Mutex::new(None),
                generation: AtomicU64::new(0),
                last_sync: Mutex::new(None),
            }),
        }
    }

    /// Run one drain pass now.
    pub async fn drain(&self, reason: DrainReason) -> DrainOutcome {
        let inner = &self.inner;
        self.cancel_scheduled();

        if !inner.connectivity.is_online() {
            tracing::debug!("Drain ({}) suppressed: offline", reason);
            return DrainOutcome::Offline;
        }
        if inner.draining.swap(true, Ordering::AcqRel) {
            tracing::debug!("Drain ({}) coalesced into running pass", reason);
            return DrainOutcome::Coalesced;
        }
        let guard = DrainGuard(&inner.draining);

        if !inner
            .outbox
            .try_acquire_drain_lease(inner.settings.lease_ttl_ms)
            .await
        {
            tracing::debug!("Drain ({}) skipped: another context holds the lease", reason);
            return DrainOutcome::LeaseHeld;
        }

        let outcome = self.run_pass(reason).await;
        inner.outbox.release_drain_lease().await;
        drop(guard);

        if matches!(outcome, DrainOutcome::Completed(_))
            && inner.connectivity.is_online()
            && inner.outbox.has_drainable().await
        {
            self.schedule_retry();
        }
        outcome
    }

    async fn run_pass(&self, reason: DrainReason) -> DrainOutcome {
        let inner = &self.inner;

        // Another context may have changed the store since our last look.
        inner.outbox.reload().await;
        // Passes never overlap within a context and we hold the lease, so
        // anything still `sending` belongs to a context that died mid-drain.
        inner.outbox.reconcile_orphans().await;
        let batch = inner.outbox.dequeue_batch().await;
        if batch.is_empty() {
            tracing::debug!("Drain ({}): nothing to send", reason);
            return DrainOutcome::Idle;
        }

        tracing::debug!("Drain ({}) starting: {} messages", reason, batch.len());
        inner.events.emit(SyncEvent::SyncStarted);
        let mut session = SyncSession::start(unix_millis());

        let ids: Vec<MessageId> = batch.into_iter().map(|r| r.id).collect();
        let claimed = inner.outbox.mark_sending(&ids).await;

        let mut lease_lost = false;
        for record in claimed {
            if lease_lost || !inner.connectivity.is_online() {
                inner.outbox.release(&record.id).await;
                session.defer(record.id);
                continue;
            }

            let result = match tokio::time::timeout(
                inner.settings.send_timeout,
                inner.transport.send_message(&record),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };

            let change = match result {
                Ok(()) => inner.outbox.mark_sent(&record.id).await,
                Err(e) => {
                    tracing::debug!(id = %record.id, error = %e, "Delivery attempt failed");
                    inner
                        .outbox
                        .mark_failed(&record.id, e.into(), &inner.settings.policy)
                        .await
                }
            };

            if let Some(change) = change {
                if let StatusChange::Fail(failed) = &change {
                    tracing::warn!(
                        id = %failed.id,
                        attempts = failed.retry_count,
                        "Message failed permanently: {}",
                        failed.last_error.as_deref().unwrap_or("unknown error")
                    );
                }
                session.record(&change);
            }

            // Keep the lease alive across long batches. Losing it means
            // another context now drains; hand the rest of the batch back.
            if !inner
                .outbox
                .try_acquire_drain_lease(inner.settings.lease_ttl_ms)
                .await
            {
                tracing::warn!(
                    "Drain ({}) lost the lease mid-pass; releasing remaining messages",
                    reason
                );
                lease_lost = true;
            }
        }

        let now = unix_millis();
        let summary = session.finish(now);
        if session.has_attempts() {
            *lock(&inner.last_sync) = Some(LastSync::new(now, summary));
        }
        if !session.deferred().is_empty() {
            tracing::debug!(
                "Drain ({}): {} messages deferred until online",
                reason,
                session.deferred().len()
            );
        }
        inner.background.drain_completed();

        tracing::info!(
            "Drain ({}) complete: {} synced, {} failed, {} attempted",
            reason,
            summary.synced_count,
            summary.failed_count,
            summary.total_attempted
        );
        inner.events.emit(SyncEvent::SyncCompleted(summary));
        DrainOutcome::Completed(summary)
    }

    /// Spawn a drain without waiting for it.
    pub fn request_drain(&self, reason: DrainReason) -> JoinHandle<DrainOutcome> {
        let engine = self.clone();
        tokio::spawn(async move { engine.drain(reason).await })
    }

    /// Schedule a single delayed re-drain, replacing any pending one.
    pub fn schedule_retry(&self) {
        let delay = self.inner.settings.retry_delay;
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let mut slot = lock(&self.inner.scheduled);
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach ourselves first so the drain below does not abort us.
            engine.clear_scheduled(generation);
            engine.drain(DrainReason::Scheduled).await;
        });
        if let Some(previous) = slot.replace(ScheduledDrain { generation, handle }) {
            previous.handle.abort();
        }
        tracing::debug!("Re-drain scheduled in {:?}", delay);
    }

    /// Cancel the pending delayed re-drain, if any.
    pub fn cancel_scheduled(&self) {
        if let Some(scheduled) = lock(&self.inner.scheduled).take() {
            scheduled.handle.abort();
            tracing::debug!("Cancelled scheduled re-drain");
        }
    }

    fn clear_scheduled(&self, generation: u64) {
        let mut slot = lock(&self.inner.scheduled);
        if slot.as_ref().is_some_and(|s| s.generation == generation) {
            slot.take();
        }
    }

    /// Check if a delayed re-drain is pending.
    pub fn has_scheduled(&self) -> bool {
        lock(&self.inner.scheduled).is_some()
    }

    /// Check if a pass is running.
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// Last drain with at least one attempt.
    pub fn last_sync(&self) -> Option<LastSync> {
        *lock(&self.inner.last_sync)
    }

    /// The transport in use.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Engine settings.
    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::UnsupportedBackgroundSync;
    use crate::channel::StorageChannel;
    use crate::store::{DurableStore, MemoryStore};
    use crate::transport::MockTransport;
    use outbox_types::{ContextId, MessagePayload, MessageStatus, NewMessage, QueuedMessage};

    struct Harness {
        engine: SyncEngine<MockTransport>,
        outbox: Arc<Outbox>,
        transport: MockTransport,
        connectivity: Arc<ConnectivityMonitor>,
        events: EventBus,
        store: MemoryStore,
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            policy: RetryPolicy::new(3),
            retry_delay: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
            lease_ttl_ms: 30_000,
        }
    }

    fn harness(settings: EngineSettings) -> Harness {
        let store = MemoryStore::new();
        let events = EventBus::default();
        let outbox = Arc::new(Outbox::new(
            ContextId::new(),
            100,
            Arc::new(store.clone()),
            StorageChannel::new(),
            events.clone(),
        ));
        let connectivity = Arc::new(ConnectivityMonitor::new(true, events.clone()));
        let background = Arc::new(BackgroundSyncRegistrar::new(
            Arc::new(UnsupportedBackgroundSync),
            "outbox-sync",
            true,
        ));
        let transport = MockTransport::new();
        let engine = SyncEngine::new(
            Arc::clone(&outbox),
            transport.clone(),
            Arc::clone(&connectivity),
            background,
            events.clone(),
            settings,
        );
        Harness {
            engine,
            outbox,
            transport,
            connectivity,
            events,
            store,
        }
    }

    async fn enqueue(h: &Harness, id: &str) -> MessageId {
        h.outbox
            .enqueue(
                NewMessage::with_id(MessageId::new(id).unwrap(), MessagePayload::chat(id, 0)),
                false,
            )
            .await
            .unwrap()
            .id
    }

    // ===========================================
    // Basic passes
    // ===========================================

    #[tokio::test]
    async fn drain_delivers_in_fifo_order() {
        let h = harness(settings());
        let a = enqueue(&h, "a").await;
        let b = enqueue(&h, "b").await;
        let c = enqueue(&h, "c").await;

        let outcome = h.engine.drain(DrainReason::Manual).await;

        assert_eq!(
            outcome,
            DrainOutcome::Completed(SyncSummary {
                synced_count: 3,
                failed_count: 0,
                total_attempted: 3,
            })
        );
        assert_eq!(h.transport.delivered(), vec![a, b, c]);
        assert_eq!(h.outbox.counts().await.total, 0);
        assert!(h.store.all().await.unwrap().is_empty());
        assert!(!h.engine.has_scheduled());
    }

    #[tokio::test]
    async fn empty_drain_is_idle_and_quiet() {
        let h = harness(settings());
        let mut rx = h.events.subscribe();

        assert_eq!(h.engine.drain(DrainReason::Manual).await, DrainOutcome::Idle);

        assert!(rx.try_recv().is_err());
        assert!(h.engine.last_sync().is_none());
    }

    #[tokio::test]
    async fn offline_drain_is_suppressed() {
        let h = harness(settings());
        enqueue(&h, "m1").await;
        h.connectivity.set_online(false);

        assert_eq!(h.engine.drain(DrainReason::Manual).await, DrainOutcome::Offline);
        assert!(h.transport.attempts().is_empty());
    }

    #[tokio::test]
    async fn pass_emits_started_then_completed() {
        let h = harness(settings());
        enqueue(&h, "m1").await;
        let mut rx = h.events.subscribe();

        h.engine.drain(DrainReason::Manual).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.first(), Some(&SyncEvent::SyncStarted));
        assert_eq!(
            events.last(),
            Some(&SyncEvent::SyncCompleted(SyncSummary {
                synced_count: 1,
                failed_count: 0,
                total_attempted: 1,
            }))
        );
        assert!(events.contains(&SyncEvent::QueueChanged { pending_messages: 0 }));
    }

    #[tokio::test]
    async fn last_sync_recorded_after_attempts() {
        let h = harness(settings());
        enqueue(&h, "m1").await;
        h.transport.fail_next(TransportError::Server { status: 500 });

        h.engine.drain(DrainReason::Manual).await;

        let last = h.engine.last_sync().unwrap();
        assert_eq!(last.summary.failed_count, 1);
        assert_eq!(last.status, crate::stats::LastSyncStatus::Failed);
    }

    // ===========================================
    // Retry policy
    // ===========================================

    #[tokio::test]
    async fn transient_failures_reach_failed_after_exact_attempts() {
        let h = harness(settings());
        let id = enqueue(&h, "m2").await;
        h.transport.fail_always(TransportError::Network("unreachable".into()));

        for _ in 0..3 {
            h.engine.drain(DrainReason::Manual).await;
        }
        // Terminal: further drains do not touch it.
        assert_eq!(h.engine.drain(DrainReason::Manual).await, DrainOutcome::Idle);

        let record = h.outbox.get(&id).await.unwrap();
        assert_eq!(record.status, MessageStatus::Failed);
        assert_eq!(record.retry_count, 3);
        assert_eq!(h.transport.attempts_for(&id), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_terminal_after_one_attempt() {
        let h = harness(settings());
        let id = enqueue(&h, "m1").await;
        h.transport.fail_next(TransportError::Rejected {
            reason: "validation".into(),
        });

        h.engine.drain(DrainReason::Manual).await;

        let record = h.outbox.get(&id).await.unwrap();
        assert_eq!(record.status, MessageStatus::Failed);
        assert_eq!(record.retry_count, 1);
        assert_eq!(h.transport.attempts_for(&id), 1);
        assert!(!h.engine.has_scheduled());
    }

    #[tokio::test]
    async fn failures_do_not_block_later_messages() {
        let h = harness(settings());
        let a = enqueue(&h, "a").await;
        let b = enqueue(&h, "b").await;
        h.transport.fail_next(TransportError::Timeout);

        let summary = h.engine.drain(DrainReason::Manual).await.summary().unwrap();

        assert_eq!(summary.synced_count, 1);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(h.transport.delivered(), vec![b]);
        assert_eq!(h.outbox.get(&a).await.unwrap().status, MessageStatus::Pending);
        h.engine.cancel_scheduled();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_send_times_out_as_transient() {
        let h = harness(settings());
        let id = enqueue(&h, "m1").await;
        h.transport.set_delay(Duration::from_secs(60));

        let summary = h.engine.drain(DrainReason::Manual).await.summary().unwrap();

        assert_eq!(summary.failed_count, 1);
        let record = h.outbox.get(&id).await.unwrap();
        assert_eq!(record.status, MessageStatus::Pending);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.last_error.as_deref(), Some("send timed out"));
        h.engine.cancel_scheduled();
    }

    // ===========================================
    // Scheduled re-drain
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn residual_failure_schedules_delayed_redrain() {
        let h = harness(settings());
        let id = enqueue(&h, "m1").await;
        h.transport.fail_next(TransportError::Server { status: 503 });

        h.engine.drain(DrainReason::Manual).await;
        assert!(h.engine.has_scheduled());
        assert!(h.transport.delivered().is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(h.transport.delivered(), vec![id]);
        assert!(!h.engine.has_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn new_trigger_cancels_scheduled_redrain() {
        let h = harness(settings());
        let id = enqueue(&h, "m1").await;
        h.transport.fail_next(TransportError::Server { status: 503 });
        h.engine.drain(DrainReason::Manual).await;
        assert!(h.engine.has_scheduled());

        h.engine.drain(DrainReason::CameOnline).await;
        assert!(!h.engine.has_scheduled());

        tokio::time::sleep(Duration::from_secs(60)).await;
        // Delivered once by the trigger; the cancelled timer never fired.
        assert_eq!(h.transport.attempts_for(&id), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_retry_replaces_pending_timer() {
        let h = harness(settings());
        enqueue(&h, "m1").await;

        h.engine.schedule_retry();
        h.engine.schedule_retry();
        assert!(h.engine.has_scheduled());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(h.transport.attempts().len(), 1);
    }

    // ===========================================
    // Concurrency
    // ===========================================

    #[tokio::test]
    async fn concurrent_drain_is_coalesced() {
        let h = harness(settings());
        let a = enqueue(&h, "a").await;
        let b = enqueue(&h, "b").await;
        h.transport.pause();

        let running = h.engine.request_drain(DrainReason::Manual);
        h.transport.wait_for_send().await;

        assert_eq!(h.engine.drain(DrainReason::Manual).await, DrainOutcome::Coalesced);
        assert_eq!(h.engine.drain(DrainReason::Manual).await, DrainOutcome::Coalesced);

        h.transport.resume();
        let outcome = running.await.unwrap();

        assert_eq!(outcome.summary().unwrap().synced_count, 2);
        assert_eq!(h.transport.attempts_for(&a), 1);
        assert_eq!(h.transport.attempts_for(&b), 1);
    }

    #[tokio::test]
    async fn going_offline_mid_drain_defers_undispatched() {
        let h = harness(settings());
        let a = enqueue(&h, "a").await;
        let b = enqueue(&h, "b").await;
        let c = enqueue(&h, "c").await;
        h.transport.pause();

        let running = h.engine.request_drain(DrainReason::Manual);
        h.transport.wait_for_send().await;
        h.connectivity.set_online(false);
        h.transport.resume();

        let summary = running.await.unwrap().summary().unwrap();

        // The dispatched message completes; the rest wait for connectivity.
        assert_eq!(summary.total_attempted, 1);
        assert_eq!(h.transport.delivered(), vec![a]);
        for id in [b, c] {
            let record = h.outbox.get(&id).await.unwrap();
            assert_eq!(record.status, MessageStatus::Pending);
            assert_eq!(record.retry_count, 0);
        }
        assert!(!h.engine.has_scheduled());
    }

    #[tokio::test]
    async fn lease_held_elsewhere_skips_drain() {
        let h = harness(settings());
        enqueue(&h, "m1").await;
        let other = ContextId::new();
        h.store
            .try_acquire_lease(outbox_core::DRAIN_LEASE, other, unix_millis(), 30_000)
            .await
            .unwrap();

        assert_eq!(h.engine.drain(DrainReason::Manual).await, DrainOutcome::LeaseHeld);
        assert!(h.transport.attempts().is_empty());
    }

    #[tokio::test]
    async fn lease_released_after_pass() {
        let h = harness(settings());
        enqueue(&h, "m1").await;

        h.engine.drain(DrainReason::Manual).await;

        let other = ContextId::new();
        assert!(h
            .store
            .try_acquire_lease(outbox_core::DRAIN_LEASE, other, unix_millis(), 30_000)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn stranded_sending_record_is_redelivered_after_lease_expiry() {
        let h = harness(settings());
        let id = MessageId::new("orphan").unwrap();
        let mut stranded = QueuedMessage::new(id.clone(), MessagePayload::chat("x", 0), 1, true);
        stranded.status = MessageStatus::Sending;
        h.store.put(&stranded).await.unwrap();
        // The context that claimed it died; its lease ran out long ago.
        let dead = ContextId::new();
        h.store
            .try_acquire_lease(outbox_core::DRAIN_LEASE, dead, unix_millis() - 60_000, 30_000)
            .await
            .unwrap();

        let summary = h.engine.drain(DrainReason::Manual).await.summary().unwrap();

        assert_eq!(summary.synced_count, 1);
        assert_eq!(h.transport.delivered(), vec![id.clone()]);
        assert!(h.store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn losing_lease_mid_pass_releases_rest_of_batch() {
        let h = harness(settings());
        let a = enqueue(&h, "a").await;
        let b = enqueue(&h, "b").await;
        let c = enqueue(&h, "c").await;
        h.transport.pause();

        let running = h.engine.request_drain(DrainReason::Manual);
        h.transport.wait_for_send().await;
        // Another context sees our lease as expired and takes over.
        let other = ContextId::new();
        assert!(h
            .store
            .try_acquire_lease(outbox_core::DRAIN_LEASE, other, unix_millis() + 60_000, 30_000)
            .await
            .unwrap());
        h.transport.resume();

        let summary = running.await.unwrap().summary().unwrap();

        assert_eq!(summary.total_attempted, 1);
        assert_eq!(h.transport.delivered(), vec![a]);
        for id in [b, c] {
            let record = h.outbox.get(&id).await.unwrap();
            assert_eq!(record.status, MessageStatus::Pending);
            assert_eq!(record.retry_count, 0);
        }
        assert_eq!(h.transport.attempts().len(), 1);
    }
}
