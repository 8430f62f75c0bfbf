//! SyncEngineContext - one explicitly owned instance of the whole engine.
//!
//! A context wires the outbox, connectivity monitor, engine and background
//! registrar together over one store. Nothing is global: tests and hosts
//! create as many contexts as they like, and contexts built over the same
//! store and [`StorageChannel`] coordinate through the drain lease.
//!
//! Lifecycle: construct, [`start`](SyncEngineContext::start), use,
//! [`stop`](SyncEngineContext::stop). Short-lived hosts that only sometimes
//! deliver use [`start_idle`](SyncEngineContext::start_idle) and
//! [`flush`](SyncEngineContext::flush) instead.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use outbox_core::DrainReason;
use outbox_types::{ContextId, NewMessage, QueuedMessage, SyncEvent};

use crate::background::{BackgroundSync, BackgroundSyncRegistrar, UnsupportedBackgroundSync};
use crate::channel::StorageChannel;
use crate::config::OutboxConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::engine::{DrainOutcome, EngineSettings, SyncEngine};
use crate::error::OutboxError;
use crate::events::EventBus;
use crate::outbox::Outbox;
use crate::stats::SyncStats;
use crate::store::{open_store, DurableStore};
use crate::transport::RemoteTransport;

/// The offline outbox and its sync engine.
pub struct SyncEngineContext<T> {
    id: ContextId,
    config: OutboxConfig,
    outbox: Arc<Outbox>,
    engine: SyncEngine<T>,
    connectivity: Arc<ConnectivityMonitor>,
    events: EventBus,
    channel: StorageChannel,
    registrar: Arc<BackgroundSyncRegistrar>,
    listener: Mutex<Option<JoinHandle<()>>>,
    drains: Mutex<Vec<JoinHandle<DrainOutcome>>>,
    started: AtomicBool,
}

impl<T: RemoteTransport + 'static> SyncEngineContext<T> {
    /// Open the tiered store under `data_dir` and build a context over it.
    pub async fn open(
        config: OutboxConfig,
        data_dir: &Path,
        transport: T,
    ) -> Result<Self, OutboxError> {
        config.validate()?;
        let store = open_store(&config.storage, data_dir).await;
        Ok(Self::with_store(config, store, StorageChannel::new(), transport))
    }

    /// Build a context over an existing store.
    ///
    /// Contexts sharing `store` must share `channel` too.
    pub fn with_store(
        config: OutboxConfig,
        store: Arc<dyn DurableStore>,
        channel: StorageChannel,
        transport: T,
    ) -> Self {
        Self::with_parts(
            config,
            store,
            channel,
            transport,
            Arc::new(UnsupportedBackgroundSync),
        )
    }

    /// Build a context with a platform background-sync facility.
    pub fn with_parts(
        config: OutboxConfig,
        store: Arc<dyn DurableStore>,
        channel: StorageChannel,
        transport: T,
        background: Arc<dyn BackgroundSync>,
    ) -> Self {
        let id = ContextId::new();
        let events = EventBus::default();
        let outbox = Arc::new(Outbox::new(
            id,
            config.queue.max_offline_messages,
            store,
            channel.clone(),
            events.clone(),
        ));
        let connectivity = Arc::new(ConnectivityMonitor::new(true, events.clone()));
        let registrar = Arc::new(BackgroundSyncRegistrar::new(
            background,
            config.background.tag.clone(),
            config.background.enabled,
        ));
        let engine = SyncEngine::new(
            Arc::clone(&outbox),
            transport,
            Arc::clone(&connectivity),
            Arc::clone(&registrar),
            events.clone(),
            EngineSettings::from_config(&config),
        );

        Self {
            id,
            config,
            outbox,
            engine,
            connectivity,
            events,
            channel,
            registrar,
            listener: Mutex::new(None),
            drains: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    // ===========================================
    // Lifecycle
    // ===========================================

    /// Load the store, start listening for other contexts' writes, and
    /// drain anything left over when online. Idempotent.
    pub async fn start(&self) {
        if !self.start_idle().await {
            return;
        }
        if self.connectivity.is_online() && self.outbox.has_drainable().await {
            self.spawn_drain(DrainReason::Startup);
        }
    }

    /// Like [`Self::start`], without the startup drain.
    ///
    /// Returns false if the context was already started.
    pub async fn start_idle(&self) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }

        // Only the lease holder may assume stale `sending` records are dead.
        let leased = self
            .outbox
            .try_acquire_drain_lease(self.engine.settings().lease_ttl_ms)
            .await;
        self.outbox.recover(leased).await;
        if leased {
            self.outbox.release_drain_lease().await;
        }

        self.spawn_listener();
        tracing::info!(
            context = %self.id,
            tier = %self.outbox.tier(),
            "Sync engine started"
        );
        true
    }

    /// Wait for every drain this context started in the background.
    ///
    /// Returns their outcomes in start order. Delayed re-drains are not
    /// waited for.
    pub async fn flush(&self) -> Vec<DrainOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let pending = std::mem::take(&mut *lock(&self.drains));
            if pending.is_empty() {
                return outcomes;
            }
            for handle in pending {
                match handle.await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => tracing::warn!("Background drain did not finish: {}", e),
                }
            }
        }
    }

    /// Stop timers and the storage listener, let running drains finish, and
    /// give up the drain lease.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        self.engine.cancel_scheduled();
        self.flush().await;
        if let Some(listener) = lock(&self.listener).take() {
            listener.abort();
        }
        self.outbox.release_drain_lease().await;
        tracing::info!(context = %self.id, "Sync engine stopped");
    }

    fn spawn_listener(&self) {
        let mut rx = self.channel.subscribe();
        let outbox = Arc::clone(&self.outbox);
        let own = self.id;

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) if change.origin == own => {}
                    Ok(_) => outbox.reload().await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!("Missed {} storage notifications, reloading", missed);
                        outbox.reload().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let previous = lock(&self.listener).replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn spawn_drain(&self, reason: DrainReason) {
        let handle = self.engine.request_drain(reason);
        let mut drains = lock(&self.drains);
        drains.retain(|d| !d.is_finished());
        drains.push(handle);
    }

    // ===========================================
    // Inbound operations
    // ===========================================

    /// Queue a message. Online, a drain starts right away; offline, the
    /// platform is asked for a background sync.
    pub async fn enqueue(&self, message: NewMessage) -> Result<QueuedMessage, OutboxError> {
        let online = self.connectivity.is_online();
        let record = self.outbox.enqueue(message, !online).await?;

        if online {
            self.spawn_drain(DrainReason::Enqueued);
        } else {
            self.registrar.register_after_offline_enqueue().await;
        }
        Ok(record)
    }

    /// Drain now.
    pub async fn force_sync(&self) -> DrainOutcome {
        self.engine.drain(DrainReason::Manual).await
    }

    /// Discard every queued message. Explicit user action only.
    pub async fn clear_queue(&self) {
        self.engine.cancel_scheduled();
        self.outbox.clear().await;
    }

    /// Give every terminal failure a fresh set of attempts.
    ///
    /// Returns the number of records reset. Starts a drain when online.
    pub async fn retry_failed_messages(&self) -> usize {
        let reset = self.outbox.reset_failed().await;
        if reset > 0 && self.connectivity.is_online() {
            self.spawn_drain(DrainReason::Manual);
        }
        reset
    }

    /// Snapshot of queue, connectivity and capability state.
    pub async fn get_stats(&self) -> SyncStats {
        let counts = self.outbox.counts().await;
        let last_sync = self.engine.last_sync();
        SyncStats {
            is_online: self.connectivity.is_online(),
            queue_length: counts.total,
            pending_messages: counts.active(),
            failed_messages: counts.failed,
            last_sync_time: last_sync.map(|l| l.at),
            last_sync_status: last_sync.map(|l| l.status),
            store_tier: self.outbox.tier(),
            durable_store_ready: self.outbox.is_durable(),
            background_sync_supported: self.registrar.is_supported(),
            storage_usage: self.outbox.usage().await,
        }
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    // ===========================================
    // Platform signals
    // ===========================================

    /// Report connectivity. Returns the drain started by the transition.
    pub fn set_online(&self, online: bool) -> Option<JoinHandle<DrainOutcome>> {
        self.connectivity
            .set_online(online)
            .map(|reason| self.engine.request_drain(reason))
    }

    /// Report page visibility. Returns the drain started by the transition.
    pub fn set_visible(&self, visible: bool) -> Option<JoinHandle<DrainOutcome>> {
        self.connectivity
            .set_visible(visible)
            .map(|reason| self.engine.request_drain(reason))
    }

    /// The platform fired a background sync registration.
    pub async fn on_background_sync(&self, tag: &str) -> DrainOutcome {
        if tag != self.registrar.tag() {
            tracing::debug!("Ignoring background sync for unknown tag '{}'", tag);
            return DrainOutcome::Idle;
        }
        self.engine.drain(DrainReason::BackgroundSync).await
    }

    // ===========================================
    // Accessors
    // ===========================================

    /// This context's id.
    pub fn context_id(&self) -> ContextId {
        self.id
    }

    /// Active configuration.
    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// The outbox queue.
    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// The sync engine.
    pub fn engine(&self) -> &SyncEngine<T> {
        &self.engine
    }

    /// Current connectivity.
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }
}

fn lock<V>(mutex: &Mutex<V>) -> std::sync::MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> Drop for SyncEngineContext<T> {
    fn drop(&mut self) {
        if let Some(listener) = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }
}

impl<T> std::fmt::Debug for SyncEngineContext<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngineContext")
            .field("id", &self.id)
            .field("outbox", &self.outbox)
            .field("started", &self.started.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
