//! Background sync registration.
//!
//! When a message is enqueued while offline, the engine asks the platform
//! to wake it later, so a drain can happen even if the host is backgrounded
//! by then. Platforms without that facility use
//! [`UnsupportedBackgroundSync`], making registration a silent no-op.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::BackgroundSyncError;

/// Platform background-sync facility.
#[async_trait]
pub trait BackgroundSync: Send + Sync {
    /// Check if the platform can run deferred drains.
    fn is_supported(&self) -> bool;

    /// Ask the platform to fire `tag` when it sees fit.
    async fn register(&self, tag: &str) -> Result<(), BackgroundSyncError>;
}

/// No background sync on this platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedBackgroundSync;

#[async_trait]
impl BackgroundSync for UnsupportedBackgroundSync {
    fn is_supported(&self) -> bool {
        false
    }

    async fn register(&self, _tag: &str) -> Result<(), BackgroundSyncError> {
        Err(BackgroundSyncError::Unsupported)
    }
}

/// Forwards registrations to a host task over a channel.
///
/// The host owns the receiver, schedules the wake-up, and calls
/// [`SyncEngineContext::on_background_sync`](crate::SyncEngineContext::on_background_sync)
/// with the tag when it fires.
#[derive(Debug, Clone)]
pub struct ChannelBackgroundSync {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelBackgroundSync {
    /// Create the facility and the host's receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl BackgroundSync for ChannelBackgroundSync {
    fn is_supported(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn register(&self, tag: &str) -> Result<(), BackgroundSyncError> {
        self.tx
            .send(tag.to_string())
            .map_err(|_| BackgroundSyncError::HostUnavailable)
    }
}

/// Registers interest at most once between completed drains.
pub struct BackgroundSyncRegistrar {
    backend: Arc<dyn BackgroundSync>,
    tag: String,
    enabled: bool,
    registered: AtomicBool,
}

impl BackgroundSyncRegistrar {
    /// Create a registrar over `backend`.
    pub fn new(backend: Arc<dyn BackgroundSync>, tag: impl Into<String>, enabled: bool) -> Self {
        Self {
            backend,
            tag: tag.into(),
            enabled,
            registered: AtomicBool::new(false),
        }
    }

    /// Tag used for registrations.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Check if registrations can reach the platform.
    pub fn is_supported(&self) -> bool {
        self.enabled && self.backend.is_supported()
    }

    /// Register after an offline enqueue. Never fails: errors are logged.
    pub async fn register_after_offline_enqueue(&self) {
        if !self.is_supported() {
            return;
        }
        if self.registered.swap(true, Ordering::AcqRel) {
            return;
        }

        match self.backend.register(&self.tag).await {
            Ok(()) => tracing::debug!("Registered background sync '{}'", self.tag),
            Err(e) => {
                self.registered.store(false, Ordering::Release);
                tracing::warn!("Background sync registration failed: {}", e);
            }
        }
    }

    /// A drain completed; the next offline enqueue registers again.
    pub fn drain_completed(&self) {
        self.registered.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for BackgroundSyncRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundSyncRegistrar")
            .field("tag", &self.tag)
            .field("enabled", &self.enabled)
            .field("registered", &self.registered.load(Ordering::Acquire))
            .finish()
    }
}
