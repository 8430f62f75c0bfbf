//! Connectivity monitor.
//!
//! The host reports online/offline and visibility changes; the monitor runs
//! them through [`ConnectivityState`], announces transitions on the
//! [`EventBus`] and tells the caller when a drain is due.

use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

use outbox_core::{ConnectivityAction, ConnectivityState, DrainReason, Signal, Transition};
use outbox_types::SyncEvent;

use crate::events::EventBus;

/// Tracks connectivity and visibility for one context.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: Mutex<ConnectivityState>,
    online: watch::Sender<bool>,
    events: EventBus,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial connectivity (visible).
    pub fn new(online: bool, events: EventBus) -> Self {
        let (tx, _) = watch::channel(online);
        Self {
            state: Mutex::new(ConnectivityState::new(online, true)),
            online: tx,
            events,
        }
    }

    /// Current connectivity.
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Current visibility.
    pub fn is_visible(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .visible
    }

    /// Watch connectivity changes.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Feed a platform signal. Returns the drain to start, if any.
    pub fn signal(&self, signal: Signal) -> Option<DrainReason> {
        let actions = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let (next, actions) = state.on_signal(signal);
            *state = next;
            self.online.send_replace(next.online);
            actions
        };

        let mut drain = None;
        for action in actions {
            match action {
                ConnectivityAction::Emit(Transition::WentOnline) => {
                    tracing::info!("Connectivity restored");
                    self.events
                        .emit(SyncEvent::ConnectivityChanged { is_online: true });
                }
                ConnectivityAction::Emit(Transition::WentOffline) => {
                    tracing::info!("Connectivity lost");
                    self.events
                        .emit(SyncEvent::ConnectivityChanged { is_online: false });
                }
                ConnectivityAction::Emit(transition) => {
                    tracing::debug!("Visibility: {:?}", transition);
                }
                ConnectivityAction::RequestDrain(reason) => drain = Some(reason),
            }
        }
        drain
    }

    /// Report connectivity.
    pub fn set_online(&self, online: bool) -> Option<DrainReason> {
        self.signal(if online { Signal::Online } else { Signal::Offline })
    }

    /// Report visibility.
    pub fn set_visible(&self, visible: bool) -> Option<DrainReason> {
        self.signal(if visible {
            Signal::Visible
        } else {
            Signal::Hidden
        })
    }
}
