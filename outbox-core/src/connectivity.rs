//! Connectivity state machine.
//!
//! Turns raw platform signals (online/offline, visible/hidden) into
//! transitions to announce and drain requests to act on. Repeated signals
//! that do not change state produce no actions.

/// Raw signal observed from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Network became reachable.
    Online,
    /// Network became unreachable.
    Offline,
    /// Host page/process moved to the foreground.
    Visible,
    /// Host page/process moved to the background.
    Hidden,
}

/// A state change worth announcing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// offline -> online
    WentOnline,
    /// online -> offline
    WentOffline,
    /// hidden -> visible
    BecameVisible,
    /// visible -> hidden
    BecameHidden,
}

/// Why a drain was requested. Carried into logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    /// Connectivity returned.
    CameOnline,
    /// Host came to the foreground while online.
    BecameVisible,
    /// Delayed re-drain timer fired.
    Scheduled,
    /// Explicit `force_sync`.
    Manual,
    /// A message was enqueued while online.
    Enqueued,
    /// The platform fired a background sync.
    BackgroundSync,
    /// Context started with drainable records.
    Startup,
}

impl DrainReason {
    /// Short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CameOnline => "came-online",
            Self::BecameVisible => "became-visible",
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::Enqueued => "enqueued",
            Self::BackgroundSync => "background-sync",
            Self::Startup => "startup",
        }
    }
}

impl std::fmt::Display for DrainReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action for the caller to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityAction {
    /// Announce a transition.
    Emit(Transition),
    /// Start a drain (the engine checks whether anything is drainable).
    RequestDrain(DrainReason),
}

/// Connectivity and visibility flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    /// Network reachable.
    pub online: bool,
    /// Host in the foreground.
    pub visible: bool,
}

impl ConnectivityState {
    /// Create a state with the given initial flags.
    pub fn new(online: bool, visible: bool) -> Self {
        Self { online, visible }
    }

    /// Process a signal and return the new state plus actions to execute.
    ///
    /// Pure function: no side effects.
    pub fn on_signal(self, signal: Signal) -> (Self, Vec<ConnectivityAction>) {
        match signal {
            Signal::Online if !self.online => (
                Self {
                    online: true,
                    ..self
                },
                vec![
                    ConnectivityAction::Emit(Transition::WentOnline),
                    ConnectivityAction::RequestDrain(DrainReason::CameOnline),
                ],
            ),
            Signal::Offline if self.online => (
                Self {
                    online: false,
                    ..self
                },
                vec![ConnectivityAction::Emit(Transition::WentOffline)],
            ),
            Signal::Visible if !self.visible => {
                let mut actions = vec![ConnectivityAction::Emit(Transition::BecameVisible)];
                if self.online {
                    actions.push(ConnectivityAction::RequestDrain(DrainReason::BecameVisible));
                }
                (
                    Self {
                        visible: true,
                        ..self
                    },
                    actions,
                )
            }
            Signal::Hidden if self.visible => (
                Self {
                    visible: false,
                    ..self
                },
                vec![ConnectivityAction::Emit(Transition::BecameHidden)],
            ),
            // No change
            _ => (self, vec![]),
        }
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::new(true, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coming_online_emits_and_requests_drain() {
        let (state, actions) = ConnectivityState::new(false, true).on_signal(Signal::Online);

        assert!(state.online);
        assert_eq!(
            actions,
            vec![
                ConnectivityAction::Emit(Transition::WentOnline),
                ConnectivityAction::RequestDrain(DrainReason::CameOnline),
            ]
        );
    }

    #[test]
    fn going_offline_only_emits() {
        let (state, actions) = ConnectivityState::new(true, true).on_signal(Signal::Offline);

        assert!(!state.online);
        assert_eq!(actions, vec![ConnectivityAction::Emit(Transition::WentOffline)]);
    }

    #[test]
    fn repeated_signal_is_ignored() {
        let (state, actions) = ConnectivityState::new(true, true).on_signal(Signal::Online);
        assert!(state.online);
        assert!(actions.is_empty());

        let (_, actions) = ConnectivityState::new(false, false).on_signal(Signal::Hidden);
        assert!(actions.is_empty());
    }

    #[test]
    fn becoming_visible_drains_only_when_online() {
        let (_, online) = ConnectivityState::new(true, false).on_signal(Signal::Visible);
        assert_eq!(
            online,
            vec![
                ConnectivityAction::Emit(Transition::BecameVisible),
                ConnectivityAction::RequestDrain(DrainReason::BecameVisible),
            ]
        );

        let (state, offline) = ConnectivityState::new(false, false).on_signal(Signal::Visible);
        assert!(state.visible);
        assert_eq!(offline, vec![ConnectivityAction::Emit(Transition::BecameVisible)]);
    }

    #[test]
    fn hidden_keeps_online_flag() {
        let (state, _) = ConnectivityState::new(true, true).on_signal(Signal::Hidden);
        assert!(state.online);
        assert!(!state.visible);
    }

    #[test]
    fn offline_online_round_trip_requests_one_drain() {
        let state = ConnectivityState::default();
        let (state, _) = state.on_signal(Signal::Offline);
        let (_, actions) = state.on_signal(Signal::Online);

        let drains = actions
            .iter()
            .filter(|a| matches!(a, ConnectivityAction::RequestDrain(_)))
            .count();
        assert_eq!(drains, 1);
    }

    #[test]
    fn drain_reason_names() {
        assert_eq!(DrainReason::CameOnline.to_string(), "came-online");
        assert_eq!(DrainReason::BackgroundSync.as_str(), "background-sync");
    }
}
