//! Per-endpoint connection lifecycle state machine.
//!
//! Every remote device the session hears about gets one [`EndpointLifecycle`].
//! Transport notifications are translated into [`LifecycleEvent`]s and applied
//! to the machine, which answers with a [`Step`] describing what happened.
//!
//! # Connection lifecycle (for beginners)
//!
//! ```text
//!                   request / initiated          result OK
//! Discovered  ───────────────────────►  Connecting  ──────────►  Connected
//!     │                                     │                        │
//!     │ lost                                │ result not OK          │ disconnected
//!     ▼                                     ▼                        ▼
//! Disconnected (Lost)            Disconnected (Rejected)   Disconnected (Disconnected)
//! ```
//!
//! `Disconnected` is terminal: the owner removes the machine once it gets
//! there, so absence from the owning table means "never seen" or "gone".
//!
//! The machine assumes the transport delivers events for one endpoint in
//! causal order.  Events that make no sense for the current state return a
//! [`LifecycleError`]; callers log and ignore them.

use thiserror::Error;

use crate::domain::endpoint::EndpointId;

/// Connection state of a single endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointState {
    /// Seen by discovery; no connection attempt yet.
    Discovered,
    /// A connection request is in flight (ours or the peer's).
    Connecting,
    /// The transport reported a successful connection.
    Connected,
    /// Terminal.  See [`ExitReason`] for how the endpoint got here.
    Disconnected,
}

/// Why an endpoint reached [`EndpointState::Disconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The connection result was not OK.
    Rejected,
    /// The transport reported a disconnection.
    Disconnected,
    /// Discovery lost the endpoint before any connection attempt.
    Lost,
}

/// Input to the state machine, one per transport notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Discovery reported the endpoint.
    Found,
    /// This side issued a connection request.
    ConnectionRequested,
    /// The transport offered a handshake (either side initiated).
    ConnectionInitiated,
    /// The transport reported an OK connection result.
    ConnectionSucceeded,
    /// The transport reported a non-OK connection result.
    ConnectionFailed,
    /// The transport reported a disconnection.
    Disconnected,
    /// Discovery no longer sees the endpoint.
    Lost,
}

/// Outcome of applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The endpoint changed state.  `from` is `None` for a newly created machine.
    Moved {
        from: Option<EndpointState>,
        to: EndpointState,
    },
    /// The event was valid but changes nothing (duplicates, races).
    Unchanged(EndpointState),
    /// The endpoint reached the terminal state and must be dropped.
    Ended {
        from: EndpointState,
        reason: ExitReason,
    },
}

/// Errors returned for events that cannot apply to the current state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// The event is impossible from the current state.
    #[error("endpoint {id}: {event:?} is not valid while {state:?}")]
    InvalidTransition {
        id: EndpointId,
        state: EndpointState,
        event: LifecycleEvent,
    },
    /// The machine already ended and accepts nothing further.
    #[error("endpoint {0} already reached its terminal state")]
    Terminated(EndpointId),
}

/// State machine for one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointLifecycle {
    id: EndpointId,
    state: EndpointState,
    exit: Option<ExitReason>,
}

impl EndpointLifecycle {
    /// Creates a machine for an endpoint seen by discovery.
    pub fn discovered(id: EndpointId) -> Self {
        Self::with_state(id, EndpointState::Discovered)
    }

    /// Creates a machine for an endpoint that reached us via a handshake offer
    /// before (or without) discovery.
    pub fn connecting(id: EndpointId) -> Self {
        Self::with_state(id, EndpointState::Connecting)
    }

    /// Creates a machine for an endpoint the transport already reports as
    /// connected.
    pub fn connected(id: EndpointId) -> Self {
        Self::with_state(id, EndpointState::Connected)
    }

    fn with_state(id: EndpointId, state: EndpointState) -> Self {
        Self {
            id,
            state,
            exit: None,
        }
    }

    /// Returns the endpoint this machine tracks.
    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    /// Returns the current state.
    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Returns how the machine ended, if it has.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit
    }

    /// Returns `true` once the machine is in [`EndpointState::Disconnected`].
    pub fn is_terminal(&self) -> bool {
        self.state == EndpointState::Disconnected
    }

    /// Applies `event` and returns the resulting [`Step`].
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Terminated`] once the machine has ended, and
    /// [`LifecycleError::InvalidTransition`] for events that contradict the
    /// current state (for example a handshake offer for a connected endpoint).
    pub fn apply(&mut self, event: LifecycleEvent) -> Result<Step, LifecycleError> {
        use EndpointState as S;
        use LifecycleEvent as E;

        let current = self.state;
        let step = match (current, event) {
            (S::Disconnected, _) => return Err(LifecycleError::Terminated(self.id.clone())),

            (_, E::Found) => Step::Unchanged(current),

            (S::Discovered, E::ConnectionRequested | E::ConnectionInitiated) => {
                self.move_to(S::Connecting)
            }
            (S::Connecting, E::ConnectionRequested | E::ConnectionInitiated) => {
                Step::Unchanged(current)
            }

            (S::Discovered | S::Connecting, E::ConnectionSucceeded) => self.move_to(S::Connected),
            (S::Connected, E::ConnectionSucceeded) => Step::Unchanged(current),

            (S::Discovered | S::Connecting, E::ConnectionFailed) => self.end(ExitReason::Rejected),

            (_, E::Disconnected) => self.end(ExitReason::Disconnected),

            (S::Discovered, E::Lost) => self.end(ExitReason::Lost),
            (S::Connecting | S::Connected, E::Lost) => Step::Unchanged(current),

            (
                S::Connected,
                E::ConnectionRequested | E::ConnectionInitiated | E::ConnectionFailed,
            ) => {
                return Err(LifecycleError::InvalidTransition {
                    id: self.id.clone(),
                    state: current,
                    event,
                })
            }
        };

        tracing::debug!("endpoint {}: {event:?} -> {step:?}", self.id);
        Ok(step)
    }

    fn move_to(&mut self, to: EndpointState) -> Step {
        let from = self.state;
        self.state = to;
        Step::Moved {
            from: Some(from),
            to,
        }
    }

    fn end(&mut self, reason: ExitReason) -> Step {
        let from = self.state;
        self.state = EndpointState::Disconnected;
        self.exit = Some(reason);
        Step::Ended { from, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> EndpointId {
        EndpointId::from("E1")
    }

    #[test]
    fn test_discovered_moves_to_connecting_on_request() {
        // Arrange
        let mut machine = EndpointLifecycle::discovered(id());

        // Act
        let step = machine.apply(LifecycleEvent::ConnectionRequested).unwrap();

        // Assert
        assert_eq!(
            step,
            Step::Moved {
                from: Some(EndpointState::Discovered),
                to: EndpointState::Connecting
            }
        );
        assert_eq!(machine.state(), EndpointState::Connecting);
    }

    #[test]
    fn test_discovered_moves_to_connecting_on_peer_initiated_handshake() {
        let mut machine = EndpointLifecycle::discovered(id());
        machine.apply(LifecycleEvent::ConnectionInitiated).unwrap();
        assert_eq!(machine.state(), EndpointState::Connecting);
    }

    #[test]
    fn test_connecting_moves_to_connected_on_success() {
        let mut machine = EndpointLifecycle::connecting(id());
        let step = machine.apply(LifecycleEvent::ConnectionSucceeded).unwrap();
        assert_eq!(
            step,
            Step::Moved {
                from: Some(EndpointState::Connecting),
                to: EndpointState::Connected
            }
        );
    }

    #[test]
    fn test_connecting_ends_rejected_on_failure() {
        // Arrange
        let mut machine = EndpointLifecycle::connecting(id());

        // Act
        let step = machine.apply(LifecycleEvent::ConnectionFailed).unwrap();

        // Assert
        assert_eq!(
            step,
            Step::Ended {
                from: EndpointState::Connecting,
                reason: ExitReason::Rejected
            }
        );
        assert!(machine.is_terminal());
        assert_eq!(machine.exit_reason(), Some(ExitReason::Rejected));
    }

    #[test]
    fn test_connected_ends_disconnected_on_disconnect() {
        let mut machine = EndpointLifecycle::connected(id());
        let step = machine.apply(LifecycleEvent::Disconnected).unwrap();
        assert_eq!(
            step,
            Step::Ended {
                from: EndpointState::Connected,
                reason: ExitReason::Disconnected
            }
        );
    }

    #[test]
    fn test_discovered_ends_lost_when_discovery_drops_it() {
        let mut machine = EndpointLifecycle::discovered(id());
        let step = machine.apply(LifecycleEvent::Lost).unwrap();
        assert_eq!(
            step,
            Step::Ended {
                from: EndpointState::Discovered,
                reason: ExitReason::Lost
            }
        );
    }

    #[test]
    fn test_lost_is_ignored_once_connecting() {
        let mut machine = EndpointLifecycle::connecting(id());
        let step = machine.apply(LifecycleEvent::Lost).unwrap();
        assert_eq!(step, Step::Unchanged(EndpointState::Connecting));
    }

    #[test]
    fn test_duplicate_request_while_connecting_is_unchanged() {
        let mut machine = EndpointLifecycle::connecting(id());
        let step = machine.apply(LifecycleEvent::ConnectionRequested).unwrap();
        assert_eq!(step, Step::Unchanged(EndpointState::Connecting));
    }

    #[test]
    fn test_duplicate_success_while_connected_is_unchanged() {
        let mut machine = EndpointLifecycle::connected(id());
        let step = machine.apply(LifecycleEvent::ConnectionSucceeded).unwrap();
        assert_eq!(step, Step::Unchanged(EndpointState::Connected));
    }

    #[test]
    fn test_handshake_offer_while_connected_is_invalid() {
        let mut machine = EndpointLifecycle::connected(id());
        let result = machine.apply(LifecycleEvent::ConnectionInitiated);
        assert!(matches!(
            result,
            Err(LifecycleError::InvalidTransition {
                state: EndpointState::Connected,
                event: LifecycleEvent::ConnectionInitiated,
                ..
            })
        ));
        assert_eq!(machine.state(), EndpointState::Connected);
    }

    #[test]
    fn test_terminal_machine_rejects_every_event() {
        // Arrange
        let mut machine = EndpointLifecycle::connected(id());
        machine.apply(LifecycleEvent::Disconnected).unwrap();

        // Act
        let result = machine.apply(LifecycleEvent::ConnectionSucceeded);

        // Assert
        assert_eq!(result, Err(LifecycleError::Terminated(id())));
    }
}
