//! Integration tests driving endpoint lifecycles and the registry together
//! through the public core API.
//!
//! A minimal owner composes one `EndpointLifecycle` per endpoint with an
//! `EndpointRegistry`, so these tests check that the `Step`s the machines
//! report are enough to keep a registry exact.  The node's `EndpointTable`
//! and `SessionController` carry their own per-event checks.

use std::collections::HashMap;

use localsignal_core::{
    EndpointId, EndpointLifecycle, EndpointRegistry, EndpointState, ExitReason, LifecycleEvent,
    Step,
};

/// Minimal owner built only from `Step` results.
#[derive(Default)]
struct Tracker {
    machines: HashMap<EndpointId, EndpointLifecycle>,
    registry: EndpointRegistry,
}

impl Tracker {
    fn apply(&mut self, id: &str, event: LifecycleEvent) {
        let id = EndpointId::from(id);
        let machine = self
            .machines
            .entry(id.clone())
            .or_insert_with(|| EndpointLifecycle::discovered(id.clone()));
        let step = machine.apply(event);
        match step {
            Ok(Step::Moved {
                to: EndpointState::Connected,
                ..
            }) => {
                self.registry.add(id.clone());
            }
            Ok(Step::Ended { .. }) => {
                self.registry.remove(&id);
                self.machines.remove(&id);
            }
            _ => {}
        }
        self.check_invariant();
    }

    fn check_invariant(&self) {
        let connected = self
            .machines
            .values()
            .filter(|m| m.state() == EndpointState::Connected)
            .count();
        assert_eq!(self.registry.count(), connected);
    }
}

#[test]
fn test_full_sequence_keeps_registry_in_sync() {
    let mut tracker = Tracker::default();

    tracker.apply("E1", LifecycleEvent::Found);
    tracker.apply("E1", LifecycleEvent::ConnectionRequested);
    tracker.apply("E2", LifecycleEvent::Found);
    tracker.apply("E2", LifecycleEvent::ConnectionInitiated);
    tracker.apply("E1", LifecycleEvent::ConnectionSucceeded);
    tracker.apply("E2", LifecycleEvent::ConnectionSucceeded);
    assert_eq!(tracker.registry.count(), 2);

    tracker.apply("E1", LifecycleEvent::Disconnected);
    assert_eq!(tracker.registry.all(), vec![EndpointId::from("E2")]);
}

#[test]
fn test_rejected_endpoint_never_reaches_registry() {
    let mut tracker = Tracker::default();

    tracker.apply("E1", LifecycleEvent::Found);
    tracker.apply("E1", LifecycleEvent::ConnectionRequested);
    tracker.apply("E1", LifecycleEvent::ConnectionFailed);

    assert_eq!(tracker.registry.count(), 0);
    assert!(tracker.machines.is_empty(), "rejected endpoint must be dropped");
}

#[test]
fn test_lost_before_connecting_has_no_registry_effect() {
    // Arrange
    let mut machine = EndpointLifecycle::discovered(EndpointId::from("E3"));
    let registry = EndpointRegistry::new();

    // Act
    let step = machine.apply(LifecycleEvent::Lost).unwrap();

    // Assert
    assert_eq!(
        step,
        Step::Ended {
            from: EndpointState::Discovered,
            reason: ExitReason::Lost
        }
    );
    assert_eq!(registry.count(), 0);
}

#[test]
fn test_simultaneous_success_reports_do_not_double_count() {
    let mut tracker = Tracker::default();

    tracker.apply("E1", LifecycleEvent::ConnectionInitiated);
    tracker.apply("E1", LifecycleEvent::ConnectionSucceeded);
    tracker.apply("E1", LifecycleEvent::ConnectionSucceeded);

    assert_eq!(tracker.registry.count(), 1);
}
