//! EndpointTable: per-endpoint lifecycle tracking plus the connected registry.
//!
//! The table is the session's in-memory database of every remote device it
//! is currently dealing with.  It owns one [`EndpointLifecycle`] per live
//! endpoint and the [`EndpointRegistry`] of connected ones, and keeps the two
//! in agreement:
//!
//! - An id is in the registry exactly when its machine is `Connected`.
//! - A machine that reaches `Disconnected` is dropped from both.
//!
//! Events for ids the table has never seen create a machine in the state the
//! event implies, because the transport may report a handshake for a peer
//! that discovered *us* before we discovered it.  Terminal events for unknown
//! ids are ignored.

use std::collections::HashMap;

use localsignal_core::{
    EndpointId, EndpointLifecycle, EndpointRegistry, EndpointState, LifecycleError,
    LifecycleEvent, Step,
};

/// What a single [`EndpointTable::apply`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableChange {
    /// Nothing was tracked and nothing changed.
    Ignored,
    /// The endpoint's lifecycle advanced (or stayed put) as described.
    Applied(Step),
}

impl TableChange {
    /// Returns `true` if this change added or removed a registry member.
    pub fn touches_registry(&self) -> bool {
        matches!(
            self,
            TableChange::Applied(Step::Moved {
                to: EndpointState::Connected,
                ..
            }) | TableChange::Applied(Step::Ended {
                from: EndpointState::Connected,
                ..
            })
        )
    }
}

/// Lifecycles of every live endpoint and the registry of connected ones.
#[derive(Debug, Default)]
pub struct EndpointTable {
    endpoints: HashMap<EndpointId, EndpointLifecycle>,
    registry: EndpointRegistry,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `event` to the machine for `id`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Propagates [`LifecycleError`] for events that contradict the current
    /// state.  The table is left unchanged in that case.
    pub fn apply(
        &mut self,
        id: &EndpointId,
        event: LifecycleEvent,
    ) -> Result<TableChange, LifecycleError> {
        let Some(machine) = self.endpoints.get_mut(id) else {
            return Ok(self.create(id, event));
        };

        let step = machine.apply(event)?;
        match step {
            Step::Moved {
                to: EndpointState::Connected,
                ..
            } => {
                self.registry.add(id.clone());
            }
            Step::Ended { .. } => {
                self.endpoints.remove(id);
                self.registry.remove(id);
            }
            _ => {}
        }
        Ok(TableChange::Applied(step))
    }

    fn create(&mut self, id: &EndpointId, event: LifecycleEvent) -> TableChange {
        let machine = match event {
            LifecycleEvent::Found => EndpointLifecycle::discovered(id.clone()),
            LifecycleEvent::ConnectionRequested | LifecycleEvent::ConnectionInitiated => {
                EndpointLifecycle::connecting(id.clone())
            }
            // The transport is authoritative on connection results.
            LifecycleEvent::ConnectionSucceeded => {
                self.registry.add(id.clone());
                EndpointLifecycle::connected(id.clone())
            }
            LifecycleEvent::ConnectionFailed
            | LifecycleEvent::Disconnected
            | LifecycleEvent::Lost => {
                tracing::debug!("endpoint {id}: {event:?} for untracked endpoint ignored");
                return TableChange::Ignored;
            }
        };

        let to = machine.state();
        tracing::debug!("endpoint {id}: tracked as {to:?}");
        self.endpoints.insert(id.clone(), machine);
        TableChange::Applied(Step::Moved { from: None, to })
    }

    /// Current state of `id`, or `None` if it is not tracked.
    pub fn state(&self, id: &EndpointId) -> Option<EndpointState> {
        self.endpoints.get(id).map(EndpointLifecycle::state)
    }

    /// Returns `true` if `id` has a live machine.
    pub fn is_tracked(&self, id: &EndpointId) -> bool {
        self.endpoints.contains_key(id)
    }

    /// The connected registry.
    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Number of connected endpoints.
    pub fn connected_count(&self) -> usize {
        self.registry.count()
    }

    /// Number of tracked endpoints in any live state.
    pub fn tracked_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Forgets every endpoint.  Used on shutdown.
    pub fn clear(&mut self) {
        self.endpoints.clear();
        self.registry.clear();
    }
}
