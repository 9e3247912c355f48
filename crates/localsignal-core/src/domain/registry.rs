//! Registry of currently connected endpoints.
//!
//! The registry is identity bookkeeping only: it owns no sockets and knows
//! nothing about how a peer connected.  Its cardinality *is* the connected
//! count the session publishes, and membership changes are the only way that
//! count moves.
//!
//! The registry itself is not synchronised.  The session owns exactly one
//! instance inside a single task, which serialises every mutation.

use std::collections::HashSet;

use crate::domain::endpoint::EndpointId;

/// The set of endpoints currently in the `Connected` state.
#[derive(Debug, Default, Clone)]
pub struct EndpointRegistry {
    connected: HashSet<EndpointId>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id` as connected.
    ///
    /// Idempotent: returns `false` and leaves the count untouched if `id` is
    /// already present (for example when two peers dial each other at once).
    pub fn add(&mut self, id: EndpointId) -> bool {
        self.connected.insert(id)
    }

    /// Removes `id` if present.  Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: &EndpointId) -> bool {
        self.connected.remove(id)
    }

    /// Returns `true` if `id` is connected.
    pub fn contains(&self, id: &EndpointId) -> bool {
        self.connected.contains(id)
    }

    /// Number of connected endpoints.  O(1).
    pub fn count(&self) -> usize {
        self.connected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
    }

    /// Snapshot of every connected endpoint, sorted for stable fan-out order.
    ///
    /// The snapshot reflects the registry at call time only; a peer may
    /// disconnect the moment after it is taken.
    pub fn all(&self) -> Vec<EndpointId> {
        let mut ids: Vec<EndpointId> = self.connected.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Forgets every endpoint.
    pub fn clear(&mut self) {
        self.connected.clear();
    }
}
