//! Fixed interoperability settings: service identifier, topology strategy and
//! local display name.
//!
//! Every device that wants to talk to another must agree on the service
//! identifier and strategy.  They are configuration, never hard-coded, so a
//! deployment can pick its own namespace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection topology a device advertises and discovers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Any-to-any mesh: every device may connect to many others.
    Cluster,
    /// One hub, many spokes.
    Star,
    /// Exactly one connection per device.
    PointToPoint,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Cluster
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Cluster => "cluster",
            Strategy::Star => "star",
            Strategy::PointToPoint => "point_to_point",
        };
        f.write_str(name)
    }
}

/// Settings every session advertises and discovers under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Shared service identifier peers must match.
    #[serde(default = "default_service_id")]
    pub service_id: String,
    /// Topology strategy peers must match.
    #[serde(default)]
    pub strategy: Strategy,
    /// Display name announced to peers.  Not an identity.
    #[serde(default = "default_local_name")]
    pub local_name: String,
}

fn default_service_id() -> String {
    "com.example.localsignal.test".to_string()
}

fn default_local_name() -> String {
    "MyDevice".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            strategy: Strategy::default(),
            local_name: default_local_name(),
        }
    }
}
