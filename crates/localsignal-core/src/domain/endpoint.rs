//! Endpoint identity and the metadata a transport attaches to discovery and
//! connection notifications.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of characters in a generated endpoint id.
const GENERATED_ID_LEN: usize = 8;

/// Opaque transport-assigned identifier for a remote device.
///
/// Unique per discovered peer for the lifetime of a discovery session.  It is
/// not stable across restarts and carries no meaning beyond identity; display
/// names travel separately in [`ConnectionInfo`] / [`DiscoveredEndpointInfo`].
///
/// `Ord` is derived so that transports can break ties deterministically when
/// two peers connect to each other at the same moment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId(String);

impl EndpointId {
    /// Wraps a transport-provided identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier (8 upper-case hex characters).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use localsignal_core::EndpointId;
    ///
    /// let a = EndpointId::generate();
    /// assert_eq!(a.as_str().len(), 8);
    /// ```
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string().to_uppercase();
        Self(simple[..GENERATED_ID_LEN].to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Information a transport reports alongside an endpoint-found notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredEndpointInfo {
    /// Display name the remote device advertises.
    pub endpoint_name: String,
    /// Service identifier the remote device advertises under.
    pub service_id: String,
}

/// Information a transport reports alongside a connection-initiated
/// notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Display name of the remote device.
    pub endpoint_name: String,
    /// `true` when the remote side issued the connection request.
    pub is_incoming: bool,
}

/// Outcome of a connection attempt, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Both sides accepted; the connection is live.
    Ok,
    /// One side declined the connection.
    Rejected,
    /// The attempt failed for a transport-level reason.
    Error(String),
}

impl ConnectionStatus {
    /// Returns `true` only for [`ConnectionStatus::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, ConnectionStatus::Ok)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Ok => f.write_str("ok"),
            ConnectionStatus::Rejected => f.write_str("rejected"),
            ConnectionStatus::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}
