//! The transport port: what the session consumes from a local-networking
//! primitive.
//!
//! A transport advertises, discovers, connects, accepts, sends and tears down.
//! Every asynchronous outcome comes back as a [`TransportEvent`] pushed onto
//! the event channel the transport was built with, in causal order per
//! endpoint.  The session consumes that channel through a single dispatch
//! function, so there are no listener objects to register.
//!
//! Implementations must return promptly from every method: network I/O runs
//! on the transport's own tasks and reports back through events.

use std::net::SocketAddr;

use async_trait::async_trait;
use localsignal_core::{
    ConnectionInfo, ConnectionStatus, DiscoveredEndpointInfo, EndpointId, Payload,
    PayloadTransferUpdate, ProtocolError, Strategy,
};
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("already advertising")]
    AlreadyAdvertising,
    #[error("already discovering")]
    AlreadyDiscovering,
    #[error("endpoint unknown: {0}")]
    EndpointUnknown(EndpointId),
    #[error("not connected to endpoint: {0}")]
    NotConnected(EndpointId),
    #[error("none of the {0} target endpoint(s) is connected")]
    NoConnectedEndpoints(usize),
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("transport has been stopped")]
    Stopped,
}

/// Options shared by advertising and discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionOptions {
    pub strategy: Strategy,
}

/// Notifications a transport delivers to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A handshake was offered, by either side, and awaits acceptance.
    ConnectionInitiated {
        endpoint_id: EndpointId,
        info: ConnectionInfo,
    },
    /// A handshake finished.
    ConnectionResult {
        endpoint_id: EndpointId,
        status: ConnectionStatus,
    },
    /// A live connection ended.
    Disconnected { endpoint_id: EndpointId },
    /// Discovery found an endpoint advertising the same service.
    EndpointFound {
        endpoint_id: EndpointId,
        info: DiscoveredEndpointInfo,
    },
    /// Discovery no longer sees an endpoint.
    EndpointLost { endpoint_id: EndpointId },
    /// A payload arrived from a connected endpoint.
    PayloadReceived {
        endpoint_id: EndpointId,
        payload: Payload,
    },
    /// Progress of a payload transfer to or from an endpoint.
    PayloadTransferUpdate {
        endpoint_id: EndpointId,
        update: PayloadTransferUpdate,
    },
}

impl TransportEvent {
    /// The endpoint this event concerns.
    pub fn endpoint_id(&self) -> &EndpointId {
        match self {
            TransportEvent::ConnectionInitiated { endpoint_id, .. }
            | TransportEvent::ConnectionResult { endpoint_id, .. }
            | TransportEvent::Disconnected { endpoint_id }
            | TransportEvent::EndpointFound { endpoint_id, .. }
            | TransportEvent::EndpointLost { endpoint_id }
            | TransportEvent::PayloadReceived { endpoint_id, .. }
            | TransportEvent::PayloadTransferUpdate { endpoint_id, .. } => endpoint_id,
        }
    }
}

/// Sending half of the transport event channel.
///
/// Unbounded so that transport callbacks never wait on the session.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of the transport event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Creates the channel a transport reports on and the session consumes.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Capability-based local-networking primitive consumed by the session.
///
/// Implementations are shared (`Arc<dyn Transport>`) between the advertising
/// flow, the discovery flow and every per-endpoint operation, and must
/// synchronise internally.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts broadcasting local presence under `service_id`.
    async fn start_advertising(
        &self,
        local_name: &str,
        service_id: &str,
        options: &ConnectionOptions,
    ) -> Result<(), TransportError>;

    /// Starts scanning for endpoints advertising `service_id`.
    async fn start_discovery(
        &self,
        service_id: &str,
        options: &ConnectionOptions,
    ) -> Result<(), TransportError>;

    /// Asks `endpoint_id` for a connection.  Both sides then receive
    /// [`TransportEvent::ConnectionInitiated`].
    async fn request_connection(
        &self,
        local_name: &str,
        endpoint_id: &EndpointId,
    ) -> Result<(), TransportError>;

    /// Accepts a pending handshake with `endpoint_id`.
    async fn accept_connection(&self, endpoint_id: &EndpointId) -> Result<(), TransportError>;

    /// Delivers `payload` to every endpoint in `endpoint_ids`.
    async fn send_payload(
        &self,
        endpoint_ids: &[EndpointId],
        payload: Payload,
    ) -> Result<(), TransportError>;

    /// Stops advertising and discovery and closes every connection.
    async fn stop_all_endpoints(&self);
}
