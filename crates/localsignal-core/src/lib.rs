//! # localsignal-core
//!
//! Shared library for LocalSignal containing the endpoint lifecycle state
//! machine, the connected-endpoint registry, payload and signal types, and the
//! binary codec used by the LAN transport.
//!
//! It has zero dependencies on OS APIs, async runtimes, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! LocalSignal lets nearby devices find each other and exchange short text
//! "signals" without a server.  Every device advertises itself and discovers
//! others at the same time, connects to whoever it finds, and fans each
//! outgoing signal out to every connected peer.
//!
//! This crate (`localsignal-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – Pure bookkeeping with no I/O: who is out there
//!   (`EndpointId`), how far along each connection is (`EndpointLifecycle`),
//!   which peers are connected right now (`EndpointRegistry`), and what
//!   travels between them (`Payload`, `SignalMessage`, `StatusText`).
//!
//! - **`protocol`** – How bytes travel over a local network.  Messages are
//!   framed with a 16-byte header and a `bincode` body.

pub mod domain;
pub mod protocol;

pub use domain::endpoint::{ConnectionInfo, ConnectionStatus, DiscoveredEndpointInfo, EndpointId};
pub use domain::lifecycle::{
    EndpointLifecycle, EndpointState, ExitReason, LifecycleError, LifecycleEvent, Step,
};
pub use domain::payload::{Payload, PayloadBody, PayloadId, PayloadTransferUpdate, TransferStatus};
pub use domain::registry::EndpointRegistry;
pub use domain::service::{ServiceConfig, Strategy};
pub use domain::signal::{Direction, SignalMessage};
pub use domain::status::StatusText;
pub use protocol::codec::{decode_frame, encode_frame, ProtocolError};
pub use protocol::messages::WireMessage;
