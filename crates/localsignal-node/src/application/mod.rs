//! Application layer: the session and the port it consumes.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure bookkeeping in `localsignal_core`) and the infrastructure (sockets,
//! files, simulated radios).
//!
//! Code in this layer:
//!
//! - **Orchestrates** domain objects to fulfil a user goal ("send this text
//!   to everyone I am connected to").
//! - **Depends on abstractions** (the [`transport::Transport`] trait) rather
//!   than concrete networking, so the LAN and loopback transports are
//!   interchangeable and tests can use a mock.
//! - **Performs no I/O of its own**.
//!
//! # Sub-modules
//!
//! - **`transport`** – The `Transport` trait and the `TransportEvent` enum a
//!   transport reports with.
//!
//! - **`manage_endpoints`** – The `EndpointTable`: one lifecycle state
//!   machine per remote endpoint plus the connected registry.
//!
//! - **`session`** – The `SessionController`, which reacts to commands and
//!   transport events and publishes status and connected count.
//!
//! - **`session_actor`** – Runs the controller as a single-owner task behind
//!   a cloneable `SessionHandle`.

pub mod manage_endpoints;
pub mod session;
pub mod session_actor;
pub mod transport;

pub use session::{SessionController, SessionObserver};
pub use session_actor::{spawn_session, SessionError, SessionHandle};
pub use transport::{
    event_channel, ConnectionOptions, EventReceiver, EventSender, Transport, TransportError,
    TransportEvent,
};
