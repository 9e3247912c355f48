//! Infrastructure layer: the adapters behind the application's ports.
//!
//! Contains the transports (a LAN transport over UDP and TCP, and an
//! in-process loopback medium) and file-system storage for configuration.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `localsignal_core`, but MUST NOT be imported by the `application` layer.

pub mod storage;
pub mod transport;
