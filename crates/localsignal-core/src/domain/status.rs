//! The human-readable status line a session publishes to its host.

use std::fmt;

/// The latest status the session wants observers to display.
///
/// Only the current value matters; nothing is kept once it is replaced.
/// `Display` produces the exact text shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StatusText {
    /// Initial value before anything happened.
    #[default]
    Waiting,
    /// A send was requested with no connected peers.
    NoPeers,
    /// A fan-out send was issued.
    SignalSent,
    /// An inbound signal arrived.
    Message(String),
    /// Advertising could not start.
    AdvertisingFailed(String),
    /// Discovery could not start.
    DiscoveryFailed(String),
    /// The transport refused the fan-out send outright.
    SendFailed(String),
}

impl fmt::Display for StatusText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusText::Waiting => f.write_str("Waiting for a signal..."),
            StatusText::NoPeers => f.write_str("No devices connected yet"),
            StatusText::SignalSent => f.write_str("Signal Sent"),
            StatusText::Message(text) => write!(f, "Message: {text}"),
            StatusText::AdvertisingFailed(reason) => {
                write!(f, "Failed to start advertising: {reason}")
            }
            StatusText::DiscoveryFailed(reason) => write!(f, "Failed to start discovery: {reason}"),
            StatusText::SendFailed(reason) => write!(f, "Failed to send signal: {reason}"),
        }
    }
}
