//! Messages exchanged by the LAN transport.
//!
//! `Announce` travels over UDP broadcast; everything else travels over the
//! per-peer TCP link.

use serde::{Deserialize, Serialize};

use crate::domain::endpoint::EndpointId;
use crate::domain::payload::Payload;
use crate::domain::service::Strategy;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Largest body a frame may carry.  Signals are short text.
pub const MAX_BODY_SIZE: usize = 64 * 1024;

// ── Message type codes ────────────────────────────────────────────────────────

/// Message type codes carried in byte 1 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    // Discovery (0x00–0x0F)
    Announce = 0x01,
    // Connection handshake (0x10–0x1F)
    ConnectionRequest = 0x10,
    ConnectionAccept = 0x11,
    ConnectionReject = 0x12,
    // Data (0x20–0x2F)
    Payload = 0x20,
    // Teardown (0x30–0x3F)
    Disconnect = 0x30,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Announce),
            0x10 => Ok(MessageType::ConnectionRequest),
            0x11 => Ok(MessageType::ConnectionAccept),
            0x12 => Ok(MessageType::ConnectionReject),
            0x20 => Ok(MessageType::Payload),
            0x30 => Ok(MessageType::Disconnect),
            _ => Err(()),
        }
    }
}

// ── Message bodies ────────────────────────────────────────────────────────────

/// Periodic presence broadcast from an advertising device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceMessage {
    /// Service namespace the device advertises under.
    pub service_id: String,
    /// Topology strategy the device uses.
    pub strategy: Strategy,
    /// Identifier of the advertising device.
    pub endpoint_id: EndpointId,
    /// Display name of the advertising device.
    pub endpoint_name: String,
    /// TCP port the device accepts connection requests on.
    pub control_port: u16,
}

/// First frame on a new TCP link, sent by the requesting side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRequestMessage {
    pub service_id: String,
    pub endpoint_id: EndpointId,
    pub endpoint_name: String,
}

/// Every message the LAN transport puts on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Announce(AnnounceMessage),
    ConnectionRequest(ConnectionRequestMessage),
    ConnectionAccept,
    ConnectionReject,
    Payload(Payload),
    Disconnect,
}

impl WireMessage {
    /// Returns the header type code for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            WireMessage::Announce(_) => MessageType::Announce,
            WireMessage::ConnectionRequest(_) => MessageType::ConnectionRequest,
            WireMessage::ConnectionAccept => MessageType::ConnectionAccept,
            WireMessage::ConnectionReject => MessageType::ConnectionReject,
            WireMessage::Payload(_) => MessageType::Payload,
            WireMessage::Disconnect => MessageType::Disconnect,
        }
    }
}
