//! Binary codec for LocalSignal LAN frames.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][reserved:2][body_len:4][seq:8][body:N]
//! ```
//! Total header size: 16 bytes. All multi-byte integers are big-endian.
//! Bodies are `bincode`-encoded message structs; header-only messages
//! (`ConnectionAccept`, `ConnectionReject`, `Disconnect`) have an empty body.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::protocol::messages::{
    MessageType, WireMessage, HEADER_SIZE, MAX_BODY_SIZE, PROTOCOL_VERSION,
};

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The body length exceeds [`MAX_BODY_SIZE`].
    #[error("frame body of {0} bytes exceeds the {max} byte limit", max = MAX_BODY_SIZE)]
    BodyTooLarge(usize),

    /// The body could not be serialized or deserialized.
    #[error("malformed body: {0}")]
    MalformedBody(String),

    /// The declared body length does not match the data available.
    #[error("body length mismatch: header says {declared}, available is {available}")]
    BodyLengthMismatch { declared: usize, available: usize },
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub body_len: usize,
    pub sequence_number: u64,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`WireMessage`] into a complete frame.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedBody`] if serialization fails and
/// [`ProtocolError::BodyTooLarge`] if the body exceeds [`MAX_BODY_SIZE`].
///
/// # Examples
///
/// ```rust
/// use localsignal_core::protocol::{decode_frame, encode_frame, WireMessage};
///
/// let bytes = encode_frame(&WireMessage::ConnectionAccept, 7).unwrap();
/// let (decoded, consumed) = decode_frame(&bytes).unwrap();
/// assert_eq!(decoded, WireMessage::ConnectionAccept);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_frame(msg: &WireMessage, sequence_number: u64) -> Result<Vec<u8>, ProtocolError> {
    let body = encode_body(msg)?;
    if body.len() > MAX_BODY_SIZE {
        return Err(ProtocolError::BodyTooLarge(body.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Parses the fixed-size header at the start of `bytes`.
///
/// Stream readers call this after reading exactly [`HEADER_SIZE`] bytes to
/// learn how many body bytes follow.
///
/// # Errors
///
/// Returns [`ProtocolError`] for short input, unknown version or type, and
/// oversized bodies.
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let message_type = MessageType::try_from(bytes[1])
        .map_err(|_| ProtocolError::UnknownMessageType(bytes[1]))?;

    // bytes[2..4] are reserved – ignored on decode

    let body_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if body_len > MAX_BODY_SIZE {
        return Err(ProtocolError::BodyTooLarge(body_len));
    }

    let mut seq = [0u8; 8];
    seq.copy_from_slice(&bytes[8..16]);

    Ok(FrameHeader {
        message_type,
        body_len,
        sequence_number: u64::from_be_bytes(seq),
    })
}

/// Decodes one [`WireMessage`] from the beginning of `bytes`.
///
/// Returns the message and the number of bytes consumed (header + body).
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
pub fn decode_frame(bytes: &[u8]) -> Result<(WireMessage, usize), ProtocolError> {
    let header = decode_header(bytes)?;
    let total = HEADER_SIZE + header.body_len;
    if bytes.len() < total {
        return Err(ProtocolError::BodyLengthMismatch {
            declared: header.body_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let msg = decode_body(header.message_type, &bytes[HEADER_SIZE..total])?;
    Ok((msg, total))
}

/// Decodes a body whose header has already been parsed.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedBody`] if the body does not match the type.
pub fn decode_body(message_type: MessageType, body: &[u8]) -> Result<WireMessage, ProtocolError> {
    match message_type {
        MessageType::Announce => from_body(body).map(WireMessage::Announce),
        MessageType::ConnectionRequest => from_body(body).map(WireMessage::ConnectionRequest),
        MessageType::ConnectionAccept => Ok(WireMessage::ConnectionAccept),
        MessageType::ConnectionReject => Ok(WireMessage::ConnectionReject),
        MessageType::Payload => from_body(body).map(WireMessage::Payload),
        MessageType::Disconnect => Ok(WireMessage::Disconnect),
    }
}

// ── Body helpers ──────────────────────────────────────────────────────────────

fn encode_body(msg: &WireMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        WireMessage::Announce(m) => to_body(m),
        WireMessage::ConnectionRequest(m) => to_body(m),
        WireMessage::Payload(p) => to_body(p),
        WireMessage::ConnectionAccept | WireMessage::ConnectionReject | WireMessage::Disconnect => {
            Ok(Vec::new())
        }
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(value).map_err(|e| ProtocolError::MalformedBody(e.to_string()))
}

fn from_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    bincode::deserialize(body).map_err(|e| ProtocolError::MalformedBody(e.to_string()))
}
