//! Units of application data exchanged over an established connection.
//!
//! Only short in-memory byte payloads carry meaning in LocalSignal.  The
//! [`PayloadBody::File`] and [`PayloadBody::Stream`] variants exist so that a
//! transport can report them faithfully; the session ignores them.

use serde::{Deserialize, Serialize};

use crate::protocol::sequence::SequenceCounter;

/// Identifier a sender assigns to each payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PayloadId(pub u64);

/// Content of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadBody {
    /// A short in-memory byte sequence.
    Bytes(Vec<u8>),
    /// A file offered by the peer (metadata only).
    File { name: String, size: u64 },
    /// An open-ended byte stream (metadata only).
    Stream,
}

/// A payload as delivered by or handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub id: PayloadId,
    pub body: PayloadBody,
}

static PAYLOAD_IDS: SequenceCounter = SequenceCounter::new();

impl Payload {
    /// Builds a byte payload with a fresh process-unique id.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: PayloadId(PAYLOAD_IDS.next()),
            body: PayloadBody::Bytes(bytes.into()),
        }
    }

    /// Returns the bytes for a [`PayloadBody::Bytes`] payload, `None` otherwise.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            PayloadBody::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Short lower-case name of the body kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self.body {
            PayloadBody::Bytes(_) => "bytes",
            PayloadBody::File { .. } => "file",
            PayloadBody::Stream => "stream",
        }
    }
}

/// Progress of a payload transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    InProgress,
    Success,
    Failure,
    Canceled,
}

/// Transfer progress notification for one payload and one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadTransferUpdate {
    pub payload_id: PayloadId,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl PayloadTransferUpdate {
    /// A completed transfer of `total_bytes`.
    pub fn completed(payload_id: PayloadId, total_bytes: u64) -> Self {
        Self {
            payload_id,
            status: TransferStatus::Success,
            bytes_transferred: total_bytes,
            total_bytes,
        }
    }
}
