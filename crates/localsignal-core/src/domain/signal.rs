//! Text signals: the only application message LocalSignal exchanges.

use crate::domain::endpoint::EndpointId;
use crate::domain::payload::Payload;

/// Which way a signal travelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Typed locally and fanned out to every connected peer.
    Outbound,
    /// Received from the given endpoint.
    Inbound { from: EndpointId },
}

/// An immutable text signal with its UTF-8 byte encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMessage {
    direction: Direction,
    text: String,
    bytes: Vec<u8>,
}

impl SignalMessage {
    /// Builds an outbound signal from user text.
    pub fn outbound(text: impl Into<String>) -> Self {
        let text = text.into();
        let bytes = text.as_bytes().to_vec();
        Self {
            direction: Direction::Outbound,
            text,
            bytes,
        }
    }

    /// Builds an inbound signal from received bytes.
    ///
    /// Invalid UTF-8 sequences are replaced with `U+FFFD` rather than rejected.
    pub fn inbound(from: EndpointId, bytes: Vec<u8>) -> Self {
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Self {
            direction: Direction::Inbound { from },
            text,
            bytes,
        }
    }

    pub fn direction(&self) -> &Direction {
        &self.direction
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The originating endpoint for inbound signals.
    pub fn sender(&self) -> Option<&EndpointId> {
        match &self.direction {
            Direction::Inbound { from } => Some(from),
            Direction::Outbound => None,
        }
    }

    /// Wraps the encoded text in a fresh byte [`Payload`].
    pub fn to_payload(&self) -> Payload {
        Payload::from_bytes(self.bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_encodes_text_as_utf8() {
        let signal = SignalMessage::outbound("hi");
        assert_eq!(signal.bytes(), b"hi");
        assert_eq!(signal.direction(), &Direction::Outbound);
        assert_eq!(signal.sender(), None);
    }

    #[test]
    fn test_outbound_payload_carries_signal_bytes() {
        let signal = SignalMessage::outbound("héllo");
        let payload = signal.to_payload();
        assert_eq!(payload.as_bytes(), Some("héllo".as_bytes()));
    }

    #[test]
    fn test_inbound_decodes_text_and_keeps_sender() {
        // Arrange / Act
        let signal = SignalMessage::inbound(EndpointId::from("E1"), b"hello".to_vec());

        // Assert
        assert_eq!(signal.text(), "hello");
        assert_eq!(signal.sender(), Some(&EndpointId::from("E1")));
    }

    #[test]
    fn test_inbound_replaces_invalid_utf8() {
        let signal = SignalMessage::inbound(EndpointId::from("E1"), vec![b'o', b'k', 0xFF]);
        assert_eq!(signal.text(), "ok\u{FFFD}");
    }
}
