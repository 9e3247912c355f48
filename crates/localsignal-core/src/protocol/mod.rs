//! Protocol module containing LAN message types and the binary frame codec.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_body, decode_frame, decode_header, encode_frame, FrameHeader, ProtocolError};
pub use messages::*;
pub use sequence::SequenceCounter;
