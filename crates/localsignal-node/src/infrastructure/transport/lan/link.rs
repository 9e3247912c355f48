//! Frame I/O for a single TCP link.
//!
//! Each link carries length-prefixed frames (see `localsignal_core::protocol`).
//! The readers and writers here are generic over `AsyncRead` / `AsyncWrite`
//! so they can be exercised against in-memory mocks.

use std::time::Duration;

use localsignal_core::protocol::{
    decode_body, decode_header, encode_frame, ProtocolError, SequenceCounter, WireMessage,
    HEADER_SIZE,
};
use localsignal_core::{EndpointId, PayloadTransferUpdate};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::application::transport::{EventSender, TransportEvent};

/// Sequence numbers for every frame written by this process.
static FRAME_SEQ: SequenceCounter = SequenceCounter::new();

/// Errors on an established or handshaking link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("link protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("no handshake within {0:?}")]
    HandshakeTimeout(Duration),
}

/// A frame queued for a link's writer.
#[derive(Debug)]
pub struct Outgoing {
    pub message: WireMessage,
    /// Reported to the local session once the frame is written.
    pub delivered: Option<PayloadTransferUpdate>,
}

impl Outgoing {
    pub fn message(message: WireMessage) -> Self {
        Self {
            message,
            delivered: None,
        }
    }
}

/// Reads one frame.  Returns `Ok(None)` on a clean end of stream at a frame
/// boundary.
///
/// # Errors
///
/// Returns [`LinkError::Io`] for read failures (including a stream cut off
/// mid-frame) and [`LinkError::Protocol`] for malformed frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<WireMessage>, LinkError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let header = decode_header(&header)?;
    let mut body = vec![0u8; header.body_len];
    reader.read_exact(&mut body).await?;
    Ok(Some(decode_body(header.message_type, &body)?))
}

/// Encodes and writes one frame.
pub async fn write_frame<W>(writer: &mut W, message: &WireMessage) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(message, FRAME_SEQ.next())?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Writes queued frames until the queue closes, then shuts the stream down.
///
/// Payload frames with a `delivered` update produce a
/// [`TransportEvent::PayloadTransferUpdate`] for `peer` once written.
pub async fn write_loop<W>(
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    peer: EndpointId,
    events: EventSender,
) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(out) = queue.recv().await {
        write_frame(&mut writer, &out.message).await?;
        trace!("link {peer}: wrote {:?}", out.message.message_type());
        if let Some(update) = out.delivered {
            let _ = events.send(TransportEvent::PayloadTransferUpdate {
                endpoint_id: peer.clone(),
                update,
            });
        }
    }
    writer.shutdown().await?;
    debug!("link {peer}: writer closed");
    Ok(())
}

/// Holds a link open without using it until the other side closes it or
/// `limit` passes.
///
/// Used for the losing link when two peers dial each other at once: its
/// initiator closes it after seeing the winning link.
pub async fn drain_until_closed<R, W>(mut reader: R, writer: W, limit: Duration)
where
    R: AsyncRead + Unpin,
{
    let drain = async {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(message)) => trace!("ignoring {:?} on parked link", message.message_type()),
                Ok(None) => break,
                Err(e) => {
                    warn!("parked link error: {e}");
                    break;
                }
            }
        }
    };
    let _ = tokio::time::timeout(limit, drain).await;
    drop(writer);
}
