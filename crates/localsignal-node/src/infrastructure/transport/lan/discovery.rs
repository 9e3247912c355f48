//! UDP broadcast advertising and discovery.
//!
//! # How UDP discovery works (for beginners)
//!
//! UDP is a lightweight, connectionless protocol.  It does not guarantee
//! delivery or ordering, which is fine for presence announcements that repeat
//! every second anyway:
//!
//! 1. An advertising device sends an `Announce` frame to the LAN broadcast
//!    address on the discovery port every `announce_interval`.  The frame
//!    carries its endpoint id, display name, service id, strategy and the TCP
//!    port it accepts connection requests on.
//!
//! 2. A discovering device listens on the discovery port.  The first
//!    `Announce` from a new endpoint with a matching service id and strategy
//!    produces `EndpointFound`.
//!
//! 3. An endpoint that stays silent for `lost_after` is forgotten and produces
//!    `EndpointLost`.
//!
//! Only one process per host can listen on the discovery port.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use localsignal_core::protocol::{
    decode_frame, encode_frame, AnnounceMessage, SequenceCounter, WireMessage,
};
use localsignal_core::{DiscoveredEndpointInfo, EndpointId, Strategy};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace, warn};

use super::Shared;
use crate::application::transport::TransportEvent;

static ANNOUNCE_SEQ: SequenceCounter = SequenceCounter::new();

/// Floor for timer periods; `tokio::time::interval` panics on zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// What a discovering device is looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryScope {
    pub service_id: String,
    pub strategy: Strategy,
}

impl DiscoveryScope {
    fn matches(&self, announce: &AnnounceMessage) -> bool {
        self.service_id == announce.service_id && self.strategy == announce.strategy
    }
}

/// A discovered endpoint and where to reach it.
#[derive(Debug, Clone)]
pub struct Peer {
    pub name: String,
    pub control_addr: SocketAddr,
    last_seen: Instant,
}

/// Endpoints currently heard by discovery.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<EndpointId, Peer>,
}

impl PeerTable {
    /// Records an announcement.  Returns `true` the first time `id` is heard.
    pub fn observe(
        &mut self,
        id: &EndpointId,
        name: &str,
        control_addr: SocketAddr,
        now: Instant,
    ) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) => {
                peer.name = name.to_string();
                peer.control_addr = control_addr;
                peer.last_seen = now;
                false
            }
            None => {
                self.peers.insert(
                    id.clone(),
                    Peer {
                        name: name.to_string(),
                        control_addr,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    /// Forgets endpoints silent for longer than `lost_after` and returns them.
    pub fn sweep(&mut self, now: Instant, lost_after: Duration) -> Vec<EndpointId> {
        let mut lost: Vec<EndpointId> = self
            .peers
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_seen) > lost_after)
            .map(|(id, _)| id.clone())
            .collect();
        lost.sort();
        for id in &lost {
            self.peers.remove(id);
        }
        lost
    }

    pub fn get(&self, id: &EndpointId) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

// ── Advertising ───────────────────────────────────────────────────────────────

/// Binds the socket announcements are sent from.
pub async fn bind_announcer(bind_address: IpAddr) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::new(bind_address, 0)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// Sends `announce` to `target` every `interval` until the task is aborted.
pub async fn run_announcer(
    socket: UdpSocket,
    target: SocketAddr,
    announce: AnnounceMessage,
    interval: Duration,
) {
    let message = WireMessage::Announce(announce);
    let mut ticker = tokio::time::interval(interval.max(MIN_PERIOD));
    info!("announcing to {target} every {interval:?}");

    loop {
        ticker.tick().await;
        let bytes = match encode_frame(&message, ANNOUNCE_SEQ.next()) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to encode Announce: {e}");
                return;
            }
        };
        if let Err(e) = socket.send_to(&bytes, target).await {
            warn!("failed to send Announce to {target}: {e}");
        }
    }
}

// ── Discovery ─────────────────────────────────────────────────────────────────

/// Receives announcements on `socket` and reports found and lost endpoints
/// until the task is aborted.
pub(super) async fn run_listener(
    shared: Arc<Shared>,
    socket: UdpSocket,
    scope: DiscoveryScope,
) {
    let mut buf = vec![0u8; 4096];
    let lost_after = shared.config.lost_after;
    let mut sweep = tokio::time::interval(shared.config.announce_interval.max(MIN_PERIOD));

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, src)) => handle_datagram(&shared, &scope, &buf[..len], src).await,
                Err(e) => warn!("discovery recv error: {e}"),
            },
            _ = sweep.tick() => {
                let mut state = shared.state.lock().await;
                for id in state.peers.sweep(Instant::now(), lost_after) {
                    debug!("endpoint {id} silent for {lost_after:?}, lost");
                    shared.emit(TransportEvent::EndpointLost { endpoint_id: id });
                }
            }
        }
    }
}

async fn handle_datagram(
    shared: &Shared,
    scope: &DiscoveryScope,
    datagram: &[u8],
    src: SocketAddr,
) {
    let announce = match decode_frame(datagram) {
        Ok((WireMessage::Announce(announce), _)) => announce,
        Ok((other, _)) => {
            warn!(
                "unexpected {:?} on discovery port from {src}",
                other.message_type()
            );
            return;
        }
        Err(e) => {
            debug!("failed to decode discovery datagram from {src}: {e}");
            return;
        }
    };

    if announce.endpoint_id == shared.local_id {
        return;
    }
    if !scope.matches(&announce) {
        trace!(
            "ignoring {} advertising {} ({})",
            announce.endpoint_id,
            announce.service_id,
            announce.strategy
        );
        return;
    }

    let control_addr = SocketAddr::new(src.ip(), announce.control_port);
    let mut state = shared.state.lock().await;
    if state.peers.observe(
        &announce.endpoint_id,
        &announce.endpoint_name,
        control_addr,
        Instant::now(),
    ) {
        debug!(
            "found {} ('{}') at {control_addr}",
            announce.endpoint_id, announce.endpoint_name
        );
        shared.emit(TransportEvent::EndpointFound {
            endpoint_id: announce.endpoint_id,
            info: DiscoveredEndpointInfo {
                endpoint_name: announce.endpoint_name,
                service_id: announce.service_id,
            },
        });
    }
}
