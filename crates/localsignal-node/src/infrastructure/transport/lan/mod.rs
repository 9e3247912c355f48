//! LAN transport: UDP broadcast discovery plus one TCP link per peer.
//!
//! # Link handshake
//!
//! ```text
//!  requester                          acceptor
//!     │ ── TCP connect ─────────────────► │
//!     │ ── ConnectionRequest ───────────► │   both sides emit
//!     │                                   │   ConnectionInitiated
//!     │ ◄────────────── ConnectionAccept  │   (acceptor's accept)
//!     │ ── ConnectionAccept ────────────► │   (requester's accept)
//!     │                                   │
//!  both sides emit ConnectionResult(Ok) once they have sent *and* received
//!  an accept.
//! ```
//!
//! A request under a different service id is answered with
//! `ConnectionReject`.  When two peers dial each other at the same time, the
//! link initiated by the lower endpoint id wins on both sides; the loser's
//! initiator closes its link and the other side waits for that close.
//!
//! Every link gets a process-unique `link_id`.  A link task only reports
//! events while its id is still the one registered for the peer, so a
//! replaced or stopped link goes quiet.

mod discovery;
mod link;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use localsignal_core::protocol::{
    encode_frame, AnnounceMessage, ConnectionRequestMessage, SequenceCounter, WireMessage,
};
use localsignal_core::{
    ConnectionInfo, ConnectionStatus, EndpointId, Payload, PayloadTransferUpdate,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::transport::{
    ConnectionOptions, EventSender, Transport, TransportError, TransportEvent,
};

pub use discovery::{DiscoveryScope, Peer, PeerTable};
pub use link::{read_frame, write_frame, LinkError};

use discovery::{bind_announcer, run_announcer, run_listener};
use link::{drain_until_closed, write_loop, Outgoing};

static LINK_IDS: SequenceCounter = SequenceCounter::new();

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Network settings for the LAN transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanConfig {
    /// Local address every socket binds to.
    pub bind_address: IpAddr,
    /// Where announcements are sent.
    pub broadcast_address: IpAddr,
    /// UDP port announcements are sent to and discovery listens on.
    pub discovery_port: u16,
    /// TCP port for connection requests.  0 picks an ephemeral port.
    pub control_port: u16,
    pub announce_interval: Duration,
    /// Silence after which a discovered endpoint is reported lost.
    pub lost_after: Duration,
    /// Bound on connecting and on waiting for the first handshake frame.
    pub handshake_timeout: Duration,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_address: IpAddr::V4(Ipv4Addr::BROADCAST),
            discovery_port: 24810,
            control_port: 0,
            announce_interval: Duration::from_millis(1000),
            lost_after: Duration::from_millis(5000),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

struct Advertising {
    service_id: String,
    control_port: u16,
    tasks: Vec<JoinHandle<()>>,
}

struct Discovering {
    service_id: String,
    task: JoinHandle<()>,
}

struct LinkEntry {
    link_id: u64,
    initiator: EndpointId,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    task: JoinHandle<()>,
    local_accepted: bool,
    remote_accepted: bool,
    connected: bool,
}

impl LinkEntry {
    fn ready(&self) -> bool {
        self.local_accepted && self.remote_accepted && !self.connected
    }
}

#[derive(Default)]
struct LanState {
    advertising: Option<Advertising>,
    discovering: Option<Discovering>,
    peers: PeerTable,
    links: HashMap<EndpointId, LinkEntry>,
}

/// State shared between the transport handle and its background tasks.
struct Shared {
    local_id: EndpointId,
    config: LanConfig,
    events: EventSender,
    state: Mutex<LanState>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Drops the link if it is still the registered one and reports why.
    async fn close_link(&self, peer: &EndpointId, link_id: u64, reason: String) {
        let mut state = self.state.lock().await;
        if !matches!(state.links.get(peer), Some(entry) if entry.link_id == link_id) {
            return;
        }
        let Some(entry) = state.links.remove(peer) else {
            return;
        };
        if entry.connected {
            info!("link to {peer} closed: {reason}");
            self.emit(TransportEvent::Disconnected {
                endpoint_id: peer.clone(),
            });
        } else {
            warn!("link to {peer} failed before connecting: {reason}");
            self.emit(TransportEvent::ConnectionResult {
                endpoint_id: peer.clone(),
                status: ConnectionStatus::Error(reason),
            });
        }
    }

    /// Handles one frame from a link.  Returns `false` once the link is done.
    async fn on_link_message(
        &self,
        peer: &EndpointId,
        link_id: u64,
        message: WireMessage,
    ) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.links.get_mut(peer).filter(|e| e.link_id == link_id) else {
            return false;
        };

        match message {
            WireMessage::ConnectionAccept => {
                entry.remote_accepted = true;
                if entry.ready() {
                    entry.connected = true;
                    info!("connected to {peer}");
                    self.emit(TransportEvent::ConnectionResult {
                        endpoint_id: peer.clone(),
                        status: ConnectionStatus::Ok,
                    });
                }
                true
            }
            WireMessage::Payload(payload) if entry.connected => {
                self.emit(TransportEvent::PayloadReceived {
                    endpoint_id: peer.clone(),
                    payload,
                });
                true
            }
            WireMessage::Payload(_) => {
                warn!("payload from {peer} before the connection completed, dropped");
                true
            }
            WireMessage::ConnectionReject => {
                state.links.remove(peer);
                warn!("{peer} rejected the connection");
                self.emit(TransportEvent::ConnectionResult {
                    endpoint_id: peer.clone(),
                    status: ConnectionStatus::Rejected,
                });
                false
            }
            WireMessage::Disconnect => {
                let connected = entry.connected;
                state.links.remove(peer);
                if connected {
                    info!("{peer} disconnected");
                    self.emit(TransportEvent::Disconnected {
                        endpoint_id: peer.clone(),
                    });
                } else {
                    self.emit(TransportEvent::ConnectionResult {
                        endpoint_id: peer.clone(),
                        status: ConnectionStatus::Error("peer left during handshake".to_string()),
                    });
                }
                false
            }
            other @ (WireMessage::Announce(_) | WireMessage::ConnectionRequest(_)) => {
                warn!(
                    "unexpected {:?} on link with {peer}",
                    other.message_type()
                );
                true
            }
        }
    }
}

/// Local-network transport.  Cheap to clone; clones share one state.
#[derive(Clone)]
pub struct LanTransport {
    shared: Arc<Shared>,
}

impl LanTransport {
    /// Creates a transport with a freshly generated endpoint id.
    pub fn new(config: LanConfig, events: EventSender) -> Self {
        Self::with_id(EndpointId::generate(), config, events)
    }

    pub fn with_id(local_id: EndpointId, config: LanConfig, events: EventSender) -> Self {
        Self {
            shared: Arc::new(Shared {
                local_id,
                config,
                events,
                state: Mutex::new(LanState::default()),
            }),
        }
    }

    /// The endpoint id peers see for this device.
    pub fn local_id(&self) -> &EndpointId {
        &self.shared.local_id
    }

    /// The TCP port connection requests are accepted on while advertising.
    pub async fn control_port(&self) -> Option<u16> {
        let state = self.shared.state.lock().await;
        state.advertising.as_ref().map(|a| a.control_port)
    }
}

impl std::fmt::Debug for LanTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanTransport")
            .field("local_id", &self.shared.local_id)
            .field("config", &self.shared.config)
            .finish()
    }
}

#[async_trait]
impl Transport for LanTransport {
    async fn start_advertising(
        &self,
        local_name: &str,
        service_id: &str,
        options: &ConnectionOptions,
    ) -> Result<(), TransportError> {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        if state.advertising.is_some() {
            return Err(TransportError::AlreadyAdvertising);
        }

        let listen_addr = SocketAddr::new(shared.config.bind_address, shared.config.control_port);
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|source| TransportError::BindFailed {
                addr: listen_addr,
                source,
            })?;
        let control_port = listener.local_addr()?.port();
        let socket = bind_announcer(shared.config.bind_address).await?;

        let announce = AnnounceMessage {
            service_id: service_id.to_string(),
            strategy: options.strategy,
            endpoint_id: shared.local_id.clone(),
            endpoint_name: local_name.to_string(),
            control_port,
        };
        let target = SocketAddr::new(shared.config.broadcast_address, shared.config.discovery_port);
        let announcer = tokio::spawn(run_announcer(
            socket,
            target,
            announce,
            shared.config.announce_interval,
        ));
        let acceptor = tokio::spawn(run_acceptor(Arc::clone(shared), listener));

        info!(
            "advertising {} as '{local_name}', accepting on TCP {control_port}",
            shared.local_id
        );
        state.advertising = Some(Advertising {
            service_id: service_id.to_string(),
            control_port,
            tasks: vec![announcer, acceptor],
        });
        Ok(())
    }

    async fn start_discovery(
        &self,
        service_id: &str,
        options: &ConnectionOptions,
    ) -> Result<(), TransportError> {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        if state.discovering.is_some() {
            return Err(TransportError::AlreadyDiscovering);
        }

        let addr = SocketAddr::new(shared.config.bind_address, shared.config.discovery_port);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::BindFailed { addr, source })?;
        let scope = DiscoveryScope {
            service_id: service_id.to_string(),
            strategy: options.strategy,
        };
        let task = tokio::spawn(run_listener(Arc::clone(shared), socket, scope));

        info!("discovering {service_id} on UDP {addr}");
        state.discovering = Some(Discovering {
            service_id: service_id.to_string(),
            task,
        });
        Ok(())
    }

    async fn request_connection(
        &self,
        local_name: &str,
        endpoint_id: &EndpointId,
    ) -> Result<(), TransportError> {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        if state.links.contains_key(endpoint_id) {
            debug!("link with {endpoint_id} already exists");
            return Ok(());
        }

        let addr = state
            .peers
            .get(endpoint_id)
            .map(|p| p.control_addr)
            .ok_or_else(|| TransportError::EndpointUnknown(endpoint_id.clone()))?;
        let service_id = state
            .discovering
            .as_ref()
            .map(|d| d.service_id.clone())
            .or_else(|| state.advertising.as_ref().map(|a| a.service_id.clone()))
            .ok_or(TransportError::Stopped)?;

        let (outgoing, queue) = mpsc::unbounded_channel();
        outgoing
            .send(Outgoing::message(WireMessage::ConnectionRequest(
                ConnectionRequestMessage {
                    service_id,
                    endpoint_id: shared.local_id.clone(),
                    endpoint_name: local_name.to_string(),
                },
            )))
            .map_err(|_| TransportError::Stopped)?;

        let link_id = LINK_IDS.next();
        let task = tokio::spawn(run_outbound(
            Arc::clone(shared),
            endpoint_id.clone(),
            link_id,
            addr,
            queue,
        ));
        debug!("requesting connection to {endpoint_id} at {addr}");
        state.links.insert(
            endpoint_id.clone(),
            LinkEntry {
                link_id,
                initiator: shared.local_id.clone(),
                outgoing,
                task,
                local_accepted: false,
                remote_accepted: false,
                connected: false,
            },
        );
        Ok(())
    }

    async fn accept_connection(&self, endpoint_id: &EndpointId) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock().await;
        let entry = state
            .links
            .get_mut(endpoint_id)
            .ok_or_else(|| TransportError::EndpointUnknown(endpoint_id.clone()))?;
        if entry.local_accepted {
            return Ok(());
        }

        entry
            .outgoing
            .send(Outgoing::message(WireMessage::ConnectionAccept))
            .map_err(|_| TransportError::NotConnected(endpoint_id.clone()))?;
        entry.local_accepted = true;
        if entry.ready() {
            entry.connected = true;
            info!("connected to {endpoint_id}");
            self.shared.emit(TransportEvent::ConnectionResult {
                endpoint_id: endpoint_id.clone(),
                status: ConnectionStatus::Ok,
            });
        }
        Ok(())
    }

    async fn send_payload(
        &self,
        endpoint_ids: &[EndpointId],
        payload: Payload,
    ) -> Result<(), TransportError> {
        // Oversized payloads fail here rather than killing each link's writer.
        encode_frame(&WireMessage::Payload(payload.clone()), 0)?;

        let state = self.shared.state.lock().await;
        let size = payload.as_bytes().map_or(0, |b| b.len() as u64);
        let mut queued = 0;
        for peer in endpoint_ids {
            let Some(entry) = state.links.get(peer).filter(|e| e.connected) else {
                debug!("not connected to {peer}, skipping");
                continue;
            };
            let out = Outgoing {
                message: WireMessage::Payload(payload.clone()),
                delivered: Some(PayloadTransferUpdate::completed(payload.id, size)),
            };
            if entry.outgoing.send(out).is_ok() {
                queued += 1;
            }
        }

        if queued == 0 {
            return Err(TransportError::NoConnectedEndpoints(endpoint_ids.len()));
        }
        Ok(())
    }

    async fn stop_all_endpoints(&self) {
        let mut state = self.shared.state.lock().await;
        if let Some(advertising) = state.advertising.take() {
            for task in advertising.tasks {
                task.abort();
            }
        }
        if let Some(discovering) = state.discovering.take() {
            discovering.task.abort();
        }
        if !state.peers.is_empty() {
            debug!("forgetting {} discovered endpoint(s)", state.peers.len());
            state.peers.clear();
        }

        for (peer, entry) in state.links.drain() {
            if entry.connected {
                // The writer flushes the Disconnect, then closes the link.
                let _ = entry.outgoing.send(Outgoing::message(WireMessage::Disconnect));
                debug!("disconnecting from {peer}");
            } else {
                entry.task.abort();
                debug!("abandoning pending link with {peer}");
            }
        }
        info!("stopped advertising, discovery and all links");
    }
}

// ── Link tasks ────────────────────────────────────────────────────────────────

async fn run_acceptor(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("incoming TCP connection from {addr}");
                tokio::spawn(handle_incoming(Arc::clone(&shared), stream));
            }
            Err(e) => {
                warn!("accept failed: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn handle_incoming(shared: Arc<Shared>, stream: TcpStream) {
    let (mut reader, mut writer) = stream.into_split();
    let limit = shared.config.handshake_timeout;

    let request = match tokio::time::timeout(limit, read_frame(&mut reader)).await {
        Ok(Ok(Some(WireMessage::ConnectionRequest(request)))) => request,
        Ok(Ok(Some(other))) => {
            warn!("expected ConnectionRequest, got {:?}", other.message_type());
            return;
        }
        Ok(Ok(None)) => return,
        Ok(Err(e)) => {
            warn!("handshake failed: {e}");
            return;
        }
        Err(_) => {
            warn!("{}", LinkError::HandshakeTimeout(limit));
            return;
        }
    };

    let peer = request.endpoint_id.clone();
    let mut state = shared.state.lock().await;
    let expected = state.advertising.as_ref().map(|a| a.service_id.clone());
    if expected.as_deref() != Some(request.service_id.as_str()) {
        drop(state);
        warn!(
            "rejecting {peer}: service {} does not match {expected:?}",
            request.service_id
        );
        if let Err(e) = write_frame(&mut writer, &WireMessage::ConnectionReject).await {
            debug!("could not send ConnectionReject to {peer}: {e}");
        }
        return;
    }

    if let Some(existing) = state.links.get(&peer) {
        let incoming_wins = existing.initiator == peer || peer < shared.local_id;
        if !incoming_wins {
            drop(state);
            debug!("keeping own link to {peer}, parking theirs");
            drain_until_closed(reader, writer, limit).await;
            return;
        }
        if let Some(replaced) = state.links.remove(&peer) {
            replaced.task.abort();
            if replaced.connected {
                // The session must see the old connection end before the new
                // one is offered.
                info!("{peer} redialled, dropping link {}", replaced.link_id);
                shared.emit(TransportEvent::Disconnected {
                    endpoint_id: peer.clone(),
                });
            } else {
                debug!("replacing link {} to {peer}", replaced.link_id);
            }
        }
    }

    let (outgoing, queue) = mpsc::unbounded_channel();
    let link_id = LINK_IDS.next();
    let task = tokio::spawn(run_link(
        Arc::clone(&shared),
        peer.clone(),
        link_id,
        reader,
        writer,
        queue,
    ));
    state.links.insert(
        peer.clone(),
        LinkEntry {
            link_id,
            initiator: peer.clone(),
            outgoing,
            task,
            local_accepted: false,
            remote_accepted: false,
            connected: false,
        },
    );
    debug!("connection request from {peer} ('{}')", request.endpoint_name);
    shared.emit(TransportEvent::ConnectionInitiated {
        endpoint_id: peer,
        info: ConnectionInfo {
            endpoint_name: request.endpoint_name,
            is_incoming: true,
        },
    });
}

async fn run_outbound(
    shared: Arc<Shared>,
    peer: EndpointId,
    link_id: u64,
    addr: SocketAddr,
    queue: mpsc::UnboundedReceiver<Outgoing>,
) {
    let limit = shared.config.handshake_timeout;
    let stream = match tokio::time::timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            shared
                .close_link(&peer, link_id, format!("connect to {addr} failed: {e}"))
                .await;
            return;
        }
        Err(_) => {
            shared
                .close_link(&peer, link_id, format!("connect to {addr} timed out"))
                .await;
            return;
        }
    };

    {
        let state = shared.state.lock().await;
        if !matches!(state.links.get(&peer), Some(e) if e.link_id == link_id) {
            return;
        }
        let endpoint_name = state
            .peers
            .get(&peer)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        shared.emit(TransportEvent::ConnectionInitiated {
            endpoint_id: peer.clone(),
            info: ConnectionInfo {
                endpoint_name,
                is_incoming: false,
            },
        });
    }

    let (reader, writer) = stream.into_split();
    run_link(shared, peer, link_id, reader, writer, queue).await;
}

async fn run_link(
    shared: Arc<Shared>,
    peer: EndpointId,
    link_id: u64,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    queue: mpsc::UnboundedReceiver<Outgoing>,
) {
    let reason = tokio::select! {
        result = write_loop(writer, queue, peer.clone(), shared.events.clone()) => match result {
            Ok(()) => "link closed locally".to_string(),
            Err(e) => e.to_string(),
        },
        reason = read_loop(&shared, &peer, link_id, reader) => reason,
    };
    shared.close_link(&peer, link_id, reason).await;
}

async fn read_loop(
    shared: &Shared,
    peer: &EndpointId,
    link_id: u64,
    mut reader: OwnedReadHalf,
) -> String {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(message)) => {
                if !shared.on_link_message(peer, link_id, message).await {
                    return "link finished".to_string();
                }
            }
            Ok(None) => return "closed by peer".to_string(),
            Err(e) => return e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::{event_channel, EventReceiver};

    const WAIT: Duration = Duration::from_secs(5);

    fn free_udp_port() -> u16 {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().port()
    }

    fn local_config(discovery_port: u16) -> LanConfig {
        LanConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            broadcast_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            discovery_port,
            announce_interval: Duration::from_millis(50),
            lost_after: Duration::from_millis(400),
            ..LanConfig::default()
        }
    }

    async fn next(rx: &mut EventReceiver) -> TransportEvent {
        tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    /// Waits for the first event matching `predicate`, skipping others.
    async fn next_matching(
        rx: &mut EventReceiver,
        predicate: impl Fn(&TransportEvent) -> bool,
    ) -> TransportEvent {
        loop {
            let event = next(rx).await;
            if predicate(&event) {
                return event;
            }
        }
    }

    #[test]
    fn test_default_config_uses_discovery_port_24810() {
        let config = LanConfig::default();
        assert_eq!(config.discovery_port, 24810);
        assert_eq!(config.control_port, 0);
        assert_eq!(config.lost_after, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_second_discovery_start_is_rejected() {
        let (tx, _rx) = event_channel();
        let transport = LanTransport::new(local_config(free_udp_port()), tx);
        let options = ConnectionOptions::default();
        transport.start_discovery("svc", &options).await.unwrap();

        let result = transport.start_discovery("svc", &options).await;

        assert!(matches!(result, Err(TransportError::AlreadyDiscovering)));
        transport.stop_all_endpoints().await;
    }

    #[tokio::test]
    async fn test_request_to_undiscovered_endpoint_fails() {
        let (tx, _rx) = event_channel();
        let transport = LanTransport::new(local_config(free_udp_port()), tx);

        let result = transport
            .request_connection("A", &EndpointId::from("nobody"))
            .await;

        assert!(matches!(result, Err(TransportError::EndpointUnknown(_))));
    }

    #[tokio::test]
    async fn test_two_transports_find_connect_and_exchange_payload() {
        // Arrange – A discovers, B advertises straight at A's discovery port
        let port = free_udp_port();
        let (a_tx, mut a_rx) = event_channel();
        let (b_tx, mut b_rx) = event_channel();
        let a = LanTransport::with_id(EndpointId::from("A"), local_config(port), a_tx);
        let b = LanTransport::with_id(EndpointId::from("B"), local_config(port), b_tx);
        let options = ConnectionOptions::default();
        a.start_discovery("svc", &options).await.unwrap();
        b.start_advertising("Bee", "svc", &options).await.unwrap();

        // Act – discovery
        let found = next(&mut a_rx).await;
        assert!(matches!(
            &found,
            TransportEvent::EndpointFound { endpoint_id, info }
                if endpoint_id == b.local_id() && info.endpoint_name == "Bee"
        ));

        // Act – handshake
        a.request_connection("Ay", b.local_id()).await.unwrap();
        let a_initiated = next(&mut a_rx).await;
        let b_initiated = next(&mut b_rx).await;
        a.accept_connection(b.local_id()).await.unwrap();
        b.accept_connection(a.local_id()).await.unwrap();
        let a_result = next(&mut a_rx).await;
        let b_result = next(&mut b_rx).await;

        // Assert – handshake
        assert!(matches!(
            a_initiated,
            TransportEvent::ConnectionInitiated {
                info: ConnectionInfo {
                    is_incoming: false,
                    ..
                },
                ..
            }
        ));
        assert!(matches!(
            b_initiated,
            TransportEvent::ConnectionInitiated {
                info: ConnectionInfo {
                    is_incoming: true,
                    ..
                },
                ..
            }
        ));
        assert_eq!(
            a_result,
            TransportEvent::ConnectionResult {
                endpoint_id: EndpointId::from("B"),
                status: ConnectionStatus::Ok,
            }
        );
        assert_eq!(
            b_result,
            TransportEvent::ConnectionResult {
                endpoint_id: EndpointId::from("A"),
                status: ConnectionStatus::Ok,
            }
        );

        // Act – payload
        let payload = Payload::from_bytes("hi");
        a.send_payload(&[EndpointId::from("B")], payload.clone())
            .await
            .unwrap();
        let received = next(&mut b_rx).await;

        // Assert – payload
        assert_eq!(
            received,
            TransportEvent::PayloadReceived {
                endpoint_id: EndpointId::from("A"),
                payload,
            }
        );

        // Act – teardown
        a.stop_all_endpoints().await;
        let disconnected = next_matching(&mut b_rx, |e| {
            matches!(e, TransportEvent::Disconnected { .. })
        })
        .await;

        // Assert – teardown
        assert_eq!(
            disconnected,
            TransportEvent::Disconnected {
                endpoint_id: EndpointId::from("A"),
            }
        );
        b.stop_all_endpoints().await;
    }

    #[tokio::test]
    async fn test_silent_advertiser_is_reported_lost() {
        // Arrange
        let port = free_udp_port();
        let (a_tx, mut a_rx) = event_channel();
        let (b_tx, _b_rx) = event_channel();
        let a = LanTransport::with_id(EndpointId::from("A"), local_config(port), a_tx);
        let b = LanTransport::with_id(EndpointId::from("B"), local_config(port), b_tx);
        let options = ConnectionOptions::default();
        a.start_discovery("svc", &options).await.unwrap();
        b.start_advertising("Bee", "svc", &options).await.unwrap();
        next(&mut a_rx).await;

        // Act
        b.stop_all_endpoints().await;

        // Assert
        let lost = next_matching(&mut a_rx, |e| {
            matches!(e, TransportEvent::EndpointLost { .. })
        })
        .await;
        assert_eq!(
            lost,
            TransportEvent::EndpointLost {
                endpoint_id: EndpointId::from("B"),
            }
        );
        a.stop_all_endpoints().await;
    }

    #[tokio::test]
    async fn test_request_for_other_service_is_rejected() {
        // Arrange
        let (b_tx, _b_rx) = event_channel();
        let b = LanTransport::with_id(
            EndpointId::from("B"),
            local_config(free_udp_port()),
            b_tx,
        );
        b.start_advertising("Bee", "svc", &ConnectionOptions::default())
            .await
            .unwrap();
        let port = b.control_port().await.unwrap();
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        // Act
        write_frame(
            &mut stream,
            &WireMessage::ConnectionRequest(ConnectionRequestMessage {
                service_id: "other".to_string(),
                endpoint_id: EndpointId::from("A"),
                endpoint_name: "Ay".to_string(),
            }),
        )
        .await
        .unwrap();
        let reply = tokio::time::timeout(WAIT, read_frame(&mut stream))
            .await
            .unwrap()
            .unwrap();

        // Assert
        assert_eq!(reply, Some(WireMessage::ConnectionReject));
        b.stop_all_endpoints().await;
    }

    #[tokio::test]
    async fn test_redial_over_connected_link_disconnects_before_new_offer() {
        // Arrange – A and B connected, with A as the requester
        let port = free_udp_port();
        let (a_tx, mut a_rx) = event_channel();
        let (b_tx, mut b_rx) = event_channel();
        let a = LanTransport::with_id(EndpointId::from("A"), local_config(port), a_tx);
        let b = LanTransport::with_id(EndpointId::from("B"), local_config(port), b_tx);
        let options = ConnectionOptions::default();
        a.start_discovery("svc", &options).await.unwrap();
        b.start_advertising("Bee", "svc", &options).await.unwrap();
        next(&mut a_rx).await;
        a.request_connection("Ay", b.local_id()).await.unwrap();
        next(&mut a_rx).await;
        next(&mut b_rx).await;
        a.accept_connection(b.local_id()).await.unwrap();
        b.accept_connection(a.local_id()).await.unwrap();
        next_matching(&mut b_rx, |e| {
            matches!(e, TransportEvent::ConnectionResult { .. })
        })
        .await;

        // Act – A dials B again on a fresh socket
        let port = b.control_port().await.unwrap();
        let mut redial = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        write_frame(
            &mut redial,
            &WireMessage::ConnectionRequest(ConnectionRequestMessage {
                service_id: "svc".to_string(),
                endpoint_id: EndpointId::from("A"),
                endpoint_name: "Ay".to_string(),
            }),
        )
        .await
        .unwrap();
        let first = next(&mut b_rx).await;
        let second = next(&mut b_rx).await;

        // Assert – the old connection ends before the new one is offered
        assert_eq!(
            first,
            TransportEvent::Disconnected {
                endpoint_id: EndpointId::from("A"),
            }
        );
        assert!(matches!(
            second,
            TransportEvent::ConnectionInitiated {
                info: ConnectionInfo {
                    is_incoming: true,
                    ..
                },
                ..
            }
        ));

        // Act – finish the handshake on the new link
        b.accept_connection(&EndpointId::from("A")).await.unwrap();
        let accept = tokio::time::timeout(WAIT, read_frame(&mut redial))
            .await
            .unwrap()
            .unwrap();
        write_frame(&mut redial, &WireMessage::ConnectionAccept)
            .await
            .unwrap();
        let result = next(&mut b_rx).await;

        // Assert – the new link carries payloads
        assert_eq!(accept, Some(WireMessage::ConnectionAccept));
        assert_eq!(
            result,
            TransportEvent::ConnectionResult {
                endpoint_id: EndpointId::from("A"),
                status: ConnectionStatus::Ok,
            }
        );
        let payload = Payload::from_bytes("again");
        b.send_payload(&[EndpointId::from("A")], payload.clone())
            .await
            .unwrap();
        let delivered = tokio::time::timeout(WAIT, read_frame(&mut redial))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, Some(WireMessage::Payload(payload)));

        a.stop_all_endpoints().await;
        b.stop_all_endpoints().await;
    }

    #[tokio::test]
    async fn test_oversized_payload_is_refused_before_queueing() {
        let (tx, _rx) = event_channel();
        let transport = LanTransport::new(local_config(free_udp_port()), tx);
        let payload = Payload::from_bytes(vec![0u8; localsignal_core::protocol::MAX_BODY_SIZE + 1]);

        let result = transport
            .send_payload(&[EndpointId::from("B")], payload)
            .await;

        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }
}
