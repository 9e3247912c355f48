//! In-process loopback transport.
//!
//! A [`LoopbackMedium`] plays the part of the radio: every
//! [`LoopbackTransport`] attached to it is one simulated device with its own
//! endpoint id and event channel.  The medium reproduces the behaviour a
//! session relies on from a real nearby-connections transport:
//!
//! - Advertisers and discoverers see each other only when both the service id
//!   and the strategy match.
//! - A connection request produces `ConnectionInitiated` on *both* sides, and
//!   the connection is only established once both sides have accepted.
//! - Two devices requesting each other at once share a single pending link.
//! - `stop_all_endpoints` tells every peer what it lost: connected peers get
//!   `Disconnected`, pending peers a failed `ConnectionResult`, discoverers
//!   `EndpointLost`.
//!
//! Events are sent while the medium lock is held, so each device receives
//! them in causal order.
//!
//! Used by the integration tests and by `localsignal --demo`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use localsignal_core::{
    ConnectionInfo, ConnectionStatus, DiscoveredEndpointInfo, EndpointId, Payload,
    PayloadTransferUpdate, Strategy,
};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::application::transport::{
    ConnectionOptions, EventSender, Transport, TransportError, TransportEvent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Scope {
    service_id: String,
    strategy: Strategy,
}

#[derive(Debug)]
struct Device {
    events: EventSender,
    advertising: Option<(String, Scope)>,
    discovering: Option<Scope>,
}

impl Device {
    fn notify(&self, event: TransportEvent) {
        // A device whose session has ended simply stops listening.
        let _ = self.events.send(event);
    }

    /// `true` if this device discovers what `advertiser` advertises.
    fn sees(&self, advertiser: &Device) -> bool {
        match (&self.discovering, &advertiser.advertising) {
            (Some(wanted), Some((_, offered))) => wanted == offered,
            _ => false,
        }
    }
}

/// Link identity: the pair of endpoints, smaller id first.
type LinkKey = (EndpointId, EndpointId);

fn link_key(a: &EndpointId, b: &EndpointId) -> LinkKey {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

#[derive(Debug, Default)]
struct Link {
    accepted: Vec<EndpointId>,
    connected: bool,
}

#[derive(Debug, Default)]
struct MediumState {
    devices: HashMap<EndpointId, Device>,
    links: HashMap<LinkKey, Link>,
}

impl MediumState {
    fn device(&self, id: &EndpointId) -> Result<&Device, TransportError> {
        self.devices
            .get(id)
            .ok_or_else(|| TransportError::EndpointUnknown(id.clone()))
    }

    fn device_mut(&mut self, id: &EndpointId) -> Result<&mut Device, TransportError> {
        self.devices
            .get_mut(id)
            .ok_or_else(|| TransportError::EndpointUnknown(id.clone()))
    }

    fn notify(&self, id: &EndpointId, event: TransportEvent) {
        if let Some(device) = self.devices.get(id) {
            device.notify(event);
        }
    }

    fn advertised_name(&self, id: &EndpointId) -> String {
        self.devices
            .get(id)
            .and_then(|d| d.advertising.as_ref())
            .map(|(name, _)| name.clone())
            .unwrap_or_default()
    }
}

/// The shared simulated radio.
#[derive(Debug, Default)]
pub struct LoopbackMedium {
    state: Mutex<MediumState>,
}

impl LoopbackMedium {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attaches a new device with a generated endpoint id.
    pub async fn attach(self: &Arc<Self>, events: EventSender) -> LoopbackTransport {
        self.attach_as(EndpointId::generate(), events).await
    }

    /// Attaches a new device with a chosen endpoint id.
    ///
    /// Re-attaching an id replaces the previous device.
    pub async fn attach_as(
        self: &Arc<Self>,
        id: EndpointId,
        events: EventSender,
    ) -> LoopbackTransport {
        let mut state = self.state.lock().await;
        state.devices.insert(
            id.clone(),
            Device {
                events,
                advertising: None,
                discovering: None,
            },
        );
        debug!("loopback device {id} attached");
        LoopbackTransport {
            id,
            medium: Arc::clone(self),
        }
    }

    /// Number of established connections on the medium.
    pub async fn connection_count(&self) -> usize {
        let state = self.state.lock().await;
        state.links.values().filter(|l| l.connected).count()
    }
}

/// One simulated device on a [`LoopbackMedium`].
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    id: EndpointId,
    medium: Arc<LoopbackMedium>,
}

impl LoopbackTransport {
    /// The endpoint id peers see for this device.
    pub fn local_id(&self) -> &EndpointId {
        &self.id
    }

    /// Drops the connection to `peer`, notifying both sides.
    pub async fn disconnect_from_endpoint(&self, peer: &EndpointId) -> Result<(), TransportError> {
        let mut state = self.medium.state.lock().await;
        let key = link_key(&self.id, peer);
        match state.links.get(&key) {
            Some(link) if link.connected => {}
            _ => return Err(TransportError::NotConnected(peer.clone())),
        }
        state.links.remove(&key);
        debug!("loopback {}: disconnecting from {peer}", self.id);
        state.notify(
            &self.id,
            TransportEvent::Disconnected {
                endpoint_id: peer.clone(),
            },
        );
        state.notify(
            peer,
            TransportEvent::Disconnected {
                endpoint_id: self.id.clone(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn start_advertising(
        &self,
        local_name: &str,
        service_id: &str,
        options: &ConnectionOptions,
    ) -> Result<(), TransportError> {
        let mut state = self.medium.state.lock().await;
        let me = state.device_mut(&self.id)?;
        if me.advertising.is_some() {
            return Err(TransportError::AlreadyAdvertising);
        }
        me.advertising = Some((
            local_name.to_string(),
            Scope {
                service_id: service_id.to_string(),
                strategy: options.strategy,
            },
        ));

        let me = state.device(&self.id)?;
        for (id, other) in &state.devices {
            if id != &self.id && other.sees(me) {
                other.notify(TransportEvent::EndpointFound {
                    endpoint_id: self.id.clone(),
                    info: DiscoveredEndpointInfo {
                        endpoint_name: local_name.to_string(),
                        service_id: service_id.to_string(),
                    },
                });
            }
        }
        debug!("loopback {}: advertising '{local_name}' on {service_id}", self.id);
        Ok(())
    }

    async fn start_discovery(
        &self,
        service_id: &str,
        options: &ConnectionOptions,
    ) -> Result<(), TransportError> {
        let mut state = self.medium.state.lock().await;
        let me = state.device_mut(&self.id)?;
        if me.discovering.is_some() {
            return Err(TransportError::AlreadyDiscovering);
        }
        me.discovering = Some(Scope {
            service_id: service_id.to_string(),
            strategy: options.strategy,
        });

        let me = state.device(&self.id)?;
        for (id, other) in &state.devices {
            if id == &self.id || !me.sees(other) {
                continue;
            }
            if let Some((name, scope)) = &other.advertising {
                me.notify(TransportEvent::EndpointFound {
                    endpoint_id: id.clone(),
                    info: DiscoveredEndpointInfo {
                        endpoint_name: name.clone(),
                        service_id: scope.service_id.clone(),
                    },
                });
            }
        }
        debug!("loopback {}: discovering on {service_id}", self.id);
        Ok(())
    }

    async fn request_connection(
        &self,
        local_name: &str,
        endpoint_id: &EndpointId,
    ) -> Result<(), TransportError> {
        let mut state = self.medium.state.lock().await;
        if state.device(endpoint_id)?.advertising.is_none() {
            return Err(TransportError::EndpointUnknown(endpoint_id.clone()));
        }

        let key = link_key(&self.id, endpoint_id);
        if state.links.contains_key(&key) {
            trace!(
                "loopback {}: link with {endpoint_id} already exists",
                self.id
            );
            return Ok(());
        }
        state.links.insert(key, Link::default());

        let remote_name = state.advertised_name(endpoint_id);
        state.notify(
            &self.id,
            TransportEvent::ConnectionInitiated {
                endpoint_id: endpoint_id.clone(),
                info: ConnectionInfo {
                    endpoint_name: remote_name,
                    is_incoming: false,
                },
            },
        );
        state.notify(
            endpoint_id,
            TransportEvent::ConnectionInitiated {
                endpoint_id: self.id.clone(),
                info: ConnectionInfo {
                    endpoint_name: local_name.to_string(),
                    is_incoming: true,
                },
            },
        );
        debug!("loopback {}: requested connection to {endpoint_id}", self.id);
        Ok(())
    }

    async fn accept_connection(&self, endpoint_id: &EndpointId) -> Result<(), TransportError> {
        let mut state = self.medium.state.lock().await;
        let key = link_key(&self.id, endpoint_id);
        let link = state
            .links
            .get_mut(&key)
            .ok_or_else(|| TransportError::EndpointUnknown(endpoint_id.clone()))?;

        if link.connected || link.accepted.contains(&self.id) {
            return Ok(());
        }
        link.accepted.push(self.id.clone());
        if link.accepted.len() < 2 {
            return Ok(());
        }
        link.connected = true;

        debug!("loopback {}: connected to {endpoint_id}", self.id);
        state.notify(
            &self.id,
            TransportEvent::ConnectionResult {
                endpoint_id: endpoint_id.clone(),
                status: ConnectionStatus::Ok,
            },
        );
        state.notify(
            endpoint_id,
            TransportEvent::ConnectionResult {
                endpoint_id: self.id.clone(),
                status: ConnectionStatus::Ok,
            },
        );
        Ok(())
    }

    async fn send_payload(
        &self,
        endpoint_ids: &[EndpointId],
        payload: Payload,
    ) -> Result<(), TransportError> {
        let state = self.medium.state.lock().await;
        let size = payload.as_bytes().map_or(0, |b| b.len() as u64);
        let mut delivered = 0;

        for peer in endpoint_ids {
            let connected = state
                .links
                .get(&link_key(&self.id, peer))
                .is_some_and(|l| l.connected);
            if !connected {
                debug!("loopback {}: skipping unconnected {peer}", self.id);
                continue;
            }
            let update = PayloadTransferUpdate::completed(payload.id, size);
            state.notify(
                peer,
                TransportEvent::PayloadReceived {
                    endpoint_id: self.id.clone(),
                    payload: payload.clone(),
                },
            );
            state.notify(
                peer,
                TransportEvent::PayloadTransferUpdate {
                    endpoint_id: self.id.clone(),
                    update: update.clone(),
                },
            );
            state.notify(
                &self.id,
                TransportEvent::PayloadTransferUpdate {
                    endpoint_id: peer.clone(),
                    update,
                },
            );
            delivered += 1;
        }

        if delivered == 0 {
            return Err(TransportError::NoConnectedEndpoints(endpoint_ids.len()));
        }
        Ok(())
    }

    async fn stop_all_endpoints(&self) {
        let mut state = self.medium.state.lock().await;

        let mine: Vec<(LinkKey, bool)> = state
            .links
            .iter()
            .filter(|((a, b), _)| a == &self.id || b == &self.id)
            .map(|(key, link)| (key.clone(), link.connected))
            .collect();
        for (key, connected) in mine {
            state.links.remove(&key);
            let peer = if key.0 == self.id { &key.1 } else { &key.0 };
            let event = if connected {
                TransportEvent::Disconnected {
                    endpoint_id: self.id.clone(),
                }
            } else {
                TransportEvent::ConnectionResult {
                    endpoint_id: self.id.clone(),
                    status: ConnectionStatus::Error("peer stopped".to_string()),
                }
            };
            state.notify(peer, event);
        }

        if let Some(me) = state.devices.get(&self.id) {
            for (id, other) in &state.devices {
                if id != &self.id && other.sees(me) {
                    other.notify(TransportEvent::EndpointLost {
                        endpoint_id: self.id.clone(),
                    });
                }
            }
        }
        if let Some(me) = state.devices.get_mut(&self.id) {
            me.advertising = None;
            me.discovering = None;
        }
        debug!("loopback {}: stopped all endpoints", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::{event_channel, EventReceiver};

    fn opts() -> ConnectionOptions {
        ConnectionOptions::default()
    }

    async fn device(medium: &Arc<LoopbackMedium>, id: &str) -> (LoopbackTransport, EventReceiver) {
        let (tx, rx) = event_channel();
        (medium.attach_as(EndpointId::from(id), tx).await, rx)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn connected_pair(
        medium: &Arc<LoopbackMedium>,
    ) -> (LoopbackTransport, EventReceiver, LoopbackTransport, EventReceiver) {
        let (a, mut a_rx) = device(medium, "A").await;
        let (b, mut b_rx) = device(medium, "B").await;
        b.start_advertising("Bee", "svc", &opts()).await.unwrap();
        a.request_connection("Ay", b.local_id()).await.unwrap();
        a.accept_connection(b.local_id()).await.unwrap();
        b.accept_connection(a.local_id()).await.unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);
        (a, a_rx, b, b_rx)
    }

    #[tokio::test]
    async fn test_discovery_finds_matching_advertiser() {
        // Arrange
        let medium = LoopbackMedium::new();
        let (a, mut a_rx) = device(&medium, "A").await;
        let (b, _b_rx) = device(&medium, "B").await;
        b.start_advertising("Bee", "svc", &opts()).await.unwrap();

        // Act
        a.start_discovery("svc", &opts()).await.unwrap();

        // Assert
        assert_eq!(
            drain(&mut a_rx),
            vec![TransportEvent::EndpointFound {
                endpoint_id: EndpointId::from("B"),
                info: DiscoveredEndpointInfo {
                    endpoint_name: "Bee".to_string(),
                    service_id: "svc".to_string(),
                },
            }]
        );
    }

    #[tokio::test]
    async fn test_later_advertiser_is_reported_to_discoverer() {
        let medium = LoopbackMedium::new();
        let (a, mut a_rx) = device(&medium, "A").await;
        let (b, _b_rx) = device(&medium, "B").await;
        a.start_discovery("svc", &opts()).await.unwrap();

        b.start_advertising("Bee", "svc", &opts()).await.unwrap();

        assert_eq!(drain(&mut a_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_service_or_strategy_is_invisible() {
        // Arrange
        let medium = LoopbackMedium::new();
        let (a, mut a_rx) = device(&medium, "A").await;
        let (b, _b_rx) = device(&medium, "B").await;
        let (c, _c_rx) = device(&medium, "C").await;
        b.start_advertising("Bee", "other", &opts()).await.unwrap();
        let star = ConnectionOptions {
            strategy: Strategy::Star,
        };
        c.start_advertising("Sea", "svc", &star).await.unwrap();

        // Act
        a.start_discovery("svc", &opts()).await.unwrap();

        // Assert
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn test_second_advertise_is_rejected() {
        let medium = LoopbackMedium::new();
        let (a, _rx) = device(&medium, "A").await;
        a.start_advertising("Ay", "svc", &opts()).await.unwrap();

        let result = a.start_advertising("Ay", "svc", &opts()).await;

        assert!(matches!(result, Err(TransportError::AlreadyAdvertising)));
    }

    #[tokio::test]
    async fn test_request_notifies_both_sides() {
        // Arrange
        let medium = LoopbackMedium::new();
        let (a, mut a_rx) = device(&medium, "A").await;
        let (b, mut b_rx) = device(&medium, "B").await;
        b.start_advertising("Bee", "svc", &opts()).await.unwrap();

        // Act
        a.request_connection("Ay", b.local_id()).await.unwrap();

        // Assert
        assert!(matches!(
            drain(&mut a_rx).as_slice(),
            [TransportEvent::ConnectionInitiated {
                info: ConnectionInfo {
                    is_incoming: false,
                    ..
                },
                ..
            }]
        ));
        assert!(matches!(
            drain(&mut b_rx).as_slice(),
            [TransportEvent::ConnectionInitiated {
                info: ConnectionInfo {
                    is_incoming: true,
                    ..
                },
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_connection_needs_both_accepts() {
        // Arrange
        let medium = LoopbackMedium::new();
        let (a, mut a_rx) = device(&medium, "A").await;
        let (b, _b_rx) = device(&medium, "B").await;
        b.start_advertising("Bee", "svc", &opts()).await.unwrap();
        a.request_connection("Ay", b.local_id()).await.unwrap();
        drain(&mut a_rx);

        // Act
        a.accept_connection(b.local_id()).await.unwrap();
        let after_one = drain(&mut a_rx);
        b.accept_connection(a.local_id()).await.unwrap();

        // Assert
        assert!(after_one.is_empty());
        assert_eq!(
            drain(&mut a_rx),
            vec![TransportEvent::ConnectionResult {
                endpoint_id: EndpointId::from("B"),
                status: ConnectionStatus::Ok,
            }]
        );
        assert_eq!(medium.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_simultaneous_requests_share_one_link() {
        let medium = LoopbackMedium::new();
        let (a, mut a_rx) = device(&medium, "A").await;
        let (b, mut b_rx) = device(&medium, "B").await;
        a.start_advertising("Ay", "svc", &opts()).await.unwrap();
        b.start_advertising("Bee", "svc", &opts()).await.unwrap();

        a.request_connection("Ay", b.local_id()).await.unwrap();
        b.request_connection("Bee", a.local_id()).await.unwrap();

        assert_eq!(drain(&mut a_rx).len(), 1);
        assert_eq!(drain(&mut b_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_request_to_unknown_endpoint_fails() {
        let medium = LoopbackMedium::new();
        let (a, _rx) = device(&medium, "A").await;

        let result = a.request_connection("Ay", &EndpointId::from("nobody")).await;

        assert!(matches!(result, Err(TransportError::EndpointUnknown(_))));
    }

    #[tokio::test]
    async fn test_payload_reaches_connected_peer_with_updates() {
        // Arrange
        let medium = LoopbackMedium::new();
        let (a, mut a_rx, b, mut b_rx) = connected_pair(&medium).await;
        let payload = Payload::from_bytes("hi");

        // Act
        a.send_payload(&[b.local_id().clone()], payload.clone())
            .await
            .unwrap();

        // Assert
        let received = drain(&mut b_rx);
        assert_eq!(
            received[0],
            TransportEvent::PayloadReceived {
                endpoint_id: EndpointId::from("A"),
                payload,
            }
        );
        assert!(matches!(
            received[1],
            TransportEvent::PayloadTransferUpdate { .. }
        ));
        assert!(matches!(
            drain(&mut a_rx).as_slice(),
            [TransportEvent::PayloadTransferUpdate { .. }]
        ));
    }

    #[tokio::test]
    async fn test_payload_to_unconnected_endpoints_fails() {
        let medium = LoopbackMedium::new();
        let (a, _rx) = device(&medium, "A").await;

        let result = a
            .send_payload(&[EndpointId::from("B")], Payload::from_bytes("x"))
            .await;

        assert!(matches!(
            result,
            Err(TransportError::NoConnectedEndpoints(1))
        ));
    }

    #[tokio::test]
    async fn test_stop_all_disconnects_peers() {
        // Arrange
        let medium = LoopbackMedium::new();
        let (a, _a_rx, _b, mut b_rx) = connected_pair(&medium).await;

        // Act
        a.stop_all_endpoints().await;

        // Assert
        assert_eq!(
            drain(&mut b_rx),
            vec![TransportEvent::Disconnected {
                endpoint_id: EndpointId::from("A"),
            }]
        );
        assert_eq!(medium.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_stop_all_reports_lost_to_discoverers() {
        let medium = LoopbackMedium::new();
        let (a, mut a_rx) = device(&medium, "A").await;
        let (b, _b_rx) = device(&medium, "B").await;
        a.start_discovery("svc", &opts()).await.unwrap();
        b.start_advertising("Bee", "svc", &opts()).await.unwrap();
        drain(&mut a_rx);

        b.stop_all_endpoints().await;

        assert_eq!(
            drain(&mut a_rx),
            vec![TransportEvent::EndpointLost {
                endpoint_id: EndpointId::from("B"),
            }]
        );
    }

    #[tokio::test]
    async fn test_disconnect_from_endpoint_notifies_both() {
        let medium = LoopbackMedium::new();
        let (a, mut a_rx, b, mut b_rx) = connected_pair(&medium).await;

        a.disconnect_from_endpoint(b.local_id()).await.unwrap();

        assert_eq!(drain(&mut a_rx).len(), 1);
        assert_eq!(drain(&mut b_rx).len(), 1);
        assert!(matches!(
            a.disconnect_from_endpoint(b.local_id()).await,
            Err(TransportError::NotConnected(_))
        ));
    }
}
