//! SessionController: the orchestrator of one LocalSignal session.
//!
//! The controller owns the [`EndpointTable`] and is the only writer of the two
//! observable values a host displays: the current [`StatusText`] and the
//! connected-peer count.  It reacts to user intent (`start_networking`,
//! `send_signal`, `shutdown`) and to transport notifications, which all enter
//! through [`SessionController::handle_event`].
//!
//! # Policies
//!
//! - Every discovered endpoint gets exactly one automatic connection request.
//! - Every handshake offer is accepted automatically; any peer advertising
//!   under the shared service identifier is trusted.
//! - Failures never escape: they become a status message or a logged no-op.
//!
//! The controller is not synchronised.  [`crate::application::session_actor`]
//! runs it inside a single task that serialises commands and events.

use std::sync::Arc;

use localsignal_core::{
    ConnectionStatus, EndpointId, EndpointState, LifecycleEvent, Payload, PayloadBody,
    PayloadTransferUpdate, ServiceConfig, SignalMessage, StatusText, Step,
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

use crate::application::manage_endpoints::{EndpointTable, TableChange};
use crate::application::transport::{ConnectionOptions, Transport, TransportEvent};

/// Inbound signals kept for slow subscribers before they start lagging.
const MESSAGE_CHANNEL_CAPACITY: usize = 64;

/// Read side of the session's observable outputs.
///
/// Cheap to clone; every clone sees the same latest values.
#[derive(Debug, Clone)]
pub struct SessionObserver {
    status: watch::Receiver<StatusText>,
    connected: watch::Receiver<usize>,
    messages: broadcast::Sender<SignalMessage>,
}

impl SessionObserver {
    /// The latest status.
    pub fn status(&self) -> StatusText {
        self.status.borrow().clone()
    }

    /// The latest connected-peer count.
    pub fn connected_count(&self) -> usize {
        *self.connected.borrow()
    }

    /// A receiver notified on every status change.
    pub fn watch_status(&self) -> watch::Receiver<StatusText> {
        self.status.clone()
    }

    /// A receiver notified on every connected-count change.
    pub fn watch_connected_count(&self) -> watch::Receiver<usize> {
        self.connected.clone()
    }

    /// Subscribes to inbound signals received from now on.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<SignalMessage> {
        self.messages.subscribe()
    }

    /// Waits until the connected count satisfies `predicate`.
    ///
    /// Returns the count that satisfied it, or `None` if the session ended
    /// first.
    pub async fn wait_for_connected_count(
        &self,
        mut predicate: impl FnMut(usize) -> bool,
    ) -> Option<usize> {
        let mut rx = self.connected.clone();
        rx.wait_for(|count| predicate(*count)).await.ok().map(|c| *c)
    }

    /// Waits until the status satisfies `predicate`.
    pub async fn wait_for_status(
        &self,
        mut predicate: impl FnMut(&StatusText) -> bool,
    ) -> Option<StatusText> {
        let mut rx = self.status.clone();
        rx.wait_for(|status| predicate(status))
            .await
            .ok()
            .map(|s| s.clone())
    }
}

/// Orchestrates advertising, discovery, connections and signals for one
/// session.
pub struct SessionController {
    config: ServiceConfig,
    transport: Arc<dyn Transport>,
    endpoints: EndpointTable,
    status: watch::Sender<StatusText>,
    connected: watch::Sender<usize>,
    messages: broadcast::Sender<SignalMessage>,
    advertising: bool,
    discovering: bool,
    shut_down: bool,
}

impl SessionController {
    pub fn new(config: ServiceConfig, transport: Arc<dyn Transport>) -> Self {
        let (status, _) = watch::channel(StatusText::default());
        let (connected, _) = watch::channel(0);
        let (messages, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        Self {
            config,
            transport,
            endpoints: EndpointTable::new(),
            status,
            connected,
            messages,
            advertising: false,
            discovering: false,
            shut_down: false,
        }
    }

    /// Returns a handle for reading the observable outputs.
    pub fn observer(&self) -> SessionObserver {
        SessionObserver {
            status: self.status.subscribe(),
            connected: self.connected.subscribe(),
            messages: self.messages.clone(),
        }
    }

    /// The lifecycle state of `id`, if it is tracked.
    pub fn endpoint_state(&self, id: &EndpointId) -> Option<EndpointState> {
        self.endpoints.state(id)
    }

    /// Snapshot of every connected endpoint.
    pub fn connected_endpoints(&self) -> Vec<EndpointId> {
        self.endpoints.registry().all()
    }

    /// `true` once both advertising and discovery are running.
    pub fn is_networking(&self) -> bool {
        self.advertising && self.discovering
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Starts advertising and discovery under the configured service.
    ///
    /// Idempotent: a half that is already running is not restarted, so a
    /// repeated call only retries what failed before.  Failures are reported
    /// through the status, never returned.
    pub async fn start_networking(&mut self) {
        if self.shut_down {
            warn!("start_networking after shutdown ignored");
            return;
        }

        let options = ConnectionOptions {
            strategy: self.config.strategy,
        };

        if !self.advertising {
            match self
                .transport
                .start_advertising(&self.config.local_name, &self.config.service_id, &options)
                .await
            {
                Ok(()) => {
                    info!(
                        "advertising as '{}' on {} ({})",
                        self.config.local_name, self.config.service_id, options.strategy
                    );
                    self.advertising = true;
                }
                Err(e) => {
                    warn!("advertising failed to start: {e}");
                    self.set_status(StatusText::AdvertisingFailed(e.to_string()));
                }
            }
        }

        if !self.discovering {
            match self
                .transport
                .start_discovery(&self.config.service_id, &options)
                .await
            {
                Ok(()) => {
                    info!("discovering on {}", self.config.service_id);
                    self.discovering = true;
                }
                Err(e) => {
                    warn!("discovery failed to start: {e}");
                    self.set_status(StatusText::DiscoveryFailed(e.to_string()));
                }
            }
        }
    }

    /// Fans `text` out to every connected endpoint.
    ///
    /// With no connected endpoints the transport is not called and the status
    /// says so.  "Signal Sent" means the send was issued, not delivered.
    pub async fn send_signal(&mut self, text: &str) {
        if self.endpoints.registry().is_empty() {
            debug!("send_signal with no connected endpoints");
            self.set_status(StatusText::NoPeers);
            return;
        }

        let targets = self.endpoints.registry().all();
        let signal = SignalMessage::outbound(text);
        match self
            .transport
            .send_payload(&targets, signal.to_payload())
            .await
        {
            Ok(()) => {
                debug!(
                    "signal of {} bytes sent to {} endpoint(s)",
                    signal.bytes().len(),
                    targets.len()
                );
                self.set_status(StatusText::SignalSent);
            }
            Err(e) => {
                warn!("send to {} endpoint(s) failed: {e}", targets.len());
                self.set_status(StatusText::SendFailed(e.to_string()));
            }
        }
    }

    /// Tears down advertising, discovery and every connection.
    ///
    /// Idempotent; the transport is only told once.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        info!(
            "shutting down session with {} connected endpoint(s)",
            self.endpoints.connected_count()
        );
        self.transport.stop_all_endpoints().await;
        self.shut_down = true;
        self.advertising = false;
        self.discovering = false;
        self.endpoints.clear();
        self.publish_count();
    }

    // ── Transport events ──────────────────────────────────────────────────────

    /// Single entry point for every transport notification.
    pub async fn handle_event(&mut self, event: TransportEvent) {
        if self.shut_down {
            trace!(
                "event for {} after shutdown dropped: {event:?}",
                event.endpoint_id()
            );
            return;
        }

        match event {
            TransportEvent::EndpointFound { endpoint_id, info } => {
                debug!(
                    "found endpoint {endpoint_id} ('{}', {})",
                    info.endpoint_name, info.service_id
                );
                self.on_endpoint_found(endpoint_id).await;
            }
            TransportEvent::EndpointLost { endpoint_id } => {
                self.apply(&endpoint_id, LifecycleEvent::Lost);
            }
            TransportEvent::ConnectionInitiated { endpoint_id, info } => {
                debug!(
                    "connection initiated with {endpoint_id} ('{}', incoming: {})",
                    info.endpoint_name, info.is_incoming
                );
                self.on_connection_initiated(endpoint_id).await;
            }
            TransportEvent::ConnectionResult {
                endpoint_id,
                status,
            } => self.on_connection_result(endpoint_id, status),
            TransportEvent::Disconnected { endpoint_id } => {
                self.apply(&endpoint_id, LifecycleEvent::Disconnected);
            }
            TransportEvent::PayloadReceived {
                endpoint_id,
                payload,
            } => self.on_payload_received(&endpoint_id, &payload),
            TransportEvent::PayloadTransferUpdate {
                endpoint_id,
                update,
            } => self.on_transfer_update(&endpoint_id, &update),
        }

        self.publish_count();
    }

    /// Decodes a byte payload as text and shows it.
    ///
    /// Non-byte payloads are ignored without touching the status.
    pub fn on_payload_received(&mut self, from: &EndpointId, payload: &Payload) {
        let PayloadBody::Bytes(bytes) = &payload.body else {
            debug!(
                "ignoring {} payload {} from {from}",
                payload.kind(),
                payload.id.0
            );
            return;
        };

        let signal = SignalMessage::inbound(from.clone(), bytes.clone());
        debug!("signal from {from}: {:?}", signal.text());
        self.set_status(StatusText::Message(signal.text().to_string()));
        // No subscribers is fine; nothing is retained.
        let _ = self.messages.send(signal);
    }

    async fn on_endpoint_found(&mut self, id: EndpointId) {
        let Some(TableChange::Applied(Step::Moved { from: None, .. })) =
            self.apply(&id, LifecycleEvent::Found)
        else {
            trace!("endpoint {id} already tracked, no new request");
            return;
        };

        self.apply(&id, LifecycleEvent::ConnectionRequested);
        if let Err(e) = self
            .transport
            .request_connection(&self.config.local_name, &id)
            .await
        {
            warn!("connection request to {id} failed: {e}");
            self.apply(&id, LifecycleEvent::ConnectionFailed);
        }
    }

    async fn on_connection_initiated(&mut self, id: EndpointId) {
        if self.apply(&id, LifecycleEvent::ConnectionInitiated).is_none() {
            return;
        }

        if let Err(e) = self.transport.accept_connection(&id).await {
            warn!("accepting connection from {id} failed: {e}");
            self.apply(&id, LifecycleEvent::ConnectionFailed);
        }
    }

    fn on_connection_result(&mut self, id: EndpointId, status: ConnectionStatus) {
        if status.is_ok() {
            info!("connected to {id}");
            self.apply(&id, LifecycleEvent::ConnectionSucceeded);
        } else {
            warn!("connection to {id} not established: {status}");
            self.apply(&id, LifecycleEvent::ConnectionFailed);
        }
    }

    fn on_transfer_update(&self, from: &EndpointId, update: &PayloadTransferUpdate) {
        trace!(
            "transfer update for payload {} with {from}: {:?} {}/{}",
            update.payload_id.0,
            update.status,
            update.bytes_transferred,
            update.total_bytes
        );
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Applies a lifecycle event, logging and swallowing impossible ones.
    fn apply(&mut self, id: &EndpointId, event: LifecycleEvent) -> Option<TableChange> {
        match self.endpoints.apply(id, event) {
            Ok(change) => Some(change),
            Err(e) => {
                warn!("ignored transport event: {e}");
                None
            }
        }
    }

    fn set_status(&self, status: StatusText) {
        self.status.send_replace(status);
    }

    fn publish_count(&self) {
        let count = self.endpoints.connected_count();
        self.connected.send_if_modified(|current| {
            if *current == count {
                return false;
            }
            debug!("connected count {current} -> {count}");
            *current = count;
            true
        });
    }
}
