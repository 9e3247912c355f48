//! Single-owner session task.
//!
//! [`spawn_session`] moves a [`SessionController`] into one Tokio task that
//! owns it exclusively.  Host commands arrive on a command channel, transport
//! notifications on the event channel, and the task handles them one at a
//! time, so the endpoint table never needs a lock.
//!
//! ```text
//!  SessionHandle ──commands──►┐
//!                             ├──► session task ──► SessionController
//!  Transport ─────events─────►┘                        │
//!                                                      ▼
//!                              SessionObserver ◄── watch / broadcast
//! ```
//!
//! The task always ends through `SessionController::shutdown`: either on an
//! explicit [`SessionHandle::shutdown`] or when the last handle is dropped.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::session::{SessionController, SessionObserver};
use crate::application::transport::EventReceiver;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Error returned by [`SessionHandle`] methods.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session task has stopped")]
    Closed,
}

enum SessionCommand {
    StartNetworking(oneshot::Sender<()>),
    SendSignal {
        text: String,
        done: oneshot::Sender<()>,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle for issuing commands to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    observer: SessionObserver,
}

impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionCommand::StartNetworking(_) => f.write_str("StartNetworking"),
            SessionCommand::SendSignal { text, .. } => write!(f, "SendSignal({text:?})"),
            SessionCommand::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

impl SessionHandle {
    /// Starts advertising and discovery.  Resolves once both attempts have
    /// been made; failures show up in the status.
    pub async fn start_networking(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::StartNetworking).await
    }

    /// Sends `text` to every connected peer.  Resolves once the send has been
    /// issued (or short-circuited).
    pub async fn send_signal(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        self.request(|done| SessionCommand::SendSignal { text, done })
            .await
    }

    /// Tears the session down and waits for the transport to stop.
    ///
    /// Calling it on a session that already stopped succeeds.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        match self.request(SessionCommand::Shutdown).await {
            Err(SessionError::Closed) => Ok(()),
            other => other,
        }
    }

    /// Read access to status, connected count and inbound signals.
    pub fn observer(&self) -> &SessionObserver {
        &self.observer
    }

    /// `true` while the session task is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<()>) -> SessionCommand,
    ) -> Result<(), SessionError> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(make(done))
            .await
            .map_err(|_| SessionError::Closed)?;
        wait.await.map_err(|_| SessionError::Closed)
    }
}

/// Spawns the session task.
///
/// Returns the command handle and the task's `JoinHandle`, which completes
/// after the controller has shut down.
pub fn spawn_session(
    controller: SessionController,
    events: EventReceiver,
) -> (SessionHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let handle = SessionHandle {
        commands: commands_tx,
        observer: controller.observer(),
    };
    let task = tokio::spawn(run_session(controller, commands_rx, events));
    (handle, task)
}

async fn run_session(
    mut controller: SessionController,
    mut commands: mpsc::Receiver<SessionCommand>,
    mut events: EventReceiver,
) {
    let mut events_open = true;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SessionCommand::Shutdown(done)) => {
                    controller.shutdown().await;
                    let _ = done.send(());
                    break;
                }
                Some(command) => {
                    debug!("session command: {command:?}");
                    run_command(&mut controller, command).await;
                }
                None => {
                    info!("every session handle dropped, shutting down");
                    controller.shutdown().await;
                    break;
                }
            },
            event = events.recv(), if events_open => match event {
                Some(event) => controller.handle_event(event).await,
                None => {
                    debug!("transport event channel closed");
                    events_open = false;
                }
            },
        }
    }

    debug!("session task finished");
}

async fn run_command(controller: &mut SessionController, command: SessionCommand) {
    match command {
        SessionCommand::StartNetworking(done) => {
            controller.start_networking().await;
            let _ = done.send(());
        }
        SessionCommand::SendSignal { text, done } => {
            controller.send_signal(&text).await;
            let _ = done.send(());
        }
        SessionCommand::Shutdown(done) => {
            controller.shutdown().await;
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use localsignal_core::{
        ConnectionStatus, DiscoveredEndpointInfo, EndpointId, ServiceConfig, StatusText,
    };

    use crate::application::transport::{
        event_channel, EventSender, MockTransport, TransportEvent,
    };

    fn spawn(transport: MockTransport) -> (SessionHandle, JoinHandle<()>, EventSender) {
        let (events_tx, events_rx) = event_channel();
        let controller = SessionController::new(ServiceConfig::default(), Arc::new(transport));
        let (handle, task) = spawn_session(controller, events_rx);
        (handle, task, events_tx)
    }

    #[tokio::test]
    async fn test_send_without_peers_sets_no_peers_status() {
        // Arrange
        let mut transport = MockTransport::new();
        transport.expect_send_payload().times(0);
        transport.expect_stop_all_endpoints().returning(|| ());
        let (handle, _task, _events) = spawn(transport);

        // Act
        handle.send_signal("hi").await.unwrap();

        // Assert
        assert_eq!(handle.observer().status(), StatusText::NoPeers);
    }

    #[tokio::test]
    async fn test_events_update_connected_count() {
        // Arrange
        let mut transport = MockTransport::new();
        transport
            .expect_request_connection()
            .returning(|_, _| Ok(()));
        transport.expect_stop_all_endpoints().returning(|| ());
        let (handle, _task, events) = spawn(transport);
        let e1 = EndpointId::from("E1");

        // Act
        events
            .send(TransportEvent::EndpointFound {
                endpoint_id: e1.clone(),
                info: DiscoveredEndpointInfo {
                    endpoint_name: "MyDevice".to_string(),
                    service_id: "com.example.localsignal.test".to_string(),
                },
            })
            .unwrap();
        events
            .send(TransportEvent::ConnectionResult {
                endpoint_id: e1,
                status: ConnectionStatus::Ok,
            })
            .unwrap();

        // Assert
        let count = handle
            .observer()
            .wait_for_connected_count(|n| n == 1)
            .await;
        assert_eq!(count, Some(1));
    }

    #[tokio::test]
    async fn test_shutdown_stops_task_and_rejects_later_commands() {
        // Arrange
        let mut transport = MockTransport::new();
        transport.expect_stop_all_endpoints().times(1).returning(|| ());
        let (handle, task, _events) = spawn(transport);

        // Act
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        // Assert
        assert!(!handle.is_running());
        assert_eq!(handle.send_signal("late").await, Err(SessionError::Closed));
        assert_eq!(handle.shutdown().await, Ok(()));
    }

    #[tokio::test]
    async fn test_dropping_every_handle_shuts_down() {
        let mut transport = MockTransport::new();
        transport.expect_stop_all_endpoints().times(1).returning(|| ());
        let (handle, task, _events) = spawn(transport);

        drop(handle);

        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_event_channel_keeps_commands_working() {
        // Arrange
        let mut transport = MockTransport::new();
        transport.expect_stop_all_endpoints().returning(|| ());
        let (handle, _task, events) = spawn(transport);

        // Act
        drop(events);
        let result = handle.send_signal("still here").await;

        // Assert
        assert_eq!(result, Ok(()));
        assert_eq!(handle.observer().status(), StatusText::NoPeers);
    }
}
