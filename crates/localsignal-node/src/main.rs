//! LocalSignal node entry point.
//!
//! Runs one session on the local network: advertises and discovers under the
//! configured service id, connects to every matching device it finds, sends
//! each line typed on stdin as a signal to all connected peers, and prints
//! every signal that arrives.
//!
//! # Usage
//!
//! ```text
//! localsignal [OPTIONS]
//!
//! Options:
//!   --config         <PATH>  Config file [default: platform config dir]
//!   --name           <NAME>  Display name announced to peers
//!   --service-id     <ID>    Service id peers must share
//!   --discovery-port <PORT>  UDP discovery port
//!   --save-config            Write the effective config back to the file
//!   --demo                   Run two simulated devices in-process and exit
//! ```
//!
//! | Variable                     | Overrides              |
//! |------------------------------|------------------------|
//! | `LOCALSIGNAL_CONFIG`         | `--config`             |
//! | `LOCALSIGNAL_NAME`           | `service.local_name`   |
//! | `LOCALSIGNAL_SERVICE_ID`     | `service.service_id`   |
//! | `LOCALSIGNAL_DISCOVERY_PORT` | `network.discovery_port` |
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load AppConfig, apply CLI overrides
//!  └─ LanTransport ──events──► session task (SessionController)
//!  └─ stdin lines ──► SessionHandle::send_signal
//!  └─ status / count / messages ──► log
//!  └─ Ctrl-C ──► SessionHandle::shutdown
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use localsignal_core::{Direction, ServiceConfig};
use localsignal_node::application::{
    event_channel, spawn_session, SessionController, SessionHandle, SessionObserver,
};
use localsignal_node::infrastructure::storage::config::{
    load_config, load_config_from, save_config, save_config_to, AppConfig,
};
use localsignal_node::infrastructure::transport::{LanTransport, LoopbackMedium};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Serverless text signals between nearby devices.
#[derive(Debug, Parser)]
#[command(
    name = "localsignal",
    about = "Advertise, discover and exchange short text signals with nearby devices",
    version
)]
struct Cli {
    /// Path of the TOML config file.  Defaults to the platform config dir.
    #[arg(long, env = "LOCALSIGNAL_CONFIG")]
    config: Option<PathBuf>,

    /// Display name announced to peers.
    #[arg(long, env = "LOCALSIGNAL_NAME")]
    name: Option<String>,

    /// Service id; only devices with the same id see each other.
    #[arg(long, env = "LOCALSIGNAL_SERVICE_ID")]
    service_id: Option<String>,

    /// UDP port used for advertising and discovery.
    #[arg(long, env = "LOCALSIGNAL_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    /// Write the effective configuration back to the config file.
    #[arg(long)]
    save_config: bool,

    /// Run two simulated devices over an in-process medium and exit.
    #[arg(long)]
    demo: bool,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(name) = &self.name {
            config.service.local_name = name.clone();
        }
        if let Some(service_id) = &self.service_id {
            config.service.service_id = service_id.clone();
        }
        if let Some(port) = self.discovery_port {
            config.network.discovery_port = port;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => load_config().context("loading config")?,
    };
    cli.apply(&mut config);

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
        )
        .init();

    if cli.save_config {
        match &cli.config {
            Some(path) => save_config_to(path, &config)
                .with_context(|| format!("saving config to {}", path.display()))?,
            None => save_config(&config).context("saving config")?,
        }
        info!("configuration saved");
    }

    if cli.demo {
        return run_demo(config.service).await;
    }

    info!(
        "LocalSignal starting as '{}' (service {}, {})",
        config.service.local_name, config.service.service_id, config.service.strategy
    );

    let lan_config = config
        .network
        .to_lan_config()
        .context("invalid [network] settings")?;
    let (events_tx, events_rx) = event_channel();
    let transport = Arc::new(LanTransport::new(lan_config, events_tx));
    info!("local endpoint id {}", transport.local_id());

    let controller = SessionController::new(config.service, transport);
    let (session, task) = spawn_session(controller, events_rx);
    spawn_observer_log(session.observer().clone());

    session
        .start_networking()
        .await
        .context("session stopped before networking started")?;

    info!("LocalSignal ready.  Type a line to signal every peer; Ctrl-C to exit.");

    // ── Input loop ────────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(text)) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        session.send_signal(text).await?;
                    }
                }
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!("failed to read stdin: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    session.shutdown().await?;
    task.await.context("session task panicked")?;
    info!("LocalSignal stopped");
    Ok(())
}

// ── Observer logging ──────────────────────────────────────────────────────────

fn spawn_observer_log(observer: SessionObserver) {
    let mut status = observer.watch_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            info!("status: {}", *status.borrow_and_update());
        }
    });

    let mut connected = observer.watch_connected_count();
    tokio::spawn(async move {
        while connected.changed().await.is_ok() {
            info!("connected devices: {}", *connected.borrow_and_update());
        }
    });

    let mut messages = observer.subscribe_messages();
    tokio::spawn(async move {
        while let Ok(message) = messages.recv().await {
            if let Direction::Inbound { from } = message.direction() {
                println!("[{from}] {}", message.text());
            }
        }
    });
}

// ── Demo mode ─────────────────────────────────────────────────────────────────

const DEMO_TIMEOUT: Duration = Duration::from_secs(5);

/// Two simulated devices find each other, connect, and exchange one signal.
async fn run_demo(service: ServiceConfig) -> anyhow::Result<()> {
    let medium = LoopbackMedium::new();

    let alice = start_demo_device(&medium, &service, "alice").await?;
    let bob = start_demo_device(&medium, &service, "bob").await?;

    for device in [&alice, &bob] {
        tokio::time::timeout(
            DEMO_TIMEOUT,
            device.observer().wait_for_connected_count(|n| n == 1),
        )
        .await
        .context("devices did not connect")?;
    }
    info!("demo: alice and bob are connected");

    alice.send_signal("hello from alice").await?;
    let received = tokio::time::timeout(
        DEMO_TIMEOUT,
        bob.observer()
            .wait_for_status(|s| matches!(s, localsignal_core::StatusText::Message(_))),
    )
    .await
    .context("signal did not arrive")?;

    if let Some(status) = received {
        println!("bob: {status}");
    }
    println!("alice: {}", alice.observer().status());

    alice.shutdown().await?;
    bob.shutdown().await?;
    Ok(())
}

async fn start_demo_device(
    medium: &Arc<LoopbackMedium>,
    service: &ServiceConfig,
    name: &str,
) -> anyhow::Result<SessionHandle> {
    let (events_tx, events_rx) = event_channel();
    let transport = Arc::new(medium.attach(events_tx).await);
    let config = ServiceConfig {
        local_name: name.to_string(),
        ..service.clone()
    };
    let (handle, _task) = spawn_session(SessionController::new(config, transport), events_rx);
    handle
        .start_networking()
        .await
        .with_context(|| format!("starting {name}"))?;
    Ok(handle)
}
