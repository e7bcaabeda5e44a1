//! Pacelink Daemon - Wearable-side workout session controller
//!
//! This binary runs on the wearable side of the link, owning the workout
//! session and serving the companion relay over a Unix socket.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! pacelinkd
//!
//! # Start with a custom socket path
//! pacelinkd --socket /run/pacelink.sock
//! PACELINK_SOCKET=/run/pacelink.sock pacelinkd
//!
//! # Enable debug logging
//! RUST_LOG=pacelinkd=debug pacelinkd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pacelinkd::config::DaemonConfig;
use pacelinkd::controller::spawn_controller;
use pacelinkd::delivery::spawn_delivery;
use pacelinkd::link::LinkServer;
use pacelinkd::source::{SimulatedSource, SimulatedStore};

/// Outbound frame buffer between delivery worker and link writer.
const FRAME_BUFFER: usize = 64;

/// How long the simulated store takes to commit a workout record.
const STORE_COMMIT_DELAY: Duration = Duration::from_secs(2);

/// Pacelink daemon - wearable workout session controller
#[derive(Parser, Debug)]
#[command(name = "pacelinkd", version, about)]
struct Args {
    /// Socket path for the companion link
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Minimum milliseconds between full telemetry pushes
    #[arg(long)]
    tick_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pacelinkd=info".parse()?)
                .add_directive("pacelink_core=info".parse()?)
                .add_directive("pacelink_protocol=info".parse()?),
        )
        .init();

    let mut config = DaemonConfig::from_env();
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    if let Some(tick_ms) = args.tick_ms {
        config.tick_interval = Duration::from_millis(tick_ms.max(1));
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        socket = %config.socket_path.display(),
        "Pacelink daemon starting"
    );

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    // Link plumbing: delivery worker parks frames while unreachable.
    let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
    let (reachable_tx, reachable_rx) = watch::channel(false);
    let delivery = spawn_delivery(frames_tx, reachable_rx);

    // Capture subsystem and health store (simulated).
    let store = SimulatedStore::new(STORE_COMMIT_DELAY);
    let source = SimulatedSource::new(config.tick_interval, Some(store.clone()));

    let (controller, mut surface_rx) = spawn_controller(
        source,
        store,
        delivery,
        config.clone(),
        cancel.clone(),
    );
    info!("Session controller started");

    // Log glanceable-surface pushes; the surface itself is the platform's.
    let surface_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = surface_cancel.cancelled() => break,
                changed = surface_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = surface_rx.borrow_and_update().clone();
                    info!(
                        state = %state.state,
                        elapsed = %state.elapsed,
                        heart_rate = %state.heart_rate,
                        "Surface updated"
                    );
                }
            }
        }
    });

    // Create and run the link server
    let server = LinkServer::new(
        &config.socket_path,
        controller,
        reachable_tx,
        frames_rx,
        cancel,
    );

    if let Err(e) = server.run().await {
        error!(error = %e, "Link server error");
        return Err(e.into());
    }

    info!("Pacelink daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
