//! Pacelink Relay - Companion-side CLI for the wearable daemon
//!
//! Connects to the pacelinkd Unix socket and drives workouts from the
//! companion side: start, stop, or watch live updates.
//!
//! # Usage
//!
//! ```bash
//! # Start a workout
//! pacelink-relay start --activity running
//!
//! # Stop the current workout and wait for the reconciled summary
//! pacelink-relay stop
//!
//! # Stream live updates until Ctrl+C
//! pacelink-relay watch
//!
//! # Custom socket path
//! pacelink-relay --socket /run/pacelink.sock watch
//! PACELINK_SOCKET=/run/pacelink.sock pacelink-relay watch
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pacelink_core::{ActivityKind, Command, SessionState};
use pacelink_relay::{RelayClient, RelayConfig, RelayUpdate};

/// How long to wait for the daemon to acknowledge a command.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the reconciled summary after a stop.
const SUMMARY_TIMEOUT: Duration = Duration::from_secs(30);

/// Pacelink relay - companion workout controller
#[derive(Parser, Debug)]
#[command(name = "pacelink-relay", version, about)]
struct Args {
    /// Socket path of the wearable daemon
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Start a workout
    Start {
        /// Activity kind (running, walking, cycling, strength, other)
        #[arg(long, default_value = "running")]
        activity: String,
    },
    /// Stop the current workout and wait for the summary
    Stop,
    /// Stream live updates until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep stdout clean for CLI output; logs go to stderr at warn by default.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let mut config = RelayConfig::from_env();
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }

    let cancel = CancellationToken::new();
    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let client = RelayClient::new(config, update_tx, command_rx, cancel.clone());
    let client_task = tokio::spawn(client.run());

    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let result = match args.action {
        Action::Start { activity } => run_start(&activity, &command_tx, &mut update_rx).await,
        Action::Stop => run_stop(&command_tx, &mut update_rx).await,
        Action::Watch => run_watch(&cancel, &mut update_rx).await,
    };

    cancel.cancel();
    drop(command_tx);
    let _ = client_task.await;
    result
}

/// Waits for the next update from the client.
async fn next_update(updates: &mut mpsc::UnboundedReceiver<RelayUpdate>) -> Result<RelayUpdate> {
    updates
        .recv()
        .await
        .context("relay client stopped unexpectedly")
}

/// Waits until the handshake with the daemon completes.
async fn wait_connected(updates: &mut mpsc::UnboundedReceiver<RelayUpdate>) -> Result<()> {
    loop {
        if let RelayUpdate::Connected { relay_id } = next_update(updates).await? {
            eprintln!("Connected to daemon as {relay_id}");
            return Ok(());
        }
    }
}

async fn run_start(
    activity: &str,
    commands: &mpsc::UnboundedSender<Command>,
    updates: &mut mpsc::UnboundedReceiver<RelayUpdate>,
) -> Result<()> {
    let Some(activity_kind) = ActivityKind::from_label(activity) else {
        bail!("Unknown activity kind: {activity}");
    };

    wait_connected(updates).await?;
    commands
        .send(Command::Start { activity_kind })
        .context("relay client stopped unexpectedly")?;

    let ack = tokio::time::timeout(ACK_TIMEOUT, async {
        loop {
            match next_update(updates).await? {
                RelayUpdate::Session(session) => return Ok::<_, anyhow::Error>(session),
                RelayUpdate::Failed { reason, .. } => {
                    bail!("Workout failed to start: {reason}");
                }
                _ => {}
            }
        }
    })
    .await;

    match ack {
        Ok(session) => {
            let session = session?;
            match session.state {
                SessionState::Failed { reason } => bail!("Workout failed to start: {reason}"),
                _ => println!(
                    "Workout {} ({}) is {}",
                    session.id.short(),
                    session.activity_kind,
                    session.state
                ),
            }
        }
        Err(_) => {
            println!("No state change observed; a workout may already be in progress");
        }
    }
    Ok(())
}

async fn run_stop(
    commands: &mpsc::UnboundedSender<Command>,
    updates: &mut mpsc::UnboundedReceiver<RelayUpdate>,
) -> Result<()> {
    wait_connected(updates).await?;
    commands
        .send(Command::Stop)
        .context("relay client stopped unexpectedly")?;

    let ended = tokio::time::timeout(ACK_TIMEOUT, async {
        loop {
            if let RelayUpdate::Ended { metrics, .. } = next_update(updates).await? {
                return Ok::<_, anyhow::Error>(metrics);
            }
        }
    })
    .await;

    let Ok(metrics) = ended else {
        println!("No workout ended; there may be none in progress");
        return Ok(());
    };
    let metrics = metrics?;
    println!(
        "Workout ended: {} / {} / {}",
        metrics.format_elapsed(),
        metrics.format_distance(),
        metrics.format_pace()
    );

    // The health store commits asynchronously; wait for the reconciled
    // summary, but do not block forever.
    let summary = tokio::time::timeout(SUMMARY_TIMEOUT, async {
        loop {
            if let RelayUpdate::Summary(summary) = next_update(updates).await? {
                return Ok::<_, anyhow::Error>(summary);
            }
        }
    })
    .await;

    match summary {
        Ok(summary) => {
            let summary = summary?;
            println!(
                "Summary: {:.2} km in {}, {} paused, {} route points",
                summary.distance_m / 1000.0,
                fmt_duration(summary.elapsed),
                fmt_duration(summary.paused),
                summary.route.len()
            );
        }
        Err(_) => {
            println!("Summary not yet available");
        }
    }
    Ok(())
}

async fn run_watch(
    cancel: &CancellationToken,
    updates: &mut mpsc::UnboundedReceiver<RelayUpdate>,
) -> Result<()> {
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            update = updates.recv() => match update {
                Some(update) => update,
                None => return Ok(()),
            },
        };

        match update {
            RelayUpdate::Connected { relay_id } => {
                println!("connected as {relay_id}");
            }
            RelayUpdate::Disconnected => {
                println!("disconnected, retrying...");
            }
            RelayUpdate::Session(session) => {
                println!("session {} {}", session.id.short(), session.state);
            }
            RelayUpdate::Surface(state) => {
                println!(
                    "{:<8} {:>8} {:>9} {:>10} {:>8}",
                    state.state, state.elapsed, state.distance, state.pace, state.heart_rate
                );
            }
            RelayUpdate::Ended { metrics, .. } => {
                println!(
                    "ended: {} / {} / {}",
                    metrics.format_elapsed(),
                    metrics.format_distance(),
                    metrics.format_pace()
                );
            }
            RelayUpdate::Failed { reason, .. } => {
                println!("failed: {reason}");
            }
            RelayUpdate::Summary(summary) => {
                println!(
                    "summary: {:.2} km in {}, {} paused",
                    summary.distance_m / 1000.0,
                    fmt_duration(summary.elapsed),
                    fmt_duration(summary.paused)
                );
            }
        }
    }
}

/// Formats a duration as "m:ss" or "h:mm:ss".
fn fmt_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
