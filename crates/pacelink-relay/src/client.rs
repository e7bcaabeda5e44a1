//! Daemon connection client for the companion relay.
//!
//! This module provides the `RelayClient` which handles:
//! - Connection to the wearable daemon via Unix socket
//! - Automatic reconnection with exponential backoff
//! - Staleness filtering of telemetry frames replayed after link outages
//! - Projecting session snapshots into display updates for the UI
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, Result};
use pacelink_core::{
    Command, FailureReason, HistoricalSummary, LiveMetrics, Session, SessionId, SessionState,
    SurfacePublisher, SurfaceState,
};
use pacelink_protocol::{ProtocolVersion, RelayMessage, WearableMessage};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the relay client.
///
/// Controls connection behavior including socket path, retry logic, and
/// how often the companion surface is refreshed.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Path to the Unix socket where the daemon listens.
    pub socket_path: PathBuf,

    /// Relay identifier sent during the handshake, if any.
    pub relay_id: Option<String>,

    /// Minimum interval between surface updates pushed to the UI.
    pub surface_min_interval: Duration,

    /// Initial delay before first retry after connection failure.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub retry_multiplier: f64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/pacelink.sock"),
            relay_id: None,
            surface_min_interval: Duration::from_secs(1),
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            retry_multiplier: 2.0,
        }
    }
}

impl RelayConfig {
    /// Builds a configuration from the environment.
    ///
    /// Honors `PACELINK_SOCKET` for the socket path; everything else uses
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("PACELINK_SOCKET") {
            if !path.is_empty() {
                config.socket_path = PathBuf::from(path);
            }
        }
        config
    }
}

// ============================================================================
// Display Updates
// ============================================================================

/// Updates forwarded from the relay client to the companion UI.
#[derive(Debug, Clone)]
pub enum RelayUpdate {
    /// Handshake with the daemon completed.
    Connected {
        /// Relay identifier assigned by the daemon.
        relay_id: String,
    },

    /// The link to the daemon dropped; the client is reconnecting.
    Disconnected,

    /// A full session snapshot (state change or reconnect replay).
    Session(Box<Session>),

    /// A throttled, pre-formatted display snapshot.
    Surface(SurfaceState),

    /// The session ended with its final frozen metrics.
    Ended {
        session_id: SessionId,
        metrics: LiveMetrics,
    },

    /// The session failed mid-workout.
    Failed {
        session_id: SessionId,
        reason: FailureReason,
    },

    /// Reconciliation produced the authoritative workout summary.
    Summary(Box<HistoricalSummary>),
}

// ============================================================================
// Relay Client
// ============================================================================

/// How a single connection's message loop ended.
enum LoopEnd {
    /// The daemon went away; reconnect.
    Disconnected,
    /// Shutdown requested; do not reconnect.
    Shutdown,
}

/// What woke the message loop.
enum Wake {
    Line(std::io::Result<Option<String>>),
    Command(Option<Command>),
    SurfaceTick,
    Shutdown,
}

/// Client for communicating with the pacelink daemon.
///
/// The `RelayClient` manages the connection to the daemon, handles
/// automatic reconnection with exponential backoff, and forwards session
/// updates to the companion UI via the update channel.
///
/// # Connection Lifecycle
///
/// 1. Client attempts to connect to the Unix socket
/// 2. On success, sends a `Connect` frame and waits for `Connected`
/// 3. Reads frames in a loop, forwarding updates to the UI and relaying
///    commands from the UI to the daemon
/// 4. On disconnect, notifies the UI and retries with exponential backoff
///
/// The last session snapshot and the telemetry high-water mark survive
/// reconnects, so parked frames replayed by the daemon after an outage can
/// never roll the display backwards.
pub struct RelayClient {
    /// Configuration for connection behavior.
    config: RelayConfig,

    /// Channel to send display updates to the UI.
    update_tx: mpsc::UnboundedSender<RelayUpdate>,

    /// Channel to receive workout commands from the UI.
    /// `None` once the UI has closed its end.
    commands: Option<mpsc::UnboundedReceiver<Command>>,

    /// Cancellation token for graceful shutdown.
    cancel: CancellationToken,

    /// Last known session snapshot, patched by telemetry frames.
    current: Option<Session>,

    /// Send-time high-water mark for telemetry staleness filtering.
    high_water: Option<DateTime<Utc>>,

    /// Throttles surface updates pushed to the UI.
    publisher: SurfacePublisher,
}

impl RelayClient {
    /// Creates a new relay client.
    #[must_use]
    pub fn new(
        config: RelayConfig,
        update_tx: mpsc::UnboundedSender<RelayUpdate>,
        command_rx: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        let publisher = SurfacePublisher::new(config.surface_min_interval);
        Self {
            config,
            update_tx,
            commands: Some(command_rx),
            cancel,
            current: None,
            high_water: None,
            publisher,
        }
    }

    /// Main loop that maintains the connection to the daemon.
    ///
    /// Runs until the cancellation token is triggered or the UI closes its
    /// command channel. Handles connection, reconnection, and frame
    /// processing.
    pub async fn run(mut self) {
        info!(
            socket_path = %self.config.socket_path.display(),
            "Relay client starting"
        );

        loop {
            if self.cancel.is_cancelled() {
                info!("Relay client shutting down (cancelled)");
                return;
            }

            match self.connect_with_retry().await {
                Ok(stream) => {
                    info!("Connected to daemon");

                    match self.handle_connection(stream).await {
                        Ok(LoopEnd::Shutdown) => {
                            info!("Relay client shutting down");
                            return;
                        }
                        Ok(LoopEnd::Disconnected) => {
                            info!("Daemon connection closed");
                        }
                        Err(RelayError::VersionMismatch {
                            relay_version,
                            daemon_version,
                        }) => {
                            // Reconnecting cannot fix a version mismatch.
                            error!(
                                relay_version,
                                daemon_version, "Protocol version mismatch, giving up"
                            );
                            return;
                        }
                        Err(e) => {
                            warn!(error = %e, "Connection ended with error");
                        }
                    }

                    // Notify UI of disconnect (ignore send errors).
                    let _ = self.update_tx.send(RelayUpdate::Disconnected);
                }
                Err(e) => {
                    if !self.cancel.is_cancelled() {
                        error!(error = %e, "Failed to connect to daemon");
                    }
                }
            }

            if self.cancel.is_cancelled() {
                info!("Relay client shutting down (cancelled)");
                return;
            }
        }
    }

    /// Attempts to connect to the daemon with exponential backoff.
    ///
    /// Retries indefinitely until successful or cancelled, starting at
    /// `retry_initial_delay` and capping at `retry_max_delay`.
    async fn connect_with_retry(&self) -> Result<UnixStream> {
        let mut delay = self.config.retry_initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);

            debug!(
                attempt,
                socket_path = %self.config.socket_path.display(),
                "Attempting to connect to daemon"
            );

            if !self.config.socket_path.exists() {
                if attempt == 1 {
                    warn!(
                        socket_path = %self.config.socket_path.display(),
                        "Daemon socket not found, will retry"
                    );
                }
            } else {
                match UnixStream::connect(&self.config.socket_path).await {
                    Ok(stream) => {
                        debug!(attempt, "Connection successful");
                        return Ok(stream);
                    }
                    Err(e) => {
                        debug!(attempt, error = %e, "Connection attempt failed");
                    }
                }
            }

            tokio::select! {
                _ = sleep(delay) => {
                    let next_delay_ms =
                        (delay.as_millis() as f64 * self.config.retry_multiplier) as u64;
                    delay = Duration::from_millis(next_delay_ms).min(self.config.retry_max_delay);
                }
                _ = self.cancel.cancelled() => {
                    return Err(RelayError::DaemonConnection("cancelled".to_string()));
                }
            }
        }
    }

    /// Handles an established connection to the daemon.
    ///
    /// Performs the handshake, then reads frames until disconnect or
    /// shutdown.
    async fn handle_connection(&mut self, stream: UnixStream) -> Result<LoopEnd> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader).lines();

        // Handshake: send connect, expect connected.
        let connect = RelayMessage::connect(self.config.relay_id.clone());
        send_frame(&mut writer, &connect).await?;

        let line = reader.next_line().await?.ok_or_else(|| {
            RelayError::DaemonConnection("daemon closed during handshake".to_string())
        })?;
        let response: WearableMessage = serde_json::from_str(line.trim())?;
        match response {
            WearableMessage::Connected {
                protocol_version,
                relay_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(RelayError::VersionMismatch {
                        relay_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    });
                }
                info!(
                    relay_id = %relay_id,
                    protocol_version = %protocol_version,
                    "Handshake complete"
                );
                let _ = self.update_tx.send(RelayUpdate::Connected { relay_id });
            }
            WearableMessage::Rejected {
                reason,
                protocol_version,
            } => {
                warn!(reason = %reason, "Daemon rejected connection");
                return Err(RelayError::VersionMismatch {
                    relay_version: ProtocolVersion::CURRENT.to_string(),
                    daemon_version: protocol_version.to_string(),
                });
            }
            other => {
                return Err(RelayError::Protocol(format!(
                    "Unexpected response to connect: {other:?}"
                )));
            }
        }

        self.message_loop(&mut reader, &mut writer).await
    }

    /// Main frame loop for one connection.
    ///
    /// Multiplexes daemon frames, UI commands, and the surface release
    /// timer. Parked surface states are flushed on the timer so the display
    /// converges even when telemetry stops arriving.
    async fn message_loop<R, W>(
        &mut self,
        reader: &mut tokio::io::Lines<R>,
        writer: &mut W,
    ) -> Result<LoopEnd>
    where
        R: AsyncBufReadExt + Unpin,
        W: AsyncWriteExt + Unpin,
    {
        let mut surface_timer = tokio::time::interval(self.config.surface_min_interval);
        surface_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                _ = self.cancel.cancelled() => Wake::Shutdown,
                line = reader.next_line() => Wake::Line(line),
                command = next_command(&mut self.commands) => Wake::Command(command),
                _ = surface_timer.tick() => Wake::SurfaceTick,
            };

            match wake {
                Wake::Shutdown => {
                    let _ = send_frame(writer, &RelayMessage::disconnect()).await;
                    return Ok(LoopEnd::Shutdown);
                }
                Wake::Line(Ok(Some(line))) => {
                    if let Err(e) = self.handle_frame(line.trim()) {
                        // A single bad frame is not fatal.
                        warn!(error = %e, line = %line.trim(), "Failed to handle frame");
                    }
                }
                Wake::Line(Ok(None)) => {
                    return Ok(LoopEnd::Disconnected);
                }
                Wake::Line(Err(e)) => {
                    return Err(RelayError::Io(e));
                }
                Wake::Command(Some(command)) => {
                    debug!(?command, "Relaying command to daemon");
                    let data = serde_json::to_value(&command)?;
                    if let Err(e) = send_frame(writer, &RelayMessage::command(data)).await {
                        warn!(error = %e, "Failed to send command");
                        return Err(e);
                    }
                }
                Wake::Command(None) => {
                    // UI closed its command channel.
                    debug!("Command channel closed");
                    let _ = send_frame(writer, &RelayMessage::disconnect()).await;
                    return Ok(LoopEnd::Shutdown);
                }
                Wake::SurfaceTick => {
                    if let Some(state) = self.publisher.poll_pending(Instant::now()) {
                        let _ = self.update_tx.send(RelayUpdate::Surface(state));
                    }
                }
            }
        }
    }

    /// Handles a single frame from the daemon.
    fn handle_frame(&mut self, line: &str) -> Result<()> {
        let message: WearableMessage = serde_json::from_str(line)?;

        match message {
            WearableMessage::SessionUpdated { session } => {
                debug!(session_id = %session.id, state = session.state.label(), "Session updated");
                self.current = Some((*session).clone());
                self.offer_surface();
                let _ = self.update_tx.send(RelayUpdate::Session(session));
            }
            WearableMessage::Telemetry { update } => {
                if !update.is_newer_than(self.high_water) {
                    debug!(
                        session_id = %update.session_id,
                        sent_at = %update.sent_at,
                        "Dropping stale telemetry"
                    );
                    return Ok(());
                }
                self.high_water = Some(update.sent_at);
                if let Some(session) = self.current.as_mut() {
                    if session.id == update.session_id {
                        session.live_metrics = update.metrics;
                    }
                }
                self.offer_surface();
            }
            WearableMessage::SessionEnded {
                session_id,
                metrics,
            } => {
                debug!(session_id = %session_id, "Session ended");
                if let Some(session) = self.current.as_mut() {
                    if session.id == session_id {
                        session.state = SessionState::Ended;
                        session.live_metrics = metrics.clone();
                    }
                }
                self.offer_surface();
                let _ = self.update_tx.send(RelayUpdate::Ended {
                    session_id,
                    metrics,
                });
            }
            WearableMessage::SessionFailed { session_id, reason } => {
                warn!(session_id = %session_id, ?reason, "Session failed");
                if let Some(session) = self.current.as_mut() {
                    if session.id == session_id {
                        session.state = SessionState::Failed { reason };
                    }
                }
                self.offer_surface();
                let _ = self
                    .update_tx
                    .send(RelayUpdate::Failed { session_id, reason });
            }
            WearableMessage::Reconciled { summary } => {
                debug!(session_id = %summary.session_id, "Workout reconciled");
                let _ = self.update_tx.send(RelayUpdate::Summary(summary));
            }
            WearableMessage::ReconcileFailed { session_id, reason } => {
                warn!(session_id = %session_id, reason = %reason, "Reconciliation failed");
            }
            WearableMessage::Pong { seq } => {
                debug!(seq, "Received pong");
            }
            WearableMessage::Error { message } => {
                warn!(error_message = %message, "Received error from daemon");
            }
            WearableMessage::Connected { .. } | WearableMessage::Rejected { .. } => {
                warn!("Received unexpected handshake frame after connection");
            }
        }

        Ok(())
    }

    /// Offers the current session to the surface publisher.
    fn offer_surface(&mut self) {
        let Some(session) = self.current.as_ref() else {
            return;
        };
        if let Some(state) = self.publisher.offer(session, Instant::now()) {
            let _ = self.update_tx.send(RelayUpdate::Surface(state));
        }
    }
}

/// Receives the next UI command, or parks forever once the channel closed.
///
/// Parking keeps the select loop from spinning on a closed channel; the
/// close itself is reported once as `None`.
async fn next_command(commands: &mut Option<mpsc::UnboundedReceiver<Command>>) -> Option<Command> {
    match commands {
        Some(rx) => {
            let command = rx.recv().await;
            if command.is_none() {
                *commands = None;
            }
            command
        }
        None => std::future::pending().await,
    }
}

/// Sends a frame to the daemon as newline-delimited JSON.
async fn send_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, message: &RelayMessage) -> Result<()> {
    let json = serde_json::to_string(message)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
