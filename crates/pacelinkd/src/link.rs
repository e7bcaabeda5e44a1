//! Unix socket server for the companion relay connection.
//!
//! The link:
//! - Listens on a Unix socket for the companion relay
//! - Serves one relay at a time (the wearable has one paired companion)
//! - Flips link reachability for the delivery worker
//! - Supports graceful shutdown via CancellationToken
//!
//! Inbound command frames are parsed and forwarded to the controller;
//! malformed frames get an error reply and the connection stays up.
//! Outbound frames come from the delivery worker, which already collapsed
//! telemetry to the latest value while the link was away.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pacelink_core::DomainError;
use pacelink_protocol::{
    parse_command, ProtocolVersion, RelayMessage, RelayPayload, WearableMessage,
};

use crate::controller::ControllerHandle;

/// Unix socket server for the companion link.
pub struct LinkServer {
    /// Path to the Unix socket
    socket_path: PathBuf,

    /// Handle to the session controller
    controller: ControllerHandle,

    /// Reachability flag observed by the delivery worker
    reachable_tx: watch::Sender<bool>,

    /// Outbound frames from the delivery worker
    frames_rx: mpsc::Receiver<WearableMessage>,

    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,

    /// Connection counter for generating relay IDs
    connection_counter: AtomicU64,
}

impl LinkServer {
    /// Creates a new link server.
    pub fn new(
        socket_path: impl Into<PathBuf>,
        controller: ControllerHandle,
        reachable_tx: watch::Sender<bool>,
        frames_rx: mpsc::Receiver<WearableMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            controller,
            reachable_tx,
            frames_rx,
            cancel,
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the server.
    ///
    /// Accepts relay connections until the cancellation token is
    /// triggered. Connections are served one at a time; a relay that
    /// reconnects after an outage gets the parked latest state on arrival.
    pub async fn run(mut self) -> Result<(), LinkError> {
        // Remove existing socket file if present
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| LinkError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;
        }

        // Create parent directory if needed
        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| LinkError::SocketSetup {
                    path: self.socket_path.clone(),
                    error: e.to_string(),
                })?;
            }
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| LinkError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;

        info!(socket = %self.socket_path.display(), "Companion link listening");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Link shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.serve_relay(stream, conn_num).await;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Keep listening for the next attempt
                        }
                    }
                }
            }
        }

        self.cleanup();
        Ok(())
    }

    /// Serves one relay connection to completion.
    async fn serve_relay(&mut self, stream: UnixStream, connection_number: u64) {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // Handshake: first frame must be a compatible Connect.
        let relay_id = match self.handshake(&mut lines, &mut writer, connection_number).await {
            Some(id) => id,
            None => return,
        };

        info!(relay_id = %relay_id, "Companion relay connected");
        let _ = self.reachable_tx.send(true);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                frame = self.frames_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if write_frame(&mut writer, &frame).await.is_err() {
                                warn!(relay_id = %relay_id, "Write failed, dropping connection");
                                break;
                            }
                        }
                        None => {
                            debug!("Delivery channel closed");
                            break;
                        }
                    }
                }

                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if !self.handle_line(&line, &mut writer).await {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!(relay_id = %relay_id, "Relay disconnected");
                            break;
                        }
                        Err(e) => {
                            warn!(relay_id = %relay_id, error = %e, "Read failed");
                            break;
                        }
                    }
                }
            }
        }

        let _ = self.reachable_tx.send(false);
        info!(relay_id = %relay_id, "Companion relay gone");
    }

    /// Performs the connection handshake.
    ///
    /// Returns the assigned relay ID, or None when the handshake failed
    /// and the connection should be dropped.
    async fn handshake(
        &self,
        lines: &mut tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
        writer: &mut tokio::net::unix::OwnedWriteHalf,
        connection_number: u64,
    ) -> Option<String> {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "Handshake read failed");
                return None;
            }
        };

        let message: RelayMessage = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "Malformed handshake frame");
                let _ = write_frame(writer, &WearableMessage::rejected("malformed handshake")).await;
                return None;
            }
        };

        if !message
            .protocol_version
            .is_compatible_with(&ProtocolVersion::CURRENT)
        {
            warn!(
                relay_version = %message.protocol_version,
                daemon_version = %ProtocolVersion::CURRENT,
                "Rejecting incompatible relay"
            );
            let _ = write_frame(writer, &WearableMessage::rejected("incompatible protocol version"))
                .await;
            return None;
        }

        let relay_id = match message.payload {
            RelayPayload::Connect { relay_id } => {
                relay_id.unwrap_or_else(|| format!("relay-{connection_number}"))
            }
            _ => {
                let _ = write_frame(writer, &WearableMessage::rejected("expected connect")).await;
                return None;
            }
        };

        if write_frame(writer, &WearableMessage::connected(relay_id.clone()))
            .await
            .is_err()
        {
            return None;
        }

        Some(relay_id)
    }

    /// Handles one inbound frame. Returns false when the connection
    /// should close.
    async fn handle_line(
        &self,
        line: &str,
        writer: &mut tokio::net::unix::OwnedWriteHalf,
    ) -> bool {
        let message: RelayMessage = match serde_json::from_str(line) {
            Ok(m) => m,
            Err(e) => {
                // Malformed frames are reported, not fatal.
                debug!(error = %e, "Malformed frame from relay");
                let _ = write_frame(writer, &WearableMessage::error("malformed frame")).await;
                return true;
            }
        };

        match message.payload {
            RelayPayload::Command { data } => match parse_command(&data) {
                Ok(command) => {
                    if let Err(e) = self.controller.apply(command).await {
                        warn!(error = %e, "Controller unavailable");
                        let _ =
                            write_frame(writer, &WearableMessage::error("controller unavailable"))
                                .await;
                    }
                }
                Err(e) => {
                    // Rejected at the boundary; the session is unaffected.
                    let rejection = DomainError::from(e);
                    debug!(error = %rejection, "Rejected command");
                    let _ =
                        write_frame(writer, &WearableMessage::error(&rejection.to_string())).await;
                }
            },

            RelayPayload::Ping { seq } => {
                if write_frame(writer, &WearableMessage::pong(seq)).await.is_err() {
                    return false;
                }
            }

            RelayPayload::Disconnect => {
                debug!("Relay requested disconnect");
                return false;
            }

            RelayPayload::Connect { .. } => {
                // Already connected; re-acknowledge is harmless but noisy.
                debug!("Duplicate connect frame ignored");
            }
        }

        true
    }

    /// Performs cleanup on shutdown.
    fn cleanup(&self) {
        let _ = self.reachable_tx.send(false);

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Link cleanup complete");
    }
}

/// Writes one JSON-lines frame.
async fn write_frame(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    message: &WearableMessage,
) -> Result<(), std::io::Error> {
    let json = serde_json::to_string(message).map_err(std::io::Error::other)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Errors that can occur in link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },
}
