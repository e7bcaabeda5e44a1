//! End-to-end tests over the Unix socket link.
//!
//! A raw client plays the companion relay: handshake, commands, and
//! reading the frames the daemon pushes back.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use pacelink_protocol::{ProtocolVersion, RelayMessage, WearableMessage};
use pacelinkd::config::DaemonConfig;
use pacelinkd::controller::spawn_controller;
use pacelinkd::delivery::spawn_delivery;
use pacelinkd::link::LinkServer;
use pacelinkd::reconciler::ReconcilePolicy;
use pacelinkd::source::{SimulatedSource, SimulatedStore};

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

struct TestDaemon {
    socket_path: PathBuf,
    _cancel_guard: tokio_util::sync::DropGuard,
    _dir: tempfile::TempDir,
}

async fn start_daemon() -> TestDaemon {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket_path = dir.path().join("pacelink.sock");

    let mut config = DaemonConfig::default();
    config.socket_path = socket_path.clone();
    config.tick_interval = Duration::from_millis(20);
    config.surface_min_interval = Duration::from_millis(20);
    config.reconcile = ReconcilePolicy {
        max_attempts: 20,
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
    };

    let cancel = CancellationToken::new();
    let (frames_tx, frames_rx) = mpsc::channel(64);
    let (reachable_tx, reachable_rx) = watch::channel(false);
    let delivery = spawn_delivery(frames_tx, reachable_rx);

    let store = SimulatedStore::new(Duration::from_millis(50));
    let source = SimulatedSource::new(Duration::from_millis(20), Some(store.clone()));
    let (controller, _surface_rx) =
        spawn_controller(source, store, delivery, config.clone(), cancel.clone());

    let server = LinkServer::new(
        &socket_path,
        controller,
        reachable_tx,
        frames_rx,
        cancel.clone(),
    );
    tokio::spawn(server.run());

    // Wait for the socket to appear.
    for _ in 0..100 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    TestDaemon {
        socket_path,
        _cancel_guard: cancel.drop_guard(),
        _dir: dir,
    }
}

struct RelayClient {
    reader: tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl RelayClient {
    async fn connect(socket_path: &PathBuf) -> Self {
        let stream = UnixStream::connect(socket_path).await.expect("connect");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, message: &RelayMessage) {
        let json = serde_json::to_string(message).expect("serialize");
        self.writer.write_all(json.as_bytes()).await.expect("write");
        self.writer.write_all(b"\n").await.expect("newline");
        self.writer.flush().await.expect("flush");
    }

    async fn recv(&mut self) -> WearableMessage {
        let line = tokio::time::timeout(FRAME_TIMEOUT, self.reader.next_line())
            .await
            .expect("frame within timeout")
            .expect("read ok")
            .expect("connection open");
        serde_json::from_str(&line).expect("valid frame")
    }

    /// Reads frames until one matches the predicate.
    async fn recv_until<F>(&mut self, mut pred: F) -> WearableMessage
    where
        F: FnMut(&WearableMessage) -> bool,
    {
        loop {
            let frame = self.recv().await;
            if pred(&frame) {
                return frame;
            }
        }
    }

    async fn handshake(&mut self) -> String {
        self.send(&RelayMessage::connect(Some("test-relay".to_string())))
            .await;
        match self.recv().await {
            WearableMessage::Connected { relay_id, .. } => relay_id,
            other => panic!("Expected connected, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_handshake_assigns_relay_id() {
    let daemon = start_daemon().await;
    let mut client = RelayClient::connect(&daemon.socket_path).await;

    let relay_id = client.handshake().await;
    assert_eq!(relay_id, "test-relay");
}

#[tokio::test]
async fn test_incompatible_version_rejected() {
    let daemon = start_daemon().await;
    let mut client = RelayClient::connect(&daemon.socket_path).await;

    let mut message = RelayMessage::connect(None);
    message.protocol_version = ProtocolVersion::new(99, 0);
    client.send(&message).await;

    match client.recv().await {
        WearableMessage::Rejected {
            protocol_version, ..
        } => {
            assert_eq!(protocol_version, ProtocolVersion::CURRENT);
        }
        other => panic!("Expected rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ping_pong() {
    let daemon = start_daemon().await;
    let mut client = RelayClient::connect(&daemon.socket_path).await;
    client.handshake().await;

    client.send(&RelayMessage::ping(7)).await;
    let frame = client
        .recv_until(|f| matches!(f, WearableMessage::Pong { .. }))
        .await;
    assert!(matches!(frame, WearableMessage::Pong { seq: 7 }));
}

#[tokio::test]
async fn test_workout_over_the_wire() {
    let daemon = start_daemon().await;
    let mut client = RelayClient::connect(&daemon.socket_path).await;
    client.handshake().await;

    client
        .send(&RelayMessage::command(serde_json::json!({
            "command": "start",
            "activity_kind": "running"
        })))
        .await;

    // Telemetry starts flowing.
    let frame = client
        .recv_until(|f| matches!(f, WearableMessage::Telemetry { .. }))
        .await;
    let session_id = match frame {
        WearableMessage::Telemetry { update } => update.session_id,
        _ => unreachable!(),
    };

    client
        .send(&RelayMessage::command(serde_json::json!({
            "command": "stop"
        })))
        .await;

    let ended = client
        .recv_until(|f| matches!(f, WearableMessage::SessionEnded { .. }))
        .await;
    match ended {
        WearableMessage::SessionEnded { session_id: id, .. } => assert_eq!(id, session_id),
        _ => unreachable!(),
    }

    let reconciled = client
        .recv_until(|f| matches!(f, WearableMessage::Reconciled { .. }))
        .await;
    match reconciled {
        WearableMessage::Reconciled { summary } => {
            assert_eq!(summary.session_id, session_id);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_malformed_command_is_not_fatal() {
    let daemon = start_daemon().await;
    let mut client = RelayClient::connect(&daemon.socket_path).await;
    client.handshake().await;

    client
        .send(&RelayMessage::command(serde_json::json!({
            "command": "teleport"
        })))
        .await;
    let frame = client
        .recv_until(|f| matches!(f, WearableMessage::Error { .. }))
        .await;
    match frame {
        WearableMessage::Error { message } => {
            assert!(message.contains("Invalid argument"));
            assert!(message.contains("teleport"));
        }
        _ => unreachable!(),
    }

    // Connection survives: ping still answered.
    client.send(&RelayMessage::ping(1)).await;
    let frame = client
        .recv_until(|f| matches!(f, WearableMessage::Pong { .. }))
        .await;
    assert!(matches!(frame, WearableMessage::Pong { seq: 1 }));
}

#[tokio::test]
async fn test_unknown_activity_kind_names_the_field() {
    let daemon = start_daemon().await;
    let mut client = RelayClient::connect(&daemon.socket_path).await;
    client.handshake().await;

    client
        .send(&RelayMessage::command(serde_json::json!({
            "command": "start",
            "activity_kind": "swimming"
        })))
        .await;
    let frame = client
        .recv_until(|f| matches!(f, WearableMessage::Error { .. }))
        .await;
    match frame {
        WearableMessage::Error { message } => {
            assert!(message.contains("activity_kind"));
            assert!(message.contains("swimming"));
        }
        _ => unreachable!(),
    }

    // No session was created by the rejected start.
    client.send(&RelayMessage::ping(2)).await;
    let frame = client
        .recv_until(|f| matches!(f, WearableMessage::Pong { .. }))
        .await;
    assert!(matches!(frame, WearableMessage::Pong { seq: 2 }));
}

#[tokio::test]
async fn test_reconnect_receives_parked_state() {
    let daemon = start_daemon().await;

    // First connection starts a workout, then drops without stopping it.
    {
        let mut client = RelayClient::connect(&daemon.socket_path).await;
        client.handshake().await;
        client
            .send(&RelayMessage::command(serde_json::json!({
                "command": "start"
            })))
            .await;
        client
            .recv_until(|f| matches!(f, WearableMessage::Telemetry { .. }))
            .await;
    }

    // Give the daemon a moment to notice the hangup and park updates.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A fresh connection gets the parked latest telemetry.
    let mut client = RelayClient::connect(&daemon.socket_path).await;
    client.handshake().await;
    let frame = client
        .recv_until(|f| matches!(f, WearableMessage::Telemetry { .. }))
        .await;
    assert!(matches!(frame, WearableMessage::Telemetry { .. }));
}
