//! Protocol message types for the wearable/companion link.

use crate::version::ProtocolVersion;
use chrono::{DateTime, Utc};
use pacelink_core::{FailureReason, HistoricalSummary, LiveMetrics, Session, SessionId};
use serde::{Deserialize, Serialize};

/// Message payloads sent by the companion relay to the wearable daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayPayload {
    /// Relay handshake/connection request
    Connect {
        /// Relay identifier (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        relay_id: Option<String>,
    },

    /// A workout command from the companion UI
    Command {
        /// The raw command JSON (to be parsed)
        data: serde_json::Value,
    },

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Relay disconnecting gracefully
    Disconnect,
}

/// Messages sent from the companion relay to the wearable daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub payload: RelayPayload,
}

impl RelayMessage {
    /// Creates a new relay message with current protocol version.
    pub fn new(payload: RelayPayload) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            payload,
        }
    }

    /// Creates a connect message.
    pub fn connect(relay_id: Option<String>) -> Self {
        Self::new(RelayPayload::Connect { relay_id })
    }

    /// Creates a command message.
    pub fn command(data: serde_json::Value) -> Self {
        Self::new(RelayPayload::Command { data })
    }

    /// Creates a ping message.
    pub fn ping(seq: u64) -> Self {
        Self::new(RelayPayload::Ping { seq })
    }

    /// Creates a disconnect message.
    pub fn disconnect() -> Self {
        Self::new(RelayPayload::Disconnect)
    }
}

/// A live metrics push with its send time.
///
/// `sent_at` is the wearable-side send timestamp. Receivers keep a
/// high-water mark and drop updates that are not strictly newer, so stale
/// frames replayed after a link outage can never overwrite fresher state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryUpdate {
    pub session_id: SessionId,
    pub metrics: LiveMetrics,
    pub sent_at: DateTime<Utc>,
}

impl TelemetryUpdate {
    /// Returns true when this update is strictly newer than the receiver's
    /// high-water mark.
    pub fn is_newer_than(&self, high_water: Option<DateTime<Utc>>) -> bool {
        high_water.map_or(true, |hw| self.sent_at > hw)
    }
}

/// Messages sent from the wearable daemon to the companion relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WearableMessage {
    /// Connection accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned relay ID
        relay_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Daemon's protocol version (for relay to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Session was created or its state changed
    SessionUpdated {
        /// The updated session snapshot
        session: Box<Session>,
    },

    /// Live metrics push for the active session
    Telemetry {
        /// The update, carrying its send time for staleness filtering
        update: TelemetryUpdate,
    },

    /// Session ended; final frozen metrics
    SessionEnded {
        session_id: SessionId,
        metrics: LiveMetrics,
    },

    /// Session failed; metrics frozen at last known values
    SessionFailed {
        session_id: SessionId,
        reason: FailureReason,
    },

    /// Reconciliation produced the authoritative summary
    Reconciled {
        /// The post-hoc workout summary
        summary: Box<HistoricalSummary>,
    },

    /// Reconciliation gave up (retries exhausted or authorization revoked)
    ReconcileFailed {
        session_id: SessionId,
        reason: String,
    },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Error response
    Error {
        /// Error message
        message: String,
    },
}

impl WearableMessage {
    /// Creates a connected response.
    pub fn connected(relay_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            relay_id,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    /// Creates a session updated notification.
    pub fn session_updated(session: Session) -> Self {
        Self::SessionUpdated {
            session: Box::new(session),
        }
    }

    /// Creates a telemetry push.
    pub fn telemetry(session_id: SessionId, metrics: LiveMetrics, sent_at: DateTime<Utc>) -> Self {
        Self::Telemetry {
            update: TelemetryUpdate {
                session_id,
                metrics,
                sent_at,
            },
        }
    }

    /// Creates a reconciled notification.
    pub fn reconciled(summary: HistoricalSummary) -> Self {
        Self::Reconciled {
            summary: Box::new(summary),
        }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_relay_message_serialization() {
        let msg = RelayMessage::ping(42);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains("\"seq\":42"));
    }

    #[test]
    fn test_wearable_message_serialization() {
        let msg = WearableMessage::connected("relay-123".to_string());
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
        assert!(json.contains("\"relay_id\":\"relay-123\""));
    }

    #[test]
    fn test_command_roundtrip() {
        let original = RelayMessage::command(serde_json::json!({
            "command": "start",
            "activity_kind": "running"
        }));
        let json = serde_json::to_string(&original).unwrap();
        let parsed: RelayMessage = serde_json::from_str(&json).unwrap();

        match parsed.payload {
            RelayPayload::Command { data } => {
                assert_eq!(data["command"], "start");
            }
            _ => panic!("Expected Command payload"),
        }
    }

    #[test]
    fn test_telemetry_update_staleness() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 5).unwrap();
        let update = TelemetryUpdate {
            session_id: SessionId::new("ws-1"),
            metrics: LiveMetrics::default(),
            sent_at: t0,
        };

        assert!(update.is_newer_than(None));
        assert!(!update.is_newer_than(Some(t0)));
        assert!(!update.is_newer_than(Some(t1)));
    }
}
