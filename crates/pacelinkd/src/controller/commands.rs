//! Controller actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the
//! `ControllerActor`:
//! - `ControllerCommand`: Commands sent to the actor
//! - `ControllerError`: Errors that can occur during controller operations
//! - `SessionEvent`: Events published by the controller for subscribers
//!
//! All types are designed for async message passing and follow the
//! panic-free policy.

use pacelink_core::{
    Command, FailureReason, HistoricalSummary, LiveMetrics, Session, SessionId, SessionState,
};
use pacelink_protocol::TelemetryUpdate;
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// Controller Commands
// ============================================================================

/// Commands sent to the controller actor.
///
/// Each request-response command uses a oneshot channel for the response.
#[derive(Debug)]
pub enum ControllerCommand {
    /// Apply a workout command (start/stop) to the session.
    ///
    /// Idempotent no-ops (start while active, stop while idle) respond
    /// `Ok` with the unchanged state.
    Apply {
        /// The parsed domain command
        command: Command,
        /// Channel to send the resulting lifecycle state
        respond_to: oneshot::Sender<Result<SessionState, ControllerError>>,
    },

    /// Get a snapshot of the current session.
    ///
    /// Responds `None` when no workout attempt exists.
    Snapshot {
        /// Channel to send the snapshot
        respond_to: oneshot::Sender<Option<Session>>,
    },

    /// Internal: a spawned reconciliation task finished.
    ReconcileOutcome {
        /// The session that was reconciled
        session_id: SessionId,
        /// The derived summary, or why reconciliation gave up
        result: Result<Box<HistoricalSummary>, String>,
    },
}

// ============================================================================
// Controller Errors
// ============================================================================

/// Errors that can occur during controller operations.
#[derive(Debug, Clone, Error)]
pub enum ControllerError {
    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Session Events
// ============================================================================

/// Events published by the controller to subscribers.
///
/// Broadcast to in-process observers; the delivery channel receives its
/// frames directly from the actor, not through this channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session lifecycle state changed.
    ///
    /// The session snapshot is boxed to reduce enum size variance.
    StateChanged {
        /// The updated session snapshot (boxed for size optimization)
        session: Box<Session>,
    },

    /// Live metrics were accepted for the active session.
    Telemetry {
        /// The accepted update
        update: TelemetryUpdate,
    },

    /// The session ended normally; metrics are final.
    Ended {
        session_id: SessionId,
        metrics: LiveMetrics,
    },

    /// The session failed; metrics frozen at last known values.
    Failed {
        session_id: SessionId,
        reason: FailureReason,
    },

    /// Reconciliation produced the authoritative summary.
    Reconciled {
        /// The post-hoc summary (boxed for size optimization)
        summary: Box<HistoricalSummary>,
    },

    /// Reconciliation gave up.
    ReconcileFailed {
        session_id: SessionId,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_error_display() {
        let err = ControllerError::ChannelClosed;
        assert_eq!(err.to_string(), "response channel closed");
    }

    #[tokio::test]
    async fn test_command_oneshot_pattern() {
        let (tx, rx) = oneshot::channel::<Result<SessionState, ControllerError>>();

        tokio::spawn(async move {
            tx.send(Ok(SessionState::Idle)).ok();
        });

        let result = rx.await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_command_channel_closed_error() {
        let (tx, rx) = oneshot::channel::<Result<SessionState, ControllerError>>();
        drop(tx);

        let result = rx.await;
        assert!(result.is_err());
    }
}
