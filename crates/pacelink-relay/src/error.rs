//! Error types for the companion relay.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use thiserror::Error;

// ============================================================================
// Relay Error Type
// ============================================================================

/// Companion relay errors.
///
/// Covers daemon connection failures, protocol mismatches, and message
/// framing problems. Connection errors are generally retried by the
/// client's reconnect loop rather than surfaced to the caller.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Failed to connect to the wearable daemon.
    #[error("Failed to connect to daemon: {0}")]
    DaemonConnection(String),

    /// Protocol version mismatch with the daemon.
    ///
    /// The relay and daemon are running incompatible protocol versions.
    /// Reconnecting will not help until one side is upgraded.
    #[error("Protocol version mismatch (relay: {relay_version}, daemon: {daemon_version})")]
    VersionMismatch {
        /// The protocol version the relay supports.
        relay_version: String,
        /// The protocol version the daemon is running.
        daemon_version: String,
    },

    /// Protocol parse or format error.
    ///
    /// A frame from the daemon could not be understood. This may indicate
    /// a version mismatch between the relay and daemon.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON parse error passthrough.
    #[error("Failed to parse frame: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Convenience Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

// ============================================================================
// Tests
// ============================================================================
