//! Telemetry capture abstraction.
//!
//! [`TelemetrySource`] wraps the sensor/recording subsystem of the wearable.
//! Concrete implementations are constructed by the process entry point and
//! injected into the controller; the core never discovers its own
//! collaborators at runtime.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::session::{ActivityKind, FailureReason, SessionId};

/// A single reading produced by the capture subsystem.
///
/// Full samples carry the complete metric set; heart-rate partials are a
/// narrower class delivered on their own faster cadence.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// A complete metric sample.
    Sample {
        /// When the sensor took this reading.
        timestamp: DateTime<Utc>,
        /// Wall-clock time since capture began.
        elapsed: Duration,
        /// Moving time since capture began.
        active: Duration,
        /// Cumulative distance in meters.
        distance_m: f64,
        /// Instantaneous pace in seconds per kilometer.
        pace_secs_per_km: Option<f64>,
        /// Heart rate in beats per minute, when the sensor had a lock.
        heart_rate_bpm: Option<f64>,
    },

    /// A heart-rate-only partial reading.
    HeartRate {
        /// When the sensor took this reading.
        timestamp: DateTime<Utc>,
        /// Heart rate in beats per minute.
        bpm: f64,
    },
}

impl Reading {
    /// Returns when the sensor took this reading.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Sample { timestamp, .. } | Self::HeartRate { timestamp, .. } => *timestamp,
        }
    }

    /// Returns true for heart-rate-only partial readings.
    pub fn is_heart_rate_only(&self) -> bool {
        matches!(self, Self::HeartRate { .. })
    }
}

/// Errors surfaced by the capture subsystem.
///
/// Capture errors are the only errors that terminate a session: live metrics
/// cannot exist without the sensor layer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    /// The user has not granted (or has revoked) sensor access.
    /// Terminal for the attempt; the user must re-grant before retrying.
    #[error("sensor authorization denied")]
    AuthorizationDenied,

    /// The recording subsystem is already owned by another session or
    /// could not be acquired. Terminal for this attempt, retryable by
    /// issuing a new Start.
    #[error("recording resources unavailable")]
    ResourceUnavailable,

    /// The capture subsystem failed mid-session.
    #[error("capture subsystem failed")]
    CaptureFailed,
}

impl CaptureError {
    /// Maps a capture error onto the session failure reason it causes.
    pub fn failure_reason(self) -> FailureReason {
        match self {
            Self::AuthorizationDenied => FailureReason::AuthorizationDenied,
            Self::ResourceUnavailable => FailureReason::ResourceUnavailable,
            Self::CaptureFailed => FailureReason::CaptureFailed,
        }
    }
}

/// Abstraction over the sensor/recording subsystem.
///
/// Exclusively owned by one session at a time: a `begin_capture` while a
/// capture is already running must fail fast with
/// [`CaptureError::ResourceUnavailable`] rather than silently multiplexing.
///
/// Readings arrive on the returned channel as a lazy, unbounded,
/// non-restartable sequence that ends when `end_capture` is called.
pub trait TelemetrySource: Send + 'static {
    /// Requests sensor authorization from the platform.
    fn request_authorization(&mut self) -> Result<(), CaptureError>;

    /// Begins capturing for the given session and activity.
    ///
    /// On success the source starts producing [`Reading`]s on the returned
    /// channel until [`end_capture`](Self::end_capture) is called. The
    /// session id keys whatever record the source eventually commits.
    fn begin_capture(
        &mut self,
        session_id: &SessionId,
        kind: ActivityKind,
        started_at: DateTime<Utc>,
    ) -> Result<mpsc::Receiver<Reading>, CaptureError>;

    /// Stops the current capture and releases the recording subsystem.
    ///
    /// Idempotent: calling without an active capture is a no-op.
    fn end_capture(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_timestamp() {
        let ts = Utc::now();
        let sample = Reading::Sample {
            timestamp: ts,
            elapsed: Duration::from_secs(5),
            active: Duration::from_secs(5),
            distance_m: 12.0,
            pace_secs_per_km: None,
            heart_rate_bpm: None,
        };
        let partial = Reading::HeartRate {
            timestamp: ts,
            bpm: 140.0,
        };

        assert_eq!(sample.timestamp(), ts);
        assert_eq!(partial.timestamp(), ts);
        assert!(!sample.is_heart_rate_only());
        assert!(partial.is_heart_rate_only());
    }

    #[test]
    fn test_capture_error_failure_reason() {
        assert_eq!(
            CaptureError::AuthorizationDenied.failure_reason(),
            FailureReason::AuthorizationDenied
        );
        assert_eq!(
            CaptureError::ResourceUnavailable.failure_reason(),
            FailureReason::ResourceUnavailable
        );
        assert_eq!(
            CaptureError::CaptureFailed.failure_reason(),
            FailureReason::CaptureFailed
        );
    }
}
