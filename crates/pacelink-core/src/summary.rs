//! Post-hoc workout summary derived from the committed health record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::session::SessionId;

/// A single point along the recorded route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters above sea level.
    pub altitude_m: f64,
    pub timestamp: DateTime<Utc>,
}

/// Authoritative post-workout summary, derived from the committed record
/// rather than from live metrics.
///
/// A summary with an empty `route` is valid: indoor workouts record no
/// route samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSummary {
    pub session_id: SessionId,

    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,

    /// Wall-clock span of the workout (`end_date - start_date`).
    pub elapsed: Duration,

    /// Time spent actually exercising, as recorded by the store.
    pub active: Duration,

    /// Time paused. Derived, clamped to zero when the recorded active
    /// duration exceeds the wall-clock span.
    pub paused: Duration,

    pub distance_m: f64,

    /// Average cadence in steps per minute, when the store recorded it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cadence_spm: Option<f64>,

    /// Cumulative elevation gain in meters, when the store recorded it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation_gain_m: Option<f64>,

    /// Route samples in timestamp order; empty for indoor workouts.
    pub route: Vec<RoutePoint>,
}

impl HistoricalSummary {
    /// Derives a summary from the raw committed record fields.
    ///
    /// `elapsed` is the wall-clock span; `paused = elapsed - active`,
    /// saturating at zero when store rounding makes active exceed elapsed.
    #[allow(clippy::too_many_arguments)]
    pub fn derive(
        session_id: SessionId,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        active: Duration,
        distance_m: f64,
        cadence_spm: Option<f64>,
        elevation_gain_m: Option<f64>,
        route: Vec<RoutePoint>,
    ) -> Self {
        let elapsed = (end_date - start_date).to_std().unwrap_or(Duration::ZERO);
        let paused = elapsed.saturating_sub(active);
        Self {
            session_id,
            start_date,
            end_date,
            elapsed,
            active,
            paused,
            distance_m,
            cadence_spm,
            elevation_gain_m,
            route,
        }
    }
}
