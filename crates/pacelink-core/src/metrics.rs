//! Live metric value objects and display formatting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The latest known in-progress measurements for an active session.
///
/// Mutated only by the owning [`SessionStateMachine`](crate::SessionStateMachine).
/// Cumulative fields (durations, distance) are monotonically non-decreasing;
/// instantaneous fields (pace, heart rate) track the most recent reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveMetrics {
    /// Wall-clock time since the session became active.
    pub elapsed: Duration,

    /// Time spent actually moving / exercising (pauses excluded).
    /// Invariant: `active <= elapsed`.
    pub active: Duration,

    /// Distance covered in meters.
    pub distance_m: f64,

    /// Current pace in seconds per kilometer, if moving.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pace_secs_per_km: Option<f64>,

    /// Most recent heart rate in beats per minute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate_bpm: Option<f64>,
}

impl LiveMetrics {
    /// Merges a full sample into these metrics.
    ///
    /// Cumulative fields never regress: a reading reporting a smaller
    /// elapsed/active/distance than already recorded keeps the recorded
    /// value. `active` is clamped so it never exceeds `elapsed`.
    pub fn merge_sample(
        &mut self,
        elapsed: Duration,
        active: Duration,
        distance_m: f64,
        pace_secs_per_km: Option<f64>,
        heart_rate_bpm: Option<f64>,
    ) {
        self.elapsed = self.elapsed.max(elapsed);
        self.active = self.active.max(active).min(self.elapsed);
        if distance_m > self.distance_m {
            self.distance_m = distance_m;
        }
        if pace_secs_per_km.is_some() {
            self.pace_secs_per_km = pace_secs_per_km;
        }
        if heart_rate_bpm.is_some() {
            self.heart_rate_bpm = heart_rate_bpm;
        }
    }

    /// Merges a heart-rate-only partial reading, leaving all other fields.
    pub fn merge_heart_rate(&mut self, bpm: f64) {
        self.heart_rate_bpm = Some(bpm);
    }

    /// Formats elapsed time as "m:ss" or "h:mm:ss".
    pub fn format_elapsed(&self) -> String {
        format_clock(self.elapsed)
    }

    /// Formats distance as "x.xx km".
    pub fn format_distance(&self) -> String {
        format!("{:.2} km", self.distance_m / 1000.0)
    }

    /// Formats pace as "m'ss\"/km", or "--" when not moving.
    pub fn format_pace(&self) -> String {
        match self.pace_secs_per_km {
            Some(secs) if secs.is_finite() && secs > 0.0 => {
                let total = secs.round() as u64;
                format!("{}'{:02}\"/km", total / 60, total % 60)
            }
            _ => "--".to_string(),
        }
    }

    /// Formats heart rate as "142 bpm", or "--" when no reading yet.
    pub fn format_heart_rate(&self) -> String {
        match self.heart_rate_bpm {
            Some(bpm) if bpm.is_finite() && bpm > 0.0 => format!("{} bpm", bpm.round() as u64),
            _ => "--".to_string(),
        }
    }
}

impl fmt::Display for LiveMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.format_elapsed(),
            self.format_distance(),
            self.format_pace(),
            self.format_heart_rate()
        )
    }
}

/// Formats a duration as "m:ss" below one hour, "h:mm:ss" above.
fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 3600 {
        format!("{}:{:02}", secs / 60, secs % 60)
    } else {
        format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
