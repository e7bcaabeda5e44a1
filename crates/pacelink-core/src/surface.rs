//! Glanceable-surface projection and publish throttling.
//!
//! The always-on surface (complication / widget) renders a small,
//! pre-formatted snapshot of the session. Publishing to it is expensive on
//! the platform side, so [`SurfacePublisher`] rate-limits pushes while
//! guaranteeing the latest state is never lost.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::trace;

use crate::session::{Session, SessionState};

/// Pre-formatted display snapshot for the glanceable surface.
///
/// Pure projection of a [`Session`]: all formatting decisions are made here
/// so the rendering side only places strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceState {
    /// Activity display name, e.g. "Running".
    pub activity: String,
    /// Lifecycle label, e.g. "active".
    pub state: String,
    /// Elapsed time, e.g. "12:05".
    pub elapsed: String,
    /// Distance, e.g. "3.42 km".
    pub distance: String,
    /// Pace, e.g. "5'21\"/km" or "--".
    pub pace: String,
    /// Heart rate, e.g. "142 bpm" or "--".
    pub heart_rate: String,
}

impl SurfaceState {
    /// Projects a session snapshot into display strings.
    pub fn project(session: &Session) -> Self {
        Self {
            activity: session.activity_kind.display_name().to_string(),
            state: session.state.label().to_string(),
            elapsed: session.live_metrics.format_elapsed(),
            distance: session.live_metrics.format_distance(),
            pace: session.live_metrics.format_pace(),
            heart_rate: session.live_metrics.format_heart_rate(),
        }
    }

    /// The empty surface shown when no session exists.
    pub fn idle() -> Self {
        Self {
            activity: String::new(),
            state: SessionState::Idle.label().to_string(),
            elapsed: "0:00".to_string(),
            distance: "0.00 km".to_string(),
            pace: "--".to_string(),
            heart_rate: "--".to_string(),
        }
    }
}

/// Throttles surface pushes to at most one per `min_interval`.
///
/// When a push is suppressed the candidate state is parked as pending;
/// [`SurfacePublisher::poll_pending`] releases the latest pending state once
/// the interval has elapsed, so the surface always converges on the most
/// recent session state even when updates stop arriving.
#[derive(Debug)]
pub struct SurfacePublisher {
    min_interval: Duration,
    last_published: Option<Instant>,
    last_state: Option<SurfaceState>,
    pending: Option<SurfaceState>,
}

impl SurfacePublisher {
    /// Creates a publisher that pushes at most once per `min_interval`.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_published: None,
            last_state: None,
            pending: None,
        }
    }

    /// Offers a session snapshot for publication.
    ///
    /// Returns the state to push now, or `None` when throttled (the state
    /// is parked as pending) or unchanged since the last push.
    pub fn offer(&mut self, session: &Session, now: Instant) -> Option<SurfaceState> {
        self.offer_state(SurfaceState::project(session), now)
    }

    /// Offers an already-projected state (used for the idle surface).
    pub fn offer_state(&mut self, state: SurfaceState, now: Instant) -> Option<SurfaceState> {
        if self.last_state.as_ref() == Some(&state) {
            self.pending = None;
            return None;
        }
        if self.throttled(now) {
            trace!("surface push throttled, parking pending state");
            self.pending = Some(state);
            return None;
        }
        self.record_push(state, now)
    }

    /// Releases the parked pending state once the interval has elapsed.
    ///
    /// Call on a timer tick; returns the state to push, if any is due.
    pub fn poll_pending(&mut self, now: Instant) -> Option<SurfaceState> {
        if self.pending.is_none() || self.throttled(now) {
            return None;
        }
        let state = self.pending.take()?;
        if self.last_state.as_ref() == Some(&state) {
            return None;
        }
        self.record_push(state, now)
    }

    /// Returns true while a suppressed state is waiting for the interval.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn throttled(&self, now: Instant) -> bool {
        self.last_published
            .is_some_and(|at| now.duration_since(at) < self.min_interval)
    }

    fn record_push(&mut self, state: SurfaceState, now: Instant) -> Option<SurfaceState> {
        self.last_published = Some(now);
        self.last_state = Some(state.clone());
        self.pending = None;
        Some(state)
    }
}
