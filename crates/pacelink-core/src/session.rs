//! Session domain entities and the workout lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::metrics::LiveMetrics;
use crate::telemetry::Reading;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for one workout attempt.
///
/// Assigned at session creation and used to correlate the live session with
/// its eventual committed record in the health-data store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

impl SessionId {
    /// Creates a SessionId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh process-unique session id.
    pub fn generate() -> Self {
        let seq = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("ws-{}-{:04}", Utc::now().timestamp_millis(), seq))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 12 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Activity Kind
// ============================================================================

/// The kind of workout, fixed at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    #[default]
    Running,
    Walking,
    Cycling,
    StrengthTraining,
    Other,
}

impl ActivityKind {
    /// Parses a companion-supplied activity label.
    ///
    /// Accepts the labels the companion app has historically sent
    /// ("Strength" for strength training, everything else by name).
    /// Returns `None` for unknown labels so the ingress layer can reject
    /// them as invalid arguments.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "running" | "run" => Some(Self::Running),
            "walking" | "walk" => Some(Self::Walking),
            "cycling" | "bike" => Some(Self::Cycling),
            "strength" | "strength_training" => Some(Self::StrengthTraining),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Returns the display name for this activity.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Walking => "Walking",
            Self::Cycling => "Cycling",
            Self::StrengthTraining => "Strength Training",
            Self::Other => "Workout",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Why a session transitioned to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The user denied (or revoked) sensor authorization.
    AuthorizationDenied,
    /// The recording subsystem could not be acquired.
    ResourceUnavailable,
    /// The capture subsystem failed mid-session.
    CaptureFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthorizationDenied => write!(f, "authorization denied"),
            Self::ResourceUnavailable => write!(f, "resource unavailable"),
            Self::CaptureFailed => write!(f, "capture failed"),
        }
    }
}

/// Lifecycle state of one workout attempt.
///
/// Transitions are monotonic: `Idle → Starting → Active → Ending → Ended`,
/// with `Failed` reachable from any non-terminal state except `Idle`.
/// `Ended` and `Failed` are terminal; a new session must be created to
/// start again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SessionState {
    /// No workout attempt in progress.
    #[default]
    Idle,
    /// Authorization/resources requested, capture not yet producing.
    Starting,
    /// Capture running, live metrics updating.
    Active,
    /// Stop received, capture teardown in progress.
    Ending,
    /// Teardown complete, final metrics frozen.
    Ended,
    /// The capture layer failed; metrics frozen at last known values.
    Failed { reason: FailureReason },
}

impl SessionState {
    /// Returns true for `Ended` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed { .. })
    }

    /// Returns the display label for this state.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Ending => "ending",
            Self::Ended => "ended",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "failed ({reason})"),
            other => write!(f, "{}", other.label()),
        }
    }
}

// ============================================================================
// Commands and Effects
// ============================================================================

/// An inbound instruction from the companion.
///
/// Commands are idempotent: Start while already active and Stop while idle
/// are acknowledged no-ops, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Start { activity_kind: ActivityKind },
    Stop,
}

/// A side effect requested by the state machine.
///
/// The state machine itself is a pure transition function; the controller
/// executes effects against the injected collaborators and reports the
/// outcome back via [`SessionStateMachine::capture_ready`],
/// [`SessionStateMachine::capture_failed`], and
/// [`SessionStateMachine::teardown_complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Request authorization and begin sensor capture.
    BeginCapture {
        session_id: SessionId,
        kind: ActivityKind,
    },
    /// Stop sensor capture and release the recording subsystem.
    EndCapture,
    /// Query the health-data store for the committed record.
    Reconcile { session_id: SessionId },
}

// ============================================================================
// Session Snapshot
// ============================================================================

/// Read-only snapshot of one workout attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Stable identifier, assigned at creation.
    pub id: SessionId,

    /// Activity kind, immutable after creation.
    pub activity_kind: ActivityKind,

    /// Current lifecycle state.
    #[serde(flatten)]
    pub state: SessionState,

    /// Set on the transition into Active, immutable once set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Latest known live metrics.
    pub live_metrics: LiveMetrics,
}

// ============================================================================
// State Machine
// ============================================================================

/// Owns the authoritative in-memory lifecycle of one workout attempt.
///
/// All mutations are serialized through the single controller task that owns
/// this machine; the machine itself holds no locks and performs no I/O.
#[derive(Debug, Default)]
pub struct SessionStateMachine {
    session: Option<Session>,
    last_reading_at: Option<DateTime<Utc>>,
}

impl SessionStateMachine {
    /// Creates a machine with no session (state `Idle`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    /// Returns a read-only snapshot of the current session, if one exists.
    pub fn snapshot(&self) -> Option<Session> {
        self.session.clone()
    }

    /// Applies an inbound command, returning the resulting state and the
    /// side effects the controller must execute.
    ///
    /// Pure transition function: no I/O, no time reads beyond id generation.
    pub fn apply(&mut self, command: Command) -> (SessionState, Vec<Effect>) {
        match command {
            Command::Start { activity_kind } => self.apply_start(activity_kind),
            Command::Stop => self.apply_stop(),
        }
    }

    fn apply_start(&mut self, activity_kind: ActivityKind) -> (SessionState, Vec<Effect>) {
        match self.state() {
            SessionState::Idle => {
                let id = SessionId::generate();
                self.session = Some(Session {
                    id: id.clone(),
                    activity_kind,
                    state: SessionState::Starting,
                    started_at: None,
                    live_metrics: LiveMetrics::default(),
                });
                self.last_reading_at = None;
                (
                    SessionState::Starting,
                    vec![Effect::BeginCapture {
                        session_id: id,
                        kind: activity_kind,
                    }],
                )
            }
            // Idempotent: Start while a session is underway is acknowledged
            // without effect.
            state => {
                debug!(state = %state, "Start command ignored (session already underway)");
                (state, Vec::new())
            }
        }
    }

    fn apply_stop(&mut self) -> (SessionState, Vec<Effect>) {
        match self.state() {
            SessionState::Starting | SessionState::Active => {
                self.set_state(SessionState::Ending);
                (SessionState::Ending, vec![Effect::EndCapture])
            }
            // Idempotent: Stop while idle, ending, or terminal is a no-op.
            state => {
                debug!(state = %state, "Stop command ignored");
                (state, Vec::new())
            }
        }
    }

    /// Marks capture resources as ready: `Starting → Active`.
    ///
    /// Records `started_at`; the machine begins accepting telemetry ticks.
    pub fn capture_ready(&mut self, started_at: DateTime<Utc>) {
        if self.state() != SessionState::Starting {
            debug!(state = %self.state(), "capture_ready ignored outside Starting");
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.state = SessionState::Active;
            session.started_at = Some(started_at);
        }
    }

    /// Marks an unrecoverable capture failure: any non-terminal state with a
    /// session transitions to `Failed`. Metrics freeze at last known values.
    pub fn capture_failed(&mut self, reason: FailureReason) {
        if self.state().is_terminal() || self.session.is_none() {
            return;
        }
        self.set_state(SessionState::Failed { reason });
    }

    /// Marks teardown complete: `Ending → Ended`.
    ///
    /// Final live metrics are frozen; the returned effect hands the session
    /// off to reconciliation.
    pub fn teardown_complete(&mut self) -> Vec<Effect> {
        let state = self.state();
        match (&mut self.session, state) {
            (Some(session), SessionState::Ending) => {
                session.state = SessionState::Ended;
                vec![Effect::Reconcile {
                    session_id: session.id.clone(),
                }]
            }
            (_, state) => {
                debug!(state = %state, "teardown_complete ignored outside Ending");
                Vec::new()
            }
        }
    }

    /// Applies a telemetry reading while `Active`.
    ///
    /// Readings with a timestamp not strictly greater than the last accepted
    /// reading's are discarded (defends against out-of-order delivery).
    /// Returns the updated metrics when the tick was accepted.
    pub fn tick(&mut self, reading: &Reading) -> Option<LiveMetrics> {
        if self.state() != SessionState::Active {
            return None;
        }
        if let Some(last) = self.last_reading_at {
            if reading.timestamp() <= last {
                debug!(
                    reading_at = %reading.timestamp(),
                    last_accepted = %last,
                    "Discarding out-of-order reading"
                );
                return None;
            }
        }

        let session = self.session.as_mut()?;
        match reading {
            Reading::Sample {
                elapsed,
                active,
                distance_m,
                pace_secs_per_km,
                heart_rate_bpm,
                ..
            } => {
                session.live_metrics.merge_sample(
                    *elapsed,
                    *active,
                    *distance_m,
                    *pace_secs_per_km,
                    *heart_rate_bpm,
                );
            }
            Reading::HeartRate { bpm, .. } => {
                session.live_metrics.merge_heart_rate(*bpm);
            }
        }
        self.last_reading_at = Some(reading.timestamp());
        Some(session.live_metrics.clone())
    }

    fn set_state(&mut self, state: SessionState) {
        if let Some(session) = self.session.as_mut() {
            session.state = state;
        }
    }
}
