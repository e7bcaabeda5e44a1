//! Pacelink Core - Shared types for wearable workout session tracking
//!
//! This crate provides the domain types shared between the wearable-side
//! daemon (pacelinkd) and the companion relay (pacelink-relay): the session
//! state machine, live metric handling, the telemetry capture abstraction,
//! the glanceable-surface projection, and the post-hoc summary record.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod metrics;
pub mod session;
pub mod summary;
pub mod surface;
pub mod telemetry;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use metrics::LiveMetrics;
pub use session::{
    ActivityKind, Command, Effect, FailureReason, Session, SessionId, SessionState,
    SessionStateMachine,
};
pub use summary::{HistoricalSummary, RoutePoint};
pub use surface::{SurfacePublisher, SurfaceState};
pub use telemetry::{CaptureError, Reading, TelemetrySource};
