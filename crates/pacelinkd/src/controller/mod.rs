//! Session controller using the actor pattern.
//!
//! The controller is the single owner of the workout session on the
//! wearable. It receives commands via a tokio mpsc channel, consumes
//! telemetry readings from the capture subsystem, and is the only place
//! session state mutates.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │   LinkServer    │────▶│ ControllerActor │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                       │
//!         │  ControllerCommand    │   SessionEvent        │
//!         │  (mpsc channel)       │   (broadcast)         │
//!         ▼                       ▼                       ▼
//!    start/stop            SessionStateMachine       in-process
//!    commands              + TelemetrySource         subscribers
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use pacelink_core::{SurfaceState, TelemetrySource};

mod actor;
mod commands;
mod handle;

pub use actor::ControllerActor;
pub use commands::{ControllerCommand, ControllerError, SessionEvent};
pub use handle::ControllerHandle;

use crate::config::DaemonConfig;
use crate::delivery::DeliveryChannel;
use crate::reconciler::HealthStore;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

/// Spawns the controller actor and returns a handle for interaction plus
/// a receiver observing the glanceable surface.
pub fn spawn_controller<S: TelemetrySource, H: HealthStore>(
    source: S,
    store: H,
    delivery: DeliveryChannel,
    config: DaemonConfig,
    cancel: CancellationToken,
) -> (ControllerHandle, watch::Receiver<SurfaceState>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let (surface_tx, surface_rx) = watch::channel(SurfaceState::idle());

    let actor = ControllerActor::new(
        cmd_rx,
        cmd_tx.clone(),
        event_tx.clone(),
        delivery,
        surface_tx,
        source,
        store,
        config,
        cancel,
    );
    tokio::spawn(actor.run());

    (ControllerHandle::new(cmd_tx, event_tx), surface_rx)
}
