//! Controller actor - owns the workout session and processes commands.
//!
//! The ControllerActor is the single owner of session state in the daemon.
//! It receives commands via an mpsc channel, consumes telemetry readings
//! from the capture subsystem, and publishes events via broadcast. All
//! state mutations happen sequentially within this one task; the rest of
//! the daemon interacts through the [`ControllerHandle`](super::ControllerHandle).

use std::collections::VecDeque;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pacelink_core::{
    CaptureError, Effect, Reading, Session, SessionState, SessionStateMachine, SurfacePublisher,
    SurfaceState, TelemetrySource,
};
use pacelink_protocol::{TelemetryUpdate, WearableMessage};

use super::commands::{ControllerCommand, SessionEvent};
use crate::config::DaemonConfig;
use crate::delivery::DeliveryChannel;
use crate::reconciler::{reconcile, HealthStore};

/// What woke the actor loop.
enum Wake {
    Command(Option<ControllerCommand>),
    Reading(Option<Reading>),
    SurfaceTick,
    Shutdown,
}

/// The controller actor - owns the session state machine and the capture
/// subsystem.
pub struct ControllerActor<S: TelemetrySource, H: HealthStore> {
    /// Command receiver
    cmd_rx: mpsc::Receiver<ControllerCommand>,

    /// Command sender, cloned into reconciliation tasks so their outcome
    /// re-enters the serialized command stream.
    cmd_tx: mpsc::Sender<ControllerCommand>,

    /// Event publisher for in-process subscribers
    event_tx: broadcast::Sender<SessionEvent>,

    /// Outbound frames to the companion link
    delivery: DeliveryChannel,

    /// Glanceable-surface output
    surface_tx: watch::Sender<SurfaceState>,

    /// The session lifecycle state machine (pure, no I/O)
    machine: SessionStateMachine,

    /// The sensor capture subsystem
    source: S,

    /// The health-data store, cloned into reconciliation tasks
    store: H,

    /// Active capture stream; None outside of capture
    readings: Option<mpsc::Receiver<Reading>>,

    /// Throttles glanceable-surface pushes
    publisher: SurfacePublisher,

    /// When the last full telemetry push was emitted
    last_emitted: Option<Instant>,

    /// Last lifecycle state announced to subscribers and the companion
    last_announced: Option<SessionState>,

    config: DaemonConfig,
    cancel: CancellationToken,
}

impl<S: TelemetrySource, H: HealthStore> ControllerActor<S, H> {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        cmd_rx: mpsc::Receiver<ControllerCommand>,
        cmd_tx: mpsc::Sender<ControllerCommand>,
        event_tx: broadcast::Sender<SessionEvent>,
        delivery: DeliveryChannel,
        surface_tx: watch::Sender<SurfaceState>,
        source: S,
        store: H,
        config: DaemonConfig,
        cancel: CancellationToken,
    ) -> Self {
        let publisher = SurfacePublisher::new(config.surface_min_interval);
        Self {
            cmd_rx,
            cmd_tx,
            event_tx,
            delivery,
            surface_tx,
            machine: SessionStateMachine::new(),
            source,
            store,
            readings: None,
            publisher,
            last_emitted: None,
            last_announced: None,
            config,
            cancel,
        }
    }

    /// Runs the actor event loop until shutdown or channel closure.
    pub async fn run(mut self) {
        info!("Session controller starting");

        let mut surface_ticker = interval(self.config.surface_min_interval);

        loop {
            let wake = tokio::select! {
                _ = self.cancel.cancelled() => Wake::Shutdown,
                cmd = self.cmd_rx.recv() => Wake::Command(cmd),
                reading = next_reading(&mut self.readings) => Wake::Reading(reading),
                _ = surface_ticker.tick() => Wake::SurfaceTick,
            };

            match wake {
                Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Command(None) => {
                    debug!("Controller stopping: command channel closed");
                    break;
                }
                Wake::Reading(Some(reading)) => self.handle_reading(reading).await,
                Wake::Reading(None) => self.handle_capture_hangup().await,
                Wake::SurfaceTick => self.poll_surface(),
                Wake::Shutdown => {
                    info!("Controller shutdown requested");
                    break;
                }
            }
        }

        // Release the recording subsystem on the way out.
        self.source.end_capture();
        info!(state = %self.machine.state(), "Session controller stopped");
    }

    /// Dispatches a command to the appropriate handler.
    async fn handle_command(&mut self, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::Apply {
                command,
                respond_to,
            } => {
                debug!(?command, state = %self.machine.state(), "Applying command");
                let (_, effects) = self.machine.apply(command);
                self.execute_effects(effects).await;
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(Ok(self.machine.state()));
                self.announce_state().await;
            }

            ControllerCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.machine.snapshot());
            }

            ControllerCommand::ReconcileOutcome { session_id, result } => {
                self.handle_reconcile_outcome(session_id, result).await;
            }
        }
    }

    /// Executes state machine effects in order.
    ///
    /// Teardown completion can itself yield a follow-up effect, so this
    /// runs a small worklist rather than recursing.
    async fn execute_effects(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::BeginCapture { session_id, kind } => {
                    let started_at = Utc::now();
                    let capture = self
                        .source
                        .request_authorization()
                        .and_then(|_| self.source.begin_capture(&session_id, kind, started_at));
                    match capture {
                        Ok(rx) => {
                            info!(session_id = %session_id, activity = %kind, "Capture started");
                            self.readings = Some(rx);
                            self.machine.capture_ready(started_at);
                        }
                        Err(e) => {
                            warn!(session_id = %session_id, error = %e, "Capture failed to start");
                            self.machine.capture_failed(e.failure_reason());
                        }
                    }
                }

                Effect::EndCapture => {
                    self.source.end_capture();
                    self.readings = None;
                    queue.extend(self.machine.teardown_complete());
                }

                Effect::Reconcile { session_id } => {
                    self.spawn_reconcile(session_id);
                }
            }
        }
    }

    /// Spawns a detached reconciliation task.
    ///
    /// The outcome re-enters the actor through the command channel so it
    /// is serialized with everything else.
    fn spawn_reconcile(&self, session_id: pacelink_core::SessionId) {
        let store = self.store.clone();
        let policy = self.config.reconcile.clone();
        let cancel = self.cancel.clone();
        let cmd_tx = self.cmd_tx.clone();

        info!(session_id = %session_id, "Starting reconciliation");
        tokio::spawn(async move {
            let result = reconcile(&store, session_id.clone(), &policy, &cancel)
                .await
                .map(Box::new)
                .map_err(|e| e.to_string());
            let _ = cmd_tx
                .send(ControllerCommand::ReconcileOutcome { session_id, result })
                .await;
        });
    }

    async fn handle_reconcile_outcome(
        &mut self,
        session_id: pacelink_core::SessionId,
        result: Result<Box<pacelink_core::HistoricalSummary>, String>,
    ) {
        match result {
            Ok(summary) => {
                info!(session_id = %session_id, "Reconciliation succeeded");
                let _ = self.event_tx.send(SessionEvent::Reconciled {
                    summary: summary.clone(),
                });
                self.delivery
                    .send_notice(WearableMessage::Reconciled { summary })
                    .await;
            }
            Err(reason) => {
                warn!(session_id = %session_id, reason = %reason, "Reconciliation failed");
                let _ = self.event_tx.send(SessionEvent::ReconcileFailed {
                    session_id: session_id.clone(),
                    reason: reason.clone(),
                });
                self.delivery
                    .send_notice(WearableMessage::ReconcileFailed { session_id, reason })
                    .await;
            }
        }
    }

    /// Applies an accepted telemetry reading and forwards it, rate-bounded.
    ///
    /// Full samples are bounded to one push per tick interval; heart-rate
    /// partials bypass the bound and go out immediately.
    async fn handle_reading(&mut self, reading: Reading) {
        let is_partial = reading.is_heart_rate_only();
        let Some(metrics) = self.machine.tick(&reading) else {
            return;
        };
        let Some(session) = self.machine.snapshot() else {
            return;
        };

        let now = Instant::now();
        let due = self
            .last_emitted
            .map_or(true, |at| now.duration_since(at) >= self.config.tick_interval);

        if is_partial || due {
            if !is_partial {
                self.last_emitted = Some(now);
            }
            let update = TelemetryUpdate {
                session_id: session.id.clone(),
                metrics,
                sent_at: Utc::now(),
            };
            let _ = self.event_tx.send(SessionEvent::Telemetry {
                update: update.clone(),
            });
            self.delivery.send_telemetry(update).await;
        }

        self.offer_surface(&session);
    }

    /// The capture stream closed without an end request.
    async fn handle_capture_hangup(&mut self) {
        self.readings = None;
        if !self.machine.state().is_terminal() && self.machine.snapshot().is_some() {
            warn!("Capture stream closed unexpectedly");
            self.source.end_capture();
            self.machine
                .capture_failed(CaptureError::CaptureFailed.failure_reason());
            self.announce_state().await;
        }
    }

    /// Announces a lifecycle state change to subscribers and the companion.
    ///
    /// Deduplicates: re-announcing the current state is a no-op, so
    /// idempotent command no-ops produce no traffic.
    async fn announce_state(&mut self) {
        let state = self.machine.state();
        if self.last_announced == Some(state) {
            return;
        }
        self.last_announced = Some(state);

        let Some(session) = self.machine.snapshot() else {
            return;
        };

        match state {
            SessionState::Ended => {
                let _ = self.event_tx.send(SessionEvent::Ended {
                    session_id: session.id.clone(),
                    metrics: session.live_metrics.clone(),
                });
                self.delivery
                    .send_notice(WearableMessage::SessionEnded {
                        session_id: session.id.clone(),
                        metrics: session.live_metrics.clone(),
                    })
                    .await;
            }
            SessionState::Failed { reason } => {
                let _ = self.event_tx.send(SessionEvent::Failed {
                    session_id: session.id.clone(),
                    reason,
                });
                self.delivery
                    .send_notice(WearableMessage::SessionFailed {
                        session_id: session.id.clone(),
                        reason,
                    })
                    .await;
            }
            _ => {
                let _ = self.event_tx.send(SessionEvent::StateChanged {
                    session: Box::new(session.clone()),
                });
                self.delivery
                    .send_notice(WearableMessage::session_updated(session.clone()))
                    .await;
            }
        }

        self.offer_surface(&session);
    }

    fn offer_surface(&mut self, session: &Session) {
        if let Some(state) = self.publisher.offer(session, Instant::now()) {
            let _ = self.surface_tx.send(state);
        }
    }

    /// Releases a throttled surface push once its interval has elapsed.
    fn poll_surface(&mut self) {
        if let Some(state) = self.publisher.poll_pending(Instant::now()) {
            let _ = self.surface_tx.send(state);
        }
    }
}

/// Awaits the next reading, or parks forever when no capture is running.
///
/// Parking (instead of returning) keeps the select loop from spinning on a
/// permanently-ready branch between captures.
async fn next_reading(readings: &mut Option<mpsc::Receiver<Reading>>) -> Option<Reading> {
    match readings {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
