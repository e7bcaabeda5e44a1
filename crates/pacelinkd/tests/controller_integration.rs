//! Integration tests for the session controller.
//!
//! These drive the controller through full workout lifecycles with the
//! simulated capture subsystem and health store.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use pacelink_core::{ActivityKind, Command, SessionState};
use pacelinkd::config::DaemonConfig;
use pacelinkd::controller::{spawn_controller, ControllerHandle, SessionEvent};
use pacelinkd::delivery::spawn_delivery;
use pacelinkd::reconciler::ReconcilePolicy;
use pacelinkd::source::{SimulatedSource, SimulatedStore};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn fast_config() -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.tick_interval = Duration::from_millis(20);
    config.surface_min_interval = Duration::from_millis(20);
    config.reconcile = ReconcilePolicy {
        max_attempts: 20,
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
    };
    config
}

struct Harness {
    controller: ControllerHandle,
    events: broadcast::Receiver<SessionEvent>,
    _reachable_tx: watch::Sender<bool>,
    _cancel_guard: tokio_util::sync::DropGuard,
}

fn start_harness(source: SimulatedSource, store: SimulatedStore) -> Harness {
    let cancel = CancellationToken::new();
    let (frames_tx, _frames_rx) = mpsc::channel(64);
    let (reachable_tx, reachable_rx) = watch::channel(true);

    let delivery = spawn_delivery(frames_tx, reachable_rx);
    let (controller, _surface_rx) =
        spawn_controller(source, store, delivery, fast_config(), cancel.clone());
    let events = controller.subscribe();

    Harness {
        controller,
        events,
        _reachable_tx: reachable_tx,
        _cancel_guard: cancel.drop_guard(),
    }
}

fn default_harness() -> Harness {
    let store = SimulatedStore::new(Duration::from_millis(50));
    let source = SimulatedSource::new(Duration::from_millis(20), Some(store.clone()));
    start_harness(source, store)
}

/// Waits for the next event matching the predicate, skipping others.
async fn wait_for<F>(events: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("event within timeout")
            .expect("event channel open");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_full_lifecycle_start_to_reconciled() {
    let mut harness = default_harness();

    let state = harness
        .controller
        .apply(Command::Start {
            activity_kind: ActivityKind::Running,
        })
        .await
        .expect("start accepted");
    assert_eq!(state, SessionState::Active);

    // Telemetry flows while active.
    let event = wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Telemetry { .. })
    })
    .await;
    let session_id = match event {
        SessionEvent::Telemetry { update } => update.session_id,
        _ => unreachable!(),
    };

    let state = harness
        .controller
        .apply(Command::Stop)
        .await
        .expect("stop accepted");
    assert_eq!(state, SessionState::Ended);

    let ended = wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Ended { .. })
    })
    .await;
    match ended {
        SessionEvent::Ended { session_id: id, .. } => assert_eq!(id, session_id),
        _ => unreachable!(),
    }

    // The store commits late; the reconciler retries until it appears.
    let reconciled = wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Reconciled { .. })
    })
    .await;
    match reconciled {
        SessionEvent::Reconciled { summary } => {
            assert_eq!(summary.session_id, session_id);
            assert!(summary.paused <= summary.elapsed);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_start_while_active_is_acknowledged_noop() {
    let harness = default_harness();

    let first = harness
        .controller
        .apply(Command::Start {
            activity_kind: ActivityKind::Running,
        })
        .await
        .expect("start accepted");
    assert_eq!(first, SessionState::Active);

    let snapshot_before = harness.controller.snapshot().await.expect("session");

    let second = harness
        .controller
        .apply(Command::Start {
            activity_kind: ActivityKind::Cycling,
        })
        .await
        .expect("second start acknowledged");
    assert_eq!(second, SessionState::Active);

    let snapshot_after = harness.controller.snapshot().await.expect("session");
    assert_eq!(snapshot_before.id, snapshot_after.id);
    assert_eq!(snapshot_after.activity_kind, ActivityKind::Running);
}

#[tokio::test]
async fn test_stop_while_idle_is_acknowledged_noop() {
    let harness = default_harness();

    let state = harness
        .controller
        .apply(Command::Stop)
        .await
        .expect("stop acknowledged");
    assert_eq!(state, SessionState::Idle);
    assert!(harness.controller.snapshot().await.is_none());
}

#[tokio::test]
async fn test_denied_authorization_fails_session() {
    let store = SimulatedStore::new(Duration::from_millis(50));
    let source =
        SimulatedSource::new(Duration::from_millis(20), Some(store.clone())).deny_authorization();
    let mut harness = start_harness(source, store);

    let state = harness
        .controller
        .apply(Command::Start {
            activity_kind: ActivityKind::Running,
        })
        .await
        .expect("start processed");
    assert!(state.is_terminal());

    let failed = wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Failed { .. })
    })
    .await;
    assert!(matches!(failed, SessionEvent::Failed { .. }));
}

#[tokio::test]
async fn test_restart_after_ended_creates_new_session() {
    let mut harness = default_harness();

    harness
        .controller
        .apply(Command::Start {
            activity_kind: ActivityKind::Running,
        })
        .await
        .expect("start accepted");
    let first_id = harness.controller.snapshot().await.expect("session").id;

    wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Telemetry { .. })
    })
    .await;

    harness
        .controller
        .apply(Command::Stop)
        .await
        .expect("stop accepted");

    let state = harness
        .controller
        .apply(Command::Start {
            activity_kind: ActivityKind::Walking,
        })
        .await
        .expect("restart accepted");
    assert_eq!(state, SessionState::Active);

    let snapshot = harness.controller.snapshot().await.expect("session");
    assert_ne!(snapshot.id, first_id);
    assert_eq!(snapshot.activity_kind, ActivityKind::Walking);
}

#[tokio::test]
async fn test_metrics_monotonic_across_ticks() {
    let mut harness = default_harness();

    harness
        .controller
        .apply(Command::Start {
            activity_kind: ActivityKind::Running,
        })
        .await
        .expect("start accepted");

    let mut last_elapsed = Duration::ZERO;
    let mut full_updates = 0;
    while full_updates < 3 {
        let event = wait_for(&mut harness.events, |e| {
            matches!(e, SessionEvent::Telemetry { .. })
        })
        .await;
        if let SessionEvent::Telemetry { update } = event {
            assert!(update.metrics.elapsed >= last_elapsed);
            assert!(update.metrics.active <= update.metrics.elapsed);
            if update.metrics.elapsed > last_elapsed {
                full_updates += 1;
                last_elapsed = update.metrics.elapsed;
            }
        }
    }
}

#[tokio::test]
async fn test_indoor_workout_reconciles_with_empty_route() {
    let mut harness = default_harness();

    harness
        .controller
        .apply(Command::Start {
            activity_kind: ActivityKind::StrengthTraining,
        })
        .await
        .expect("start accepted");

    wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Telemetry { .. })
    })
    .await;

    harness
        .controller
        .apply(Command::Stop)
        .await
        .expect("stop accepted");

    let reconciled = wait_for(&mut harness.events, |e| {
        matches!(e, SessionEvent::Reconciled { .. })
    })
    .await;
    match reconciled {
        SessionEvent::Reconciled { summary } => assert!(summary.route.is_empty()),
        _ => unreachable!(),
    }
}
