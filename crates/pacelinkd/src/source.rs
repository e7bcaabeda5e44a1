//! Simulated telemetry source and health store.
//!
//! There is no sensor hardware here, so the daemon ships with a simulated
//! capture subsystem: a paced generator of plausible readings, and a store
//! that commits the workout record a little while after capture ends. The
//! commit delay is what exercises the reconciler's retry path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pacelink_core::{ActivityKind, CaptureError, Reading, RoutePoint, SessionId, TelemetrySource};

use crate::reconciler::{HealthStore, StoreError, WorkoutRecord};

/// Buffer for the readings channel.
const READING_BUFFER: usize = 32;

/// Simulated speed in meters per second (a relaxed run).
const SPEED_M_PER_S: f64 = 2.8;

// ============================================================================
// Simulated Store
// ============================================================================

/// In-memory health-data store with delayed commits.
///
/// Records become queryable only after `commit_delay`, mimicking the
/// platform store's eventual consistency.
#[derive(Clone)]
pub struct SimulatedStore {
    records: Arc<Mutex<HashMap<SessionId, WorkoutRecord>>>,
    routes: Arc<Mutex<HashMap<SessionId, Vec<RoutePoint>>>>,
    commit_delay: Duration,
    revoked: Arc<Mutex<bool>>,
}

impl SimulatedStore {
    pub fn new(commit_delay: Duration) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            routes: Arc::new(Mutex::new(HashMap::new())),
            commit_delay,
            revoked: Arc::new(Mutex::new(false)),
        }
    }

    /// Commits a record after the configured delay.
    pub fn commit_later(&self, record: WorkoutRecord, route: Vec<RoutePoint>) {
        let store = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(store.commit_delay).await;
            let session_id = record.session_id.clone();
            if let Ok(mut records) = store.records.lock() {
                records.insert(session_id.clone(), record);
            }
            if let Ok(mut routes) = store.routes.lock() {
                routes.insert(session_id.clone(), route);
            }
            debug!(session_id = %session_id, "Workout record committed");
        });
    }

    /// Commits a record immediately (test hook).
    pub fn commit_now(&self, record: WorkoutRecord, route: Vec<RoutePoint>) {
        let session_id = record.session_id.clone();
        if let Ok(mut records) = self.records.lock() {
            records.insert(session_id.clone(), record);
        }
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(session_id, route);
        }
    }

    /// Simulates the user revoking store access.
    pub fn revoke_authorization(&self) {
        if let Ok(mut revoked) = self.revoked.lock() {
            *revoked = true;
        }
    }

    fn is_revoked(&self) -> bool {
        self.revoked.lock().map(|r| *r).unwrap_or(false)
    }
}

impl HealthStore for SimulatedStore {
    async fn query_workout(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<WorkoutRecord>, StoreError> {
        if self.is_revoked() {
            return Err(StoreError::AuthorizationRevoked);
        }
        let record = self
            .records
            .lock()
            .map_err(|_| StoreError::Query("store lock poisoned".to_string()))?
            .get(session_id)
            .cloned();
        Ok(record)
    }

    async fn query_route(&self, session_id: &SessionId) -> Result<Vec<RoutePoint>, StoreError> {
        if self.is_revoked() {
            return Err(StoreError::AuthorizationRevoked);
        }
        let route = self
            .routes
            .lock()
            .map_err(|_| StoreError::Query("store lock poisoned".to_string()))?
            .get(session_id)
            .cloned()
            .unwrap_or_default();
        Ok(route)
    }
}

// ============================================================================
// Simulated Source
// ============================================================================

/// Live progress shared between the emit task and `end_capture`.
#[derive(Debug, Default, Clone)]
struct Progress {
    elapsed: Duration,
    distance_m: f64,
}

struct ActiveCapture {
    session_id: SessionId,
    kind: ActivityKind,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    progress: Arc<Mutex<Progress>>,
}

/// Simulated sensor capture subsystem.
///
/// Produces one full sample per `emit_interval` plus a faster heart-rate
/// partial stream, and commits a workout record to the paired store when
/// capture ends.
pub struct SimulatedSource {
    authorized: bool,
    deny_authorization: bool,
    emit_interval: Duration,
    store: Option<SimulatedStore>,
    active: Option<ActiveCapture>,
}

impl SimulatedSource {
    pub fn new(emit_interval: Duration, store: Option<SimulatedStore>) -> Self {
        Self {
            authorized: false,
            deny_authorization: false,
            emit_interval,
            store,
            active: None,
        }
    }

    /// Makes authorization requests fail (test hook).
    pub fn deny_authorization(mut self) -> Self {
        self.deny_authorization = true;
        self
    }
}

impl TelemetrySource for SimulatedSource {
    fn request_authorization(&mut self) -> Result<(), CaptureError> {
        if self.deny_authorization {
            return Err(CaptureError::AuthorizationDenied);
        }
        self.authorized = true;
        Ok(())
    }

    fn begin_capture(
        &mut self,
        session_id: &SessionId,
        kind: ActivityKind,
        started_at: DateTime<Utc>,
    ) -> Result<mpsc::Receiver<Reading>, CaptureError> {
        if !self.authorized {
            return Err(CaptureError::AuthorizationDenied);
        }
        if self.active.is_some() {
            // Exclusive ownership: one capture at a time.
            return Err(CaptureError::ResourceUnavailable);
        }

        let (tx, rx) = mpsc::channel(READING_BUFFER);
        let cancel = CancellationToken::new();
        let progress = Arc::new(Mutex::new(Progress::default()));

        self.active = Some(ActiveCapture {
            session_id: session_id.clone(),
            kind,
            started_at,
            cancel: cancel.clone(),
            progress: Arc::clone(&progress),
        });

        let emit_interval = self.emit_interval;
        tokio::spawn(emit_readings(tx, emit_interval, progress, cancel));

        info!(session_id = %session_id, activity = %kind, "Simulated capture started");
        Ok(rx)
    }

    fn end_capture(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();

        let progress = active
            .progress
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default();

        info!(
            session_id = %active.session_id,
            elapsed_secs = progress.elapsed.as_secs(),
            "Simulated capture ended"
        );

        if let Some(store) = &self.store {
            let record = WorkoutRecord {
                session_id: active.session_id.clone(),
                start_date: active.started_at,
                end_date: Utc::now(),
                active: progress.elapsed,
                distance_m: progress.distance_m,
                cadence_spm: Some(168.0),
                elevation_gain_m: None,
            };
            let route = simulated_route(&active, &progress);
            store.commit_later(record, route);
        }
    }
}

/// Emit loop: one full sample per interval, with an extra heart-rate
/// partial between samples.
async fn emit_readings(
    tx: mpsc::Sender<Reading>,
    emit_interval: Duration,
    progress: Arc<Mutex<Progress>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(emit_interval / 2);
    let mut half_ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        half_ticks += 1;

        let elapsed = (emit_interval / 2) * half_ticks as u32;
        let heart_rate = 132.0 + (half_ticks % 24) as f64;

        let reading = if half_ticks % 2 == 0 {
            let distance_m = elapsed.as_secs_f64() * SPEED_M_PER_S;
            if let Ok(mut p) = progress.lock() {
                p.elapsed = elapsed;
                p.distance_m = distance_m;
            }
            Reading::Sample {
                timestamp: Utc::now(),
                elapsed,
                active: elapsed,
                distance_m,
                pace_secs_per_km: Some(1000.0 / SPEED_M_PER_S),
                heart_rate_bpm: Some(heart_rate),
            }
        } else {
            Reading::HeartRate {
                timestamp: Utc::now(),
                bpm: heart_rate,
            }
        };

        if tx.send(reading).await.is_err() {
            debug!("Readings receiver dropped, emit task stopping");
            break;
        }
    }
}

/// Builds a small synthetic route for outdoor activities.
fn simulated_route(active: &ActiveCapture, progress: &Progress) -> Vec<RoutePoint> {
    if !matches!(
        active.kind,
        ActivityKind::Running | ActivityKind::Walking | ActivityKind::Cycling
    ) {
        return Vec::new();
    }

    let seconds = progress.elapsed.as_secs();
    let points = (seconds / 5).min(200);
    (0..points)
        .map(|i| RoutePoint {
            latitude: 52.5200 + i as f64 * 0.0001,
            longitude: 13.4050 + i as f64 * 0.0001,
            altitude_m: 34.0,
            timestamp: active.started_at + chrono::Duration::seconds((i * 5) as i64),
        })
        .collect()
}
