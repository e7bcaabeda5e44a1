//! Post-workout reconciliation against the health-data store.
//!
//! When a session ends, the platform commits the workout record
//! asynchronously; it may not be queryable for a while. The reconciler
//! polls with bounded exponential backoff until the record appears, then
//! derives the authoritative [`HistoricalSummary`] from it.
//!
//! Route data is best-effort: a route query failure degrades to an empty
//! route rather than failing the reconciliation, matching indoor workouts
//! where no route exists at all.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pacelink_core::{HistoricalSummary, RoutePoint, SessionId};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Health Store Abstraction
// ============================================================================

/// The raw committed workout record, as the store reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkoutRecord {
    pub session_id: SessionId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Time spent actually exercising.
    pub active: Duration,
    pub distance_m: f64,
    pub cadence_spm: Option<f64>,
    pub elevation_gain_m: Option<f64>,
}

/// Errors surfaced by the health-data store.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The user revoked store access. Terminal: retrying cannot help.
    #[error("store authorization revoked")]
    AuthorizationRevoked,

    /// A query failed transiently.
    #[error("store query failed: {0}")]
    Query(String),
}

/// Abstraction over the platform health-data store.
///
/// Clone is required so reconciliation tasks can run detached from the
/// controller; implementations are expected to be handle-like.
pub trait HealthStore: Clone + Send + Sync + 'static {
    /// Queries the committed workout record for a session.
    ///
    /// `Ok(None)` means the record has not been committed yet.
    fn query_workout(
        &self,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<Option<WorkoutRecord>, StoreError>> + Send;

    /// Queries the recorded route for a session.
    ///
    /// An empty vector is a valid result (indoor workouts).
    fn query_route(
        &self,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<Vec<RoutePoint>, StoreError>> + Send;
}

// ============================================================================
// Reconcile Policy
// ============================================================================

/// Retry policy for reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    /// Maximum number of workout queries before giving up.
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles each miss.
    pub initial_backoff: Duration,

    /// Upper bound on the backoff delay.
    pub max_backoff: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Errors from a reconciliation run.
#[derive(Error, Debug, Clone)]
pub enum ReconcileError {
    /// The record never appeared within the retry budget.
    #[error("workout record not found after {attempts} attempts")]
    NotFound { attempts: u32 },

    /// Store access was revoked; no amount of retrying helps.
    #[error("store authorization revoked")]
    Authorization,

    /// All attempts failed with query errors.
    #[error("store query failed: {0}")]
    Query(String),

    /// The daemon is shutting down.
    #[error("reconciliation cancelled")]
    Cancelled,
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Polls the store until the committed record appears, then derives the
/// authoritative summary.
///
/// Retries `policy.max_attempts` times with doubling backoff. Authorization
/// revocation aborts immediately; transient query errors consume an attempt
/// like a miss does.
pub async fn reconcile<H: HealthStore>(
    store: &H,
    session_id: SessionId,
    policy: &ReconcilePolicy,
    cancel: &CancellationToken,
) -> Result<HistoricalSummary, ReconcileError> {
    let mut backoff = policy.initial_backoff;
    let mut last_query_error: Option<String> = None;

    for attempt in 1..=policy.max_attempts {
        match store.query_workout(&session_id).await {
            Ok(Some(record)) => {
                debug!(session_id = %session_id, attempt, "Workout record found");
                let route = fetch_route(store, &session_id).await;
                let summary = HistoricalSummary::derive(
                    record.session_id,
                    record.start_date,
                    record.end_date,
                    record.active,
                    record.distance_m,
                    record.cadence_spm,
                    record.elevation_gain_m,
                    route,
                );
                info!(
                    session_id = %session_id,
                    elapsed_secs = summary.elapsed.as_secs(),
                    route_points = summary.route.len(),
                    "Reconciliation complete"
                );
                return Ok(summary);
            }
            Ok(None) => {
                debug!(session_id = %session_id, attempt, "Record not committed yet");
            }
            Err(StoreError::AuthorizationRevoked) => {
                warn!(session_id = %session_id, "Store authorization revoked, giving up");
                return Err(ReconcileError::Authorization);
            }
            Err(StoreError::Query(reason)) => {
                debug!(session_id = %session_id, attempt, reason = %reason, "Store query failed");
                last_query_error = Some(reason);
            }
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ReconcileError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(policy.max_backoff);
        }
    }

    match last_query_error {
        Some(reason) => Err(ReconcileError::Query(reason)),
        None => Err(ReconcileError::NotFound {
            attempts: policy.max_attempts,
        }),
    }
}

/// Fetches the route, degrading query failures to an empty route.
async fn fetch_route<H: HealthStore>(store: &H, session_id: &SessionId) -> Vec<RoutePoint> {
    match store.query_route(session_id).await {
        Ok(route) => route,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Route query failed, summary will have no route");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Store stub that misses a fixed number of times before committing.
    #[derive(Clone)]
    struct DelayedStore {
        misses: Arc<AtomicU32>,
        record: WorkoutRecord,
        route_fails: bool,
    }

    impl DelayedStore {
        fn new(misses: u32, route_fails: bool) -> Self {
            let now = Utc::now();
            Self {
                misses: Arc::new(AtomicU32::new(misses)),
                record: WorkoutRecord {
                    session_id: SessionId::new("ws-rec"),
                    start_date: now - chrono::Duration::seconds(600),
                    end_date: now,
                    active: Duration::from_secs(540),
                    distance_m: 2000.0,
                    cadence_spm: Some(170.0),
                    elevation_gain_m: None,
                },
                route_fails,
            }
        }
    }

    impl HealthStore for DelayedStore {
        async fn query_workout(
            &self,
            _session_id: &SessionId,
        ) -> Result<Option<WorkoutRecord>, StoreError> {
            if self.misses.load(Ordering::SeqCst) > 0 {
                self.misses.fetch_sub(1, Ordering::SeqCst);
                Ok(None)
            } else {
                Ok(Some(self.record.clone()))
            }
        }

        async fn query_route(
            &self,
            _session_id: &SessionId,
        ) -> Result<Vec<RoutePoint>, StoreError> {
            if self.route_fails {
                Err(StoreError::Query("route unavailable".to_string()))
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn fast_policy() -> ReconcilePolicy {
        ReconcilePolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        }
    }

    #[tokio::test]
    async fn test_reconcile_retries_until_commit() {
        let store = DelayedStore::new(3, false);
        let cancel = CancellationToken::new();

        let summary = reconcile(&store, SessionId::new("ws-rec"), &fast_policy(), &cancel)
            .await
            .expect("record appears on fourth attempt");

        assert_eq!(summary.elapsed, Duration::from_secs(600));
        assert_eq!(summary.paused, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_reconcile_gives_up_after_max_attempts() {
        let store = DelayedStore::new(100, false);
        let cancel = CancellationToken::new();

        let result = reconcile(&store, SessionId::new("ws-rec"), &fast_policy(), &cancel).await;

        assert!(matches!(
            result,
            Err(ReconcileError::NotFound { attempts: 5 })
        ));
    }

    #[tokio::test]
    async fn test_route_failure_degrades_to_empty_route() {
        let store = DelayedStore::new(0, true);
        let cancel = CancellationToken::new();

        let summary = reconcile(&store, SessionId::new("ws-rec"), &fast_policy(), &cancel)
            .await
            .expect("summary despite route failure");

        assert!(summary.route.is_empty());
    }

    #[tokio::test]
    async fn test_authorization_revoked_is_terminal() {
        #[derive(Clone)]
        struct RevokedStore {
            calls: Arc<AtomicU32>,
        }

        impl HealthStore for RevokedStore {
            async fn query_workout(
                &self,
                _session_id: &SessionId,
            ) -> Result<Option<WorkoutRecord>, StoreError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::AuthorizationRevoked)
            }

            async fn query_route(
                &self,
                _session_id: &SessionId,
            ) -> Result<Vec<RoutePoint>, StoreError> {
                Ok(Vec::new())
            }
        }

        let store = RevokedStore {
            calls: Arc::new(AtomicU32::new(0)),
        };
        let cancel = CancellationToken::new();

        let result = reconcile(&store, SessionId::new("ws-rec"), &fast_policy(), &cancel).await;

        assert!(matches!(result, Err(ReconcileError::Authorization)));
        // No retries after revocation.
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_backoff() {
        let store = DelayedStore::new(100, false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let policy = ReconcilePolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
        };

        let result = reconcile(&store, SessionId::new("ws-rec"), &policy, &cancel).await;
        assert!(matches!(result, Err(ReconcileError::Cancelled)));
    }
}
