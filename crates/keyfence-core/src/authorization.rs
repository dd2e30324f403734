//! The authorization state machine.
//!
//! One [`AuthorizationStateMachine`] exists per session. It requests location
//! permission, takes a single highest-accuracy fix, measures the distance to
//! the property and records the resulting [`Verdict`].
//!
//! ## Concurrency
//!
//! - Each evaluation cycle gets a fresh sequence number. Permission and sample
//!   results are applied only while their sequence is the session's in-flight
//!   sequence; anything else is counted as stale and dropped.
//! - A cycle runs on its own task, so a caller that stops waiting cannot leave
//!   the session wedged in `AwaitingPermission` or `SamplingPosition`.
//! - The sampling deadline settles the cycle as `SampleFailed(Timeout)` without
//!   cancelling the external request; its late answer is discarded on arrival.
//! - An unanswered permission prompt is dropped at its deadline and the cycle
//!   settles as `PermissionDenied`, from which `retry` asks again.
//! - [`close`](AuthorizationStateMachine::close) marks the session torn down;
//!   pending results are then discarded at the point of application.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{KeyfenceError, Result};
use crate::geo::distance_meters;
use crate::position::{GeoPositionSource, PermissionStatus, PositionError};
use crate::session::{AuthorizationSession, SessionState, Verdict, DEFAULT_GEOFENCE_RADIUS_M};
use crate::types::{PositionAccuracy, PositionSample, PropertyTarget};

/// Default deadline for a single position fix.
pub const DEFAULT_SAMPLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default deadline for the user to answer the permission prompt.
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables for an evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationSettings {
    /// Geofence radius in meters (closed bound).
    pub radius_m: f64,
    /// Deadline for one position fix.
    pub sample_timeout: Duration,
    /// Deadline for the permission prompt; expiry counts as denied.
    pub permission_timeout: Duration,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            radius_m: DEFAULT_GEOFENCE_RADIUS_M,
            sample_timeout: DEFAULT_SAMPLE_TIMEOUT,
            permission_timeout: DEFAULT_PERMISSION_TIMEOUT,
        }
    }
}

impl From<&Config> for EvaluationSettings {
    fn from(config: &Config) -> Self {
        Self {
            radius_m: config.geofence.radius_m,
            sample_timeout: Duration::from_secs(config.position.sample_timeout_secs),
            permission_timeout: Duration::from_secs(config.position.permission_timeout_secs),
        }
    }
}

/// Who produced a result being applied to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// An answer from the position source.
    Source,
    /// A deadline or a lost task settling the cycle locally.
    Deadline,
}

/// Where a new cycle starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleEntry {
    Permission,
    Sampling,
}

#[derive(Debug, Default)]
struct SessionInner {
    state: SessionState,
    sequence: u64,
    in_flight: Option<u64>,
    unlock_in_flight: bool,
    closed: bool,
    stale_responses: u64,
}

/// Per-session decision engine.
pub struct AuthorizationStateMachine {
    id: Uuid,
    target: PropertyTarget,
    settings: EvaluationSettings,
    source: Arc<dyn GeoPositionSource>,
    created_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
}

impl std::fmt::Debug for AuthorizationStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationStateMachine")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("settings", &self.settings)
            .field("inner", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}

impl AuthorizationStateMachine {
    /// Open a session for `target`, reading positions from `source`.
    #[must_use]
    pub fn new(
        target: PropertyTarget,
        source: Arc<dyn GeoPositionSource>,
        settings: EvaluationSettings,
    ) -> Arc<Self> {
        let id = Uuid::new_v4();
        info!(session_id = %id, property_id = %target.id, "Opened authorization session");
        Arc::new(Self {
            id,
            target,
            settings,
            source,
            created_at: Utc::now(),
            inner: Mutex::new(SessionInner::default()),
        })
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The property this session authorizes.
    #[must_use]
    pub const fn target(&self) -> &PropertyTarget {
        &self.target
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Verdict of the last completed cycle.
    #[must_use]
    pub fn last_verdict(&self) -> Option<Verdict> {
        self.inner.lock().state.verdict()
    }

    /// Number of permission/sample results discarded as stale or late.
    #[must_use]
    pub fn stale_responses(&self) -> u64 {
        self.inner.lock().stale_responses
    }

    /// Returns `true` once the session has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Consistent snapshot of state and verdict.
    #[must_use]
    pub fn snapshot(&self) -> AuthorizationSession {
        let inner = self.inner.lock();
        AuthorizationSession::new(
            self.id,
            self.target.clone(),
            inner.state,
            inner.sequence,
            self.settings.radius_m,
            self.created_at,
        )
    }

    /// Start an evaluation from `Idle` or a retryable terminal state.
    ///
    /// # Errors
    ///
    /// - [`KeyfenceError::EvaluationInProgress`] while a cycle is running
    /// - [`KeyfenceError::InvalidStateTransition`] from `Evaluated`
    /// - [`KeyfenceError::SessionClosed`] after teardown
    pub async fn begin_evaluation(self: &Arc<Self>) -> Result<AuthorizationSession> {
        let (sequence, entry) = self.start_cycle("begin_evaluation", |state| match state {
            SessionState::AwaitingPermission | SessionState::SamplingPosition => {
                Err(KeyfenceError::EvaluationInProgress)
            }
            SessionState::Idle
            | SessionState::PermissionDenied
            | SessionState::SampleFailed { .. } => Ok(CycleEntry::Permission),
            SessionState::Evaluated { .. } => Err(invalid("begin_evaluation", state)),
        })?;
        self.run_cycle(sequence, entry).await
    }

    /// Re-enter evaluation from `PermissionDenied` or `SampleFailed`.
    ///
    /// A denied permission is asked again. A failed sample is taken again
    /// directly, unless the failure was a revoked permission.
    ///
    /// # Errors
    ///
    /// [`KeyfenceError::InvalidStateTransition`] from any other state;
    /// [`KeyfenceError::SessionClosed`] after teardown.
    pub async fn retry(self: &Arc<Self>) -> Result<AuthorizationSession> {
        let (sequence, entry) = self.start_cycle("retry", |state| match state {
            SessionState::PermissionDenied
            | SessionState::SampleFailed {
                reason: PositionError::PermissionRevoked,
            } => Ok(CycleEntry::Permission),
            SessionState::SampleFailed { .. } => Ok(CycleEntry::Sampling),
            _ => Err(invalid("retry", state)),
        })?;
        self.run_cycle(sequence, entry).await
    }

    /// Check the location again after a completed evaluation.
    ///
    /// # Errors
    ///
    /// [`KeyfenceError::InvalidStateTransition`] unless the state is
    /// `Evaluated`; [`KeyfenceError::SessionClosed`] after teardown.
    pub async fn refresh(self: &Arc<Self>) -> Result<AuthorizationSession> {
        let (sequence, entry) = self.start_cycle("refresh", |state| match state {
            SessionState::Evaluated { .. } => Ok(CycleEntry::Permission),
            _ => Err(invalid("refresh", state)),
        })?;
        self.run_cycle(sequence, entry).await
    }

    /// Tear the session down. Results still in flight are discarded on arrival.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.in_flight = None;
        info!(session_id = %self.id, state = inner.state.name(), "Closed authorization session");
    }

    /// Reserve the session's single unlock slot.
    ///
    /// # Errors
    ///
    /// - [`KeyfenceError::SessionClosed`] after teardown
    /// - [`KeyfenceError::NotAuthorized`] unless the last verdict is eligible
    /// - [`KeyfenceError::AlreadyInProgress`] while another unlock is pending
    pub(crate) fn begin_unlock(self: &Arc<Self>) -> Result<UnlockPermit> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(KeyfenceError::SessionClosed);
        }
        match inner.state.verdict() {
            Some(Verdict::Eligible { .. }) => {}
            other => {
                return Err(KeyfenceError::NotAuthorized {
                    property_id: self.target.id.clone(),
                    verdict: other.map_or("none", |v| v.name()).to_string(),
                });
            }
        }
        if inner.unlock_in_flight {
            return Err(KeyfenceError::AlreadyInProgress {
                property_id: self.target.id.clone(),
            });
        }
        inner.unlock_in_flight = true;
        Ok(UnlockPermit {
            session: Arc::clone(self),
        })
    }

    fn start_cycle(
        &self,
        operation: &'static str,
        entry_for: impl FnOnce(&SessionState) -> Result<CycleEntry>,
    ) -> Result<(u64, CycleEntry)> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(KeyfenceError::SessionClosed);
        }
        let entry = entry_for(&inner.state)?;

        inner.sequence += 1;
        let sequence = inner.sequence;
        inner.in_flight = Some(sequence);
        inner.state = match entry {
            CycleEntry::Permission => SessionState::AwaitingPermission,
            CycleEntry::Sampling => SessionState::SamplingPosition,
        };
        info!(
            session_id = %self.id,
            operation,
            sequence,
            state = inner.state.name(),
            "Started evaluation cycle"
        );
        Ok((sequence, entry))
    }

    async fn run_cycle(
        self: &Arc<Self>,
        sequence: u64,
        entry: CycleEntry,
    ) -> Result<AuthorizationSession> {
        let machine = Arc::clone(self);
        tokio::spawn(async move { machine.drive(sequence, entry).await })
            .await
            .map_err(|e| KeyfenceError::Internal(format!("evaluation task failed: {e}")))?;

        if self.is_closed() {
            return Err(KeyfenceError::SessionClosed);
        }
        Ok(self.snapshot())
    }

    async fn drive(self: Arc<Self>, sequence: u64, entry: CycleEntry) {
        if entry == CycleEntry::Permission {
            let prompt = timeout(
                self.settings.permission_timeout,
                self.source.request_permission(),
            )
            .await;
            let granted = match prompt {
                Ok(status) => self.apply_permission(sequence, status, Origin::Source),
                Err(_) => {
                    warn!(
                        session_id = %self.id,
                        sequence,
                        timeout_secs = self.settings.permission_timeout.as_secs_f64(),
                        "Permission prompt went unanswered"
                    );
                    self.apply_permission(sequence, PermissionStatus::Denied, Origin::Deadline)
                }
            };
            if !granted {
                return;
            }
        }

        let (done_tx, done_rx) = oneshot::channel();
        let machine = Arc::clone(&self);
        tokio::spawn(async move {
            let result = machine
                .source
                .current_position(PositionAccuracy::Highest)
                .await;
            machine.apply_sample(sequence, result, Origin::Source);
            let _ = done_tx.send(());
        });

        match timeout(self.settings.sample_timeout, done_rx).await {
            Ok(Ok(())) => {}
            // The sampling task died without reporting.
            Ok(Err(_)) => {
                self.apply_sample(sequence, Err(PositionError::Unavailable), Origin::Deadline);
            }
            Err(_) => {
                warn!(
                    session_id = %self.id,
                    sequence,
                    timeout_secs = self.settings.sample_timeout.as_secs_f64(),
                    "Position fix timed out"
                );
                self.apply_sample(sequence, Err(PositionError::Timeout), Origin::Deadline);
            }
        }
    }

    /// Returns `true` if the cycle should go on to sampling.
    fn apply_permission(&self, sequence: u64, status: PermissionStatus, origin: Origin) -> bool {
        let mut inner = self.inner.lock();
        if !self.accepts(&mut inner, sequence, "permission", origin) {
            return false;
        }
        match status {
            PermissionStatus::Granted => {
                inner.state = SessionState::SamplingPosition;
                debug!(session_id = %self.id, sequence, "Location permission granted");
                true
            }
            PermissionStatus::Denied => {
                inner.state = SessionState::PermissionDenied;
                inner.in_flight = None;
                info!(session_id = %self.id, sequence, "Location permission denied");
                false
            }
        }
    }

    fn apply_sample(
        &self,
        sequence: u64,
        result: std::result::Result<PositionSample, PositionError>,
        origin: Origin,
    ) {
        let next = match &result {
            Ok(sample) => SessionState::evaluated(
                distance_meters(&sample.coordinate, &self.target.location),
                self.settings.radius_m,
            ),
            Err(reason) => SessionState::SampleFailed { reason: *reason },
        };

        let mut inner = self.inner.lock();
        if !self.accepts(&mut inner, sequence, "sample", origin) {
            return;
        }
        inner.state = next;
        inner.in_flight = None;

        match next.verdict() {
            Some(Verdict::SampleUnavailable { reason }) => {
                warn!(session_id = %self.id, sequence, %reason, "Position sample unavailable");
            }
            Some(verdict) => {
                let accuracy_m = result.as_ref().map(|s| s.accuracy_m).ok();
                info!(
                    session_id = %self.id,
                    property_id = %self.target.id,
                    sequence,
                    verdict = verdict.name(),
                    distance_m = verdict.distance_m(),
                    accuracy_m,
                    radius_m = self.settings.radius_m,
                    "Evaluated proximity"
                );
            }
            None => {}
        }
    }

    /// Decide whether a result for `sequence` may be applied. Stale source
    /// answers and answers for a closed session are counted and rejected; a
    /// deadline that lost the race to the answer is rejected silently.
    fn accepts(
        &self,
        inner: &mut SessionInner,
        sequence: u64,
        kind: &'static str,
        origin: Origin,
    ) -> bool {
        if !inner.closed && inner.in_flight == Some(sequence) {
            return true;
        }
        if origin == Origin::Deadline {
            return false;
        }
        inner.stale_responses += 1;
        debug!(
            session_id = %self.id,
            sequence,
            current = inner.sequence,
            closed = inner.closed,
            kind,
            "Discarded stale result"
        );
        false
    }
}

fn invalid(operation: &'static str, state: &SessionState) -> KeyfenceError {
    KeyfenceError::InvalidStateTransition {
        operation,
        state: state.name(),
    }
}

/// Holds a session's unlock slot; released on drop.
pub(crate) struct UnlockPermit {
    session: Arc<AuthorizationStateMachine>,
}

impl UnlockPermit {
    pub(crate) fn session_closed(&self) -> bool {
        self.session.is_closed()
    }
}

impl Drop for UnlockPermit {
    fn drop(&mut self) {
        self.session.inner.lock().unlock_in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPositionSource;
    use crate::types::Coordinate;
    use tokio_test::{assert_err, assert_ok};

    const HOME: (f64, f64) = (37.7749, -122.4194);

    fn target() -> PropertyTarget {
        PropertyTarget::new("12", Coordinate::new(HOME.0, HOME.1).unwrap())
    }

    /// A point `meters` north of the property.
    fn north_of_home(meters: f64) -> Coordinate {
        let dlat = (meters / crate::geo::EARTH_MEAN_RADIUS_M).to_degrees();
        Coordinate::new(HOME.0 + dlat, HOME.1).unwrap()
    }

    fn machine(source: &Arc<MockPositionSource>) -> Arc<AuthorizationStateMachine> {
        AuthorizationStateMachine::new(target(), source.clone(), EvaluationSettings::default())
    }

    #[tokio::test]
    async fn test_fix_inside_geofence_is_eligible() {
        let source = Arc::new(MockPositionSource::new());
        source.push_fix(north_of_home(10.0));
        let session = machine(&source);

        let snapshot = assert_ok!(session.begin_evaluation().await);
        assert!(snapshot.can_unlock());
        let distance = snapshot.last_verdict.unwrap().distance_m().unwrap();
        assert!((distance - 10.0).abs() < 0.01, "got {distance}");
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(source.permission_requests(), 1);
        assert_eq!(source.sample_requests(), 1);
    }

    #[tokio::test]
    async fn test_fix_outside_geofence_is_ineligible() {
        let source = Arc::new(MockPositionSource::new());
        source.push_fix(north_of_home(30.5));
        let session = machine(&source);

        let snapshot = assert_ok!(session.begin_evaluation().await);
        assert!(matches!(
            snapshot.last_verdict,
            Some(Verdict::Ineligible { distance_m }) if distance_m > 30.0
        ));
    }

    #[tokio::test]
    async fn test_denied_permission_stops_without_sampling() {
        let source = Arc::new(MockPositionSource::new());
        source.push_permission(PermissionStatus::Denied);
        let session = machine(&source);

        let snapshot = assert_ok!(session.begin_evaluation().await);
        assert_eq!(snapshot.state, SessionState::PermissionDenied);
        assert_eq!(snapshot.last_verdict, Some(Verdict::PermissionDenied));
        assert_eq!(source.sample_requests(), 0);
    }

    #[tokio::test]
    async fn test_retry_after_denial_reaches_eligible() {
        let source = Arc::new(MockPositionSource::new());
        source.push_permission(PermissionStatus::Denied);
        let session = machine(&source);
        assert_ok!(session.begin_evaluation().await);

        source.push_permission(PermissionStatus::Granted);
        source.push_fix(north_of_home(5.0));
        let snapshot = assert_ok!(session.retry().await);

        assert_eq!(source.permission_requests(), 2);
        assert!(snapshot.can_unlock());
        assert_eq!(snapshot.sequence, 2);
    }

    #[tokio::test]
    async fn test_retry_after_sample_failure_skips_permission() {
        let source = Arc::new(MockPositionSource::new());
        source.push_error(PositionError::Unavailable);
        let session = machine(&source);

        let snapshot = assert_ok!(session.begin_evaluation().await);
        assert_eq!(
            snapshot.last_verdict,
            Some(Verdict::SampleUnavailable {
                reason: PositionError::Unavailable
            })
        );

        source.push_fix(north_of_home(1.0));
        let snapshot = assert_ok!(session.retry().await);
        assert!(snapshot.can_unlock());
        assert_eq!(source.permission_requests(), 1);
        assert_eq!(source.sample_requests(), 2);
    }

    #[tokio::test]
    async fn test_retry_after_revoked_permission_asks_again() {
        let source = Arc::new(MockPositionSource::new());
        source.push_error(PositionError::PermissionRevoked);
        let session = machine(&source);
        assert_ok!(session.begin_evaluation().await);

        source.push_fix(north_of_home(1.0));
        assert_ok!(session.retry().await);
        assert_eq!(source.permission_requests(), 2);
    }

    #[tokio::test]
    async fn test_retry_is_rejected_outside_retryable_states() {
        let source = Arc::new(MockPositionSource::new());
        let session = machine(&source);

        let err = assert_err!(session.retry().await);
        assert!(matches!(
            err,
            KeyfenceError::InvalidStateTransition { operation: "retry", state: "idle" }
        ));

        source.push_fix(north_of_home(1.0));
        assert_ok!(session.begin_evaluation().await);
        let err = assert_err!(session.retry().await);
        assert!(matches!(
            err,
            KeyfenceError::InvalidStateTransition { state: "evaluated", .. }
        ));
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_begin_from_evaluated_is_rejected_but_refresh_works() {
        let source = Arc::new(MockPositionSource::new());
        source.push_fix(north_of_home(50.0));
        let session = machine(&source);
        assert_ok!(session.begin_evaluation().await);

        let err = assert_err!(session.begin_evaluation().await);
        assert!(matches!(err, KeyfenceError::InvalidStateTransition { .. }));

        source.push_fix(north_of_home(2.0));
        let snapshot = assert_ok!(session.refresh().await);
        assert!(snapshot.can_unlock());
    }

    #[tokio::test]
    async fn test_second_begin_while_sampling_is_rejected() {
        let source = Arc::new(MockPositionSource::new());
        let release = source.push_pending();
        let session = machine(&source);

        let first = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.begin_evaluation().await }
        });
        source.wait_for_sample_requests(1).await;
        assert_eq!(session.state(), SessionState::SamplingPosition);

        let err = assert_err!(session.begin_evaluation().await);
        assert!(matches!(err, KeyfenceError::EvaluationInProgress));
        let err = assert_err!(session.retry().await);
        assert!(matches!(
            err,
            KeyfenceError::InvalidStateTransition { state: "sampling_position", .. }
        ));

        release
            .send(Ok(PositionSample::now(north_of_home(3.0), 5.0)))
            .unwrap();
        let snapshot = assert_ok!(first.await.unwrap());
        assert!(snapshot.can_unlock());
        assert_eq!(source.sample_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_deadline_settles_as_timeout() {
        let source = Arc::new(MockPositionSource::new());
        source.push_hang();
        let session = machine(&source);

        let snapshot = assert_ok!(session.begin_evaluation().await);
        assert_eq!(
            snapshot.state,
            SessionState::SampleFailed {
                reason: PositionError::Timeout
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_sample_does_not_overwrite_newer_verdict() {
        let source = Arc::new(MockPositionSource::new());
        let late = source.push_pending();
        let session = machine(&source);

        // First cycle times out while its fix is still outstanding.
        let snapshot = assert_ok!(session.begin_evaluation().await);
        assert_eq!(
            snapshot.state,
            SessionState::SampleFailed {
                reason: PositionError::Timeout
            }
        );

        // Retry produces a newer verdict.
        source.push_fix(north_of_home(80.0));
        let snapshot = assert_ok!(session.retry().await);
        assert_eq!(snapshot.sequence, 2);
        assert!(!snapshot.can_unlock());

        // The first cycle's eligible fix finally arrives.
        late.send(Ok(PositionSample::now(north_of_home(1.0), 3.0)))
            .unwrap();
        while session.stale_responses() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            session.last_verdict(),
            Some(Verdict::Ineligible { .. })
        ));
        assert_eq!(session.snapshot().sequence, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_permission_prompt_settles_as_denied() {
        let source = Arc::new(MockPositionSource::new());
        source.push_permission_hang();
        let session = machine(&source);

        let snapshot = assert_ok!(session.begin_evaluation().await);
        assert_eq!(snapshot.state, SessionState::PermissionDenied);
        assert_eq!(snapshot.last_verdict, Some(Verdict::PermissionDenied));
        assert_eq!(source.sample_requests(), 0);
        assert_eq!(session.stale_responses(), 0);

        source.push_fix(north_of_home(4.0));
        let snapshot = assert_ok!(session.retry().await);
        assert!(snapshot.can_unlock());
        assert_eq!(source.permission_requests(), 2);
    }

    #[tokio::test]
    async fn test_retry_after_denial_waits_for_permission() {
        let source = Arc::new(MockPositionSource::new());
        source.push_permission(PermissionStatus::Denied);
        let session = machine(&source);
        assert_ok!(session.begin_evaluation().await);

        let answer = source.push_permission_pending();
        source.push_fix(north_of_home(5.0));
        let retry = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.retry().await }
        });
        source.wait_for_permission_requests(2).await;
        assert_eq!(session.state(), SessionState::AwaitingPermission);
        assert!(session.last_verdict().is_none());

        answer.send(PermissionStatus::Granted).unwrap();
        let snapshot = assert_ok!(retry.await.unwrap());
        assert!(snapshot.can_unlock());
        assert_eq!(source.sample_requests(), 1);
    }

    #[tokio::test]
    async fn test_geofence_boundary_is_inclusive() {
        let fix = north_of_home(30.0);
        let distance = distance_meters(&fix, &target().location);
        assert!((distance - 30.0).abs() < 1e-6, "got {distance}");

        // Radius equal to the measured distance: on the line counts as inside.
        let source = Arc::new(MockPositionSource::new());
        source.push_fix(fix);
        let session = AuthorizationStateMachine::new(
            target(),
            source.clone(),
            EvaluationSettings {
                radius_m: distance,
                ..EvaluationSettings::default()
            },
        );
        let snapshot = assert_ok!(session.begin_evaluation().await);
        assert!(snapshot.can_unlock());

        let source = Arc::new(MockPositionSource::new());
        source.push_fix(north_of_home(29.999));
        let snapshot = assert_ok!(machine(&source).begin_evaluation().await);
        assert!(snapshot.can_unlock());

        let source = Arc::new(MockPositionSource::new());
        source.push_fix(north_of_home(30.001));
        let snapshot = assert_ok!(machine(&source).begin_evaluation().await);
        assert!(!snapshot.can_unlock());
    }

    #[test]
    fn test_deadline_losing_race_is_not_counted_stale() {
        let source = Arc::new(MockPositionSource::new());
        let session = machine(&source);
        let (sequence, _) = session
            .start_cycle("begin_evaluation", |_| Ok(CycleEntry::Sampling))
            .unwrap();

        session.apply_sample(
            sequence,
            Ok(PositionSample::now(north_of_home(2.0), 4.0)),
            Origin::Source,
        );
        session.apply_sample(sequence, Err(PositionError::Timeout), Origin::Deadline);
        assert_eq!(session.stale_responses(), 0);
        assert!(session.snapshot().can_unlock());

        // A second answer for the same cycle is stale.
        session.apply_sample(sequence, Err(PositionError::Unavailable), Origin::Source);
        assert_eq!(session.stale_responses(), 1);
        assert!(session.snapshot().can_unlock());
    }

    #[tokio::test]
    async fn test_close_discards_pending_sample() {
        let source = Arc::new(MockPositionSource::new());
        let release = source.push_pending();
        let session = machine(&source);

        let pending = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.begin_evaluation().await }
        });
        source.wait_for_sample_requests(1).await;

        session.close();
        release
            .send(Ok(PositionSample::now(north_of_home(1.0), 3.0)))
            .unwrap();

        let err = assert_err!(pending.await.unwrap());
        assert!(matches!(err, KeyfenceError::SessionClosed));
        assert_eq!(session.state(), SessionState::SamplingPosition);
        assert!(session.last_verdict().is_none());
        assert_eq!(session.stale_responses(), 1);

        let err = assert_err!(session.begin_evaluation().await);
        assert!(matches!(err, KeyfenceError::SessionClosed));
    }

    #[tokio::test]
    async fn test_re_evaluation_clears_previous_verdict() {
        let source = Arc::new(MockPositionSource::new());
        source.push_fix(north_of_home(1.0));
        let session = machine(&source);
        assert_ok!(session.begin_evaluation().await);
        assert!(session.snapshot().can_unlock());

        let release = source.push_pending();
        let pending = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.refresh().await }
        });
        source.wait_for_sample_requests(2).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, SessionState::SamplingPosition);
        assert!(snapshot.last_verdict.is_none());
        assert!(!snapshot.can_unlock());

        release.send(Err(PositionError::Unavailable)).unwrap();
        let snapshot = assert_ok!(pending.await.unwrap());
        assert_eq!(
            snapshot.last_verdict,
            Some(Verdict::SampleUnavailable {
                reason: PositionError::Unavailable
            })
        );
    }
}
