//! Scriptable collaborators for tests and local development.
//!
//! Available with the `mock` feature (and always inside this crate's tests).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Semaphore};

use crate::position::{GeoPositionSource, PermissionStatus, PositionError};
use crate::types::{Coordinate, PositionAccuracy, PositionSample};
use crate::unlock::{ActuatorError, UnlockActuator};

enum ScriptedPermission {
    Ready(PermissionStatus),
    Pending(oneshot::Receiver<PermissionStatus>),
    Hang,
}

enum ScriptedFix {
    Ready(Result<PositionSample, PositionError>),
    Pending(oneshot::Receiver<Result<PositionSample, PositionError>>),
    Hang,
}

/// A [`GeoPositionSource`] that plays back queued answers.
///
/// Permission requests pop from the permission queue and default to
/// `Granted`; position requests pop from the fix queue and default to
/// `Unavailable`.
#[derive(Default)]
pub struct MockPositionSource {
    permissions: Mutex<VecDeque<ScriptedPermission>>,
    fixes: Mutex<VecDeque<ScriptedFix>>,
    permission_requests: AtomicUsize,
    sample_requests: AtomicUsize,
}

impl MockPositionSource {
    /// Create a source with empty queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an answer to the next permission request.
    pub fn push_permission(&self, status: PermissionStatus) {
        self.permissions
            .lock()
            .push_back(ScriptedPermission::Ready(status));
    }

    /// Queue a permission answer that resolves when the returned sender fires.
    pub fn push_permission_pending(&self) -> oneshot::Sender<PermissionStatus> {
        let (tx, rx) = oneshot::channel();
        self.permissions
            .lock()
            .push_back(ScriptedPermission::Pending(rx));
        tx
    }

    /// Queue a permission prompt that is never answered.
    pub fn push_permission_hang(&self) {
        self.permissions.lock().push_back(ScriptedPermission::Hang);
    }

    /// Queue a fix at `coordinate`.
    pub fn push_fix(&self, coordinate: Coordinate) {
        self.fixes
            .lock()
            .push_back(ScriptedFix::Ready(Ok(PositionSample::now(coordinate, 5.0))));
    }

    /// Queue a sensor error.
    pub fn push_error(&self, error: PositionError) {
        self.fixes.lock().push_back(ScriptedFix::Ready(Err(error)));
    }

    /// Queue a fix that resolves when the returned sender fires.
    pub fn push_pending(&self) -> oneshot::Sender<Result<PositionSample, PositionError>> {
        let (tx, rx) = oneshot::channel();
        self.fixes.lock().push_back(ScriptedFix::Pending(rx));
        tx
    }

    /// Queue a fix that never resolves.
    pub fn push_hang(&self) {
        self.fixes.lock().push_back(ScriptedFix::Hang);
    }

    /// Number of permission requests seen.
    #[must_use]
    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    /// Number of position requests seen.
    #[must_use]
    pub fn sample_requests(&self) -> usize {
        self.sample_requests.load(Ordering::SeqCst)
    }

    /// Yield until at least `count` permission requests have been made.
    pub async fn wait_for_permission_requests(&self, count: usize) {
        while self.permission_requests() < count {
            tokio::task::yield_now().await;
        }
    }

    /// Yield until at least `count` position requests have been made.
    pub async fn wait_for_sample_requests(&self, count: usize) {
        while self.sample_requests() < count {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl GeoPositionSource for MockPositionSource {
    async fn request_permission(&self) -> PermissionStatus {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        let next = self.permissions.lock().pop_front();
        match next {
            Some(ScriptedPermission::Ready(status)) => status,
            Some(ScriptedPermission::Pending(rx)) => rx.await.unwrap_or(PermissionStatus::Denied),
            Some(ScriptedPermission::Hang) => std::future::pending().await,
            None => PermissionStatus::Granted,
        }
    }

    async fn current_position(
        &self,
        _accuracy: PositionAccuracy,
    ) -> Result<PositionSample, PositionError> {
        self.sample_requests.fetch_add(1, Ordering::SeqCst);
        let next = self.fixes.lock().pop_front();
        match next {
            Some(ScriptedFix::Ready(result)) => result,
            Some(ScriptedFix::Pending(rx)) => rx.await.unwrap_or(Err(PositionError::Unavailable)),
            Some(ScriptedFix::Hang) => std::future::pending().await,
            None => Err(PositionError::Unavailable),
        }
    }
}

/// An [`UnlockActuator`] that counts commands and can be held open.
pub struct MockActuator {
    calls: AtomicUsize,
    failure: Mutex<Option<ActuatorError>>,
    latency: Duration,
    gate: Option<Arc<Semaphore>>,
}

impl MockActuator {
    /// An actuator that succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failure: Mutex::new(None),
            latency: Duration::ZERO,
            gate: None,
        }
    }

    /// An actuator that takes `latency` per command.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::new()
        }
    }

    /// An actuator whose commands block until [`release`](Self::release).
    #[must_use]
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    /// Let one blocked command complete.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Make every following command fail with `error`.
    pub fn fail_with(&self, error: ActuatorError) {
        *self.failure.lock() = Some(error);
    }

    /// Number of commands received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Yield until at least `count` commands have arrived.
    pub async fn wait_for_calls(&self, count: usize) {
        while self.calls() < count {
            tokio::task::yield_now().await;
        }
    }
}

impl Default for MockActuator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UnlockActuator for MockActuator {
    async fn send_unlock_command(&self, _property_id: &str) -> Result<(), ActuatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let failure = self.failure.lock().clone();
        failure.map_or(Ok(()), Err)
    }
}
