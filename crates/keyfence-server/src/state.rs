//! Application state shared across handlers.
//!
//! Each open session is an [`AuthorizationStateMachine`] fed by its own
//! [`ReportedPositionSource`]. A per-session gate serializes location checks so
//! that a device report is only ever consumed by the evaluation it was sent
//! with.
//!
//! Sessions left untouched for longer than `server.session_ttl_secs` are
//! closed and dropped, both lazily when a new session opens and by a periodic
//! sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keyfence_core::{
    catalog_from_config, AuthorizationSession, AuthorizationStateMachine, Config,
    EvaluationSettings, GeoPositionSource, KeyfenceError, PositionReport, PropertyCatalog,
    ReportedPositionSource, Result, RetryController, RetryPolicy, UnlockCommandExecutor,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::info;
use uuid::Uuid;

/// Shared application state handle.
pub type SharedState = Arc<AppState>;

/// A live session and the device-report channel feeding it.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// The session's decision engine.
    pub machine: Arc<AuthorizationStateMachine>,
    source: Arc<ReportedPositionSource>,
    gate: Arc<Mutex<()>>,
    last_active: Arc<parking_lot::Mutex<Instant>>,
}

impl SessionEntry {
    /// Run one location check with `report` as the device's answer.
    ///
    /// # Errors
    ///
    /// [`KeyfenceError::EvaluationInProgress`] if another check for this
    /// session is running, otherwise whatever `check` reports.
    pub async fn check_with_report<F, Fut>(
        &self,
        report: PositionReport,
        check: F,
    ) -> Result<AuthorizationSession>
    where
        F: FnOnce(Arc<AuthorizationStateMachine>) -> Fut,
        Fut: std::future::Future<Output = Result<AuthorizationSession>>,
    {
        let _guard = self.try_gate()?;
        self.source.submit(report);
        let result = check(Arc::clone(&self.machine)).await;
        if result.is_err() {
            self.source.discard();
        }
        self.touch();
        result
    }

    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// Idle past `ttl` and not in the middle of a location check.
    fn expired(&self, now: Instant, ttl: Duration) -> bool {
        let idle = now.saturating_duration_since(*self.last_active.lock());
        idle > ttl && self.gate.try_lock().is_ok()
    }

    fn try_gate(&self) -> Result<OwnedMutexGuard<()>> {
        Arc::clone(&self.gate)
            .try_lock_owned()
            .map_err(|_| KeyfenceError::EvaluationInProgress)
    }

    fn close(&self) {
        self.machine.close();
        self.source.discard();
    }
}

/// Shared application state.
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// Property lookup.
    pub catalog: Arc<dyn PropertyCatalog>,
    /// Unlock gate.
    pub executor: UnlockCommandExecutor,
    /// Manual retry entry point.
    pub retry: RetryController,
    /// When the server started.
    pub started_at: DateTime<Utc>,
    session_ttl: Duration,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl AppState {
    /// Assemble state from explicit collaborators.
    #[must_use]
    pub fn new(
        config: Config,
        catalog: Arc<dyn PropertyCatalog>,
        executor: UnlockCommandExecutor,
    ) -> SharedState {
        let retry = RetryController::new(RetryPolicy::from(&config));
        let session_ttl = Duration::from_secs(config.server.session_ttl_secs);
        Arc::new(Self {
            config,
            catalog,
            executor,
            retry,
            started_at: Utc::now(),
            session_ttl,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Build the catalog and actuator the configuration describes.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured backend cannot be constructed.
    pub fn from_config(config: Config) -> Result<SharedState> {
        let catalog = catalog_from_config(&config.catalog)?;
        let executor = UnlockCommandExecutor::from_config(&config)?;
        Ok(Self::new(config, catalog, executor))
    }

    /// Open a session for a property.
    ///
    /// # Errors
    ///
    /// Catalog errors: invalid id, unknown property, malformed coordinates or
    /// an unreachable catalog.
    pub async fn open_session(&self, property_id: &str) -> Result<AuthorizationSession> {
        self.evict_idle().await;
        let target = self.catalog.fetch_property(property_id).await?;
        let source = Arc::new(ReportedPositionSource::new());
        let machine = AuthorizationStateMachine::new(
            target,
            Arc::clone(&source) as Arc<dyn GeoPositionSource>,
            EvaluationSettings::from(&self.config),
        );
        let snapshot = machine.snapshot();
        let entry = SessionEntry {
            machine,
            source,
            gate: Arc::new(Mutex::new(())),
            last_active: Arc::new(parking_lot::Mutex::new(Instant::now())),
        };
        self.sessions.write().await.insert(snapshot.id, entry);
        Ok(snapshot)
    }

    /// Look up a live session.
    ///
    /// # Errors
    ///
    /// Returns [`KeyfenceError::SessionNotFound`] for unknown or closed ids.
    pub async fn session(&self, id: Uuid) -> Result<SessionEntry> {
        let entry = self
            .sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(KeyfenceError::SessionNotFound(id))?;
        entry.touch();
        Ok(entry)
    }

    /// Tear a session down and forget it.
    ///
    /// # Errors
    ///
    /// Returns [`KeyfenceError::SessionNotFound`] for unknown ids.
    pub async fn close_session(&self, id: Uuid) -> Result<()> {
        let entry = self
            .sessions
            .write()
            .await
            .remove(&id)
            .ok_or(KeyfenceError::SessionNotFound(id))?;
        entry.close();
        Ok(())
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close and forget every session idle for longer than the TTL.
    ///
    /// Returns how many were evicted.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<SessionEntry> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, entry)| entry.expired(now, self.session_ttl))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for entry in &expired {
            entry.close();
        }
        if !expired.is_empty() {
            info!(
                count = expired.len(),
                ttl_secs = self.session_ttl.as_secs(),
                "Evicted idle sessions"
            );
        }
        expired.len()
    }

    /// Run [`AppState::evict_idle`] every half TTL until the state is dropped.
    pub fn spawn_session_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let state = Arc::downgrade(self);
        let period = (self.session_ttl / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else {
                    break;
                };
                state.evict_idle().await;
            }
        })
    }

    /// Tear down every session, e.g. on shutdown.
    pub async fn close_all(&self) {
        let entries: Vec<SessionEntry> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &entries {
            entry.close();
        }
        info!(count = entries.len(), "Closed all sessions");
    }
}
