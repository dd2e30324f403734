//! Re-driving sessions after a failed location check.
//!
//! Retrying is manual by default: the user asks for another check and
//! [`RetryController::request_retry`] re-enters the state machine. A
//! [`RetryPolicy::Backoff`] additionally lets
//! [`RetryController::retry_automatically`] re-sample after a failed fix.
//! A denied or revoked permission is never re-prompted automatically.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::authorization::AuthorizationStateMachine;
use crate::config::Config;
use crate::error::{KeyfenceError, Result};
use crate::position::PositionError;
use crate::session::{AuthorizationSession, SessionState};

/// When and how often a failed sample is retried without user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Only explicit retries.
    #[default]
    Manual,
    /// Exponential backoff after `SampleFailed`.
    Backoff {
        /// Delay before the first automatic retry.
        initial: Duration,
        /// Upper bound on any single delay.
        max: Duration,
        /// Number of automatic retries before giving up.
        max_attempts: u32,
    },
}

impl RetryPolicy {
    /// Delay before automatic retry number `attempt` (starting at 1), or
    /// `None` if the policy does not allow that attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match *self {
            Self::Manual => None,
            Self::Backoff {
                initial,
                max,
                max_attempts,
            } => {
                if attempt == 0 || attempt > max_attempts {
                    return None;
                }
                let factor = 2u32.saturating_pow(attempt - 1);
                Some(initial.saturating_mul(factor).min(max))
            }
        }
    }
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        let retry = &config.retry;
        if retry.automatic {
            Self::Backoff {
                initial: Duration::from_millis(retry.initial_backoff_ms),
                max: Duration::from_millis(retry.max_backoff_ms),
                max_attempts: retry.max_attempts,
            }
        } else {
            Self::Manual
        }
    }
}

/// Entry point for retrying a session.
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    /// Create a controller with the given policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The active policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Retry on the user's request.
    ///
    /// # Errors
    ///
    /// [`KeyfenceError::InvalidStateTransition`] unless the session is in
    /// `PermissionDenied` or `SampleFailed`, plus anything
    /// [`AuthorizationStateMachine::retry`] reports.
    pub async fn request_retry(
        &self,
        session: &Arc<AuthorizationStateMachine>,
    ) -> Result<AuthorizationSession> {
        let state = session.state();
        if !state.is_retryable() {
            debug!(session_id = %session.id(), state = state.name(), "Retry rejected");
            return Err(KeyfenceError::InvalidStateTransition {
                operation: "retry",
                state: state.name(),
            });
        }
        session.retry().await
    }

    /// Re-sample with backoff while the session sits in `SampleFailed`.
    ///
    /// Returns the session snapshot once it leaves `SampleFailed`, the policy
    /// runs out of attempts, or the failure needs the user (revoked
    /// permission). With [`RetryPolicy::Manual`] this is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`AuthorizationStateMachine::retry`], such as
    /// [`KeyfenceError::SessionClosed`].
    pub async fn retry_automatically(
        &self,
        session: &Arc<AuthorizationStateMachine>,
    ) -> Result<AuthorizationSession> {
        let mut attempt = 0;
        loop {
            let resample = matches!(
                session.state(),
                SessionState::SampleFailed { reason } if reason != PositionError::PermissionRevoked
            );
            if !resample {
                return Ok(session.snapshot());
            }

            attempt += 1;
            let Some(delay) = self.policy.delay_for(attempt) else {
                return Ok(session.snapshot());
            };
            info!(
                session_id = %session.id(),
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retrying position sample"
            );
            tokio::time::sleep(delay).await;
            session.retry().await?;
        }
    }
}
