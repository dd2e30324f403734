//! Gated unlock command execution.
//!
//! [`UnlockCommandExecutor`] is the enforcement point of the geofence: it only
//! reaches the [`UnlockActuator`] when the session's last verdict is eligible,
//! allows one pending command per session, and bounds every command with a
//! timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::authorization::AuthorizationStateMachine;
use crate::config::{ActuatorKind, Config, UnlockConfig};
use crate::error::{KeyfenceError, NextAction, Result};

/// Default bound on one unlock command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Latency of the simulated actuator.
pub const DEFAULT_SIMULATED_LATENCY: Duration = Duration::from_millis(1500);

/// Failures reported by a lock actuator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuatorError {
    /// No answer within the command timeout.
    #[error("unlock command timed out after {secs} seconds")]
    Timeout {
        /// The timeout that elapsed.
        secs: u64,
    },

    /// The actuator answered but refused the command.
    #[error("actuator rejected the unlock command: {0}")]
    Rejected(String),

    /// The actuator could not be reached.
    #[error("could not reach the lock actuator: {0}")]
    Transport(String),
}

/// Backend that physically (or virtually) releases a lock.
#[async_trait]
pub trait UnlockActuator: Send + Sync {
    /// Release the lock of `property_id`.
    async fn send_unlock_command(&self, property_id: &str) -> std::result::Result<(), ActuatorError>;
}

/// Result of one unlock attempt that reached the actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "succeeded": true,
    "message": "Property unlocked successfully!",
    "property_id": "12",
    "completed_at": "2025-01-15T03:30:00Z",
    "next_action": null
}))]
pub struct UnlockOutcome {
    /// Whether the lock was released.
    pub succeeded: bool,

    /// Human-readable result.
    pub message: String,

    /// Property the command targeted.
    pub property_id: String,

    /// When the actuator answered (UTC).
    pub completed_at: DateTime<Utc>,

    /// What to do after a failure.
    pub next_action: Option<NextAction>,
}

impl UnlockOutcome {
    fn unlocked(property_id: String) -> Self {
        Self {
            succeeded: true,
            message: "Property unlocked successfully!".to_string(),
            property_id,
            completed_at: Utc::now(),
            next_action: None,
        }
    }

    fn failed(property_id: String, error: &KeyfenceError) -> Self {
        Self {
            succeeded: false,
            message: error.to_string(),
            property_id,
            completed_at: Utc::now(),
            next_action: error.next_action(),
        }
    }
}

/// Issues unlock commands for eligible sessions.
#[derive(Clone)]
pub struct UnlockCommandExecutor {
    actuator: Arc<dyn UnlockActuator>,
    command_timeout: Duration,
}

impl std::fmt::Debug for UnlockCommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockCommandExecutor")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl UnlockCommandExecutor {
    /// Create an executor around `actuator`.
    #[must_use]
    pub fn new(actuator: Arc<dyn UnlockActuator>, command_timeout: Duration) -> Self {
        Self {
            actuator,
            command_timeout,
        }
    }

    /// Build the executor and actuator described by the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KeyfenceError::ConfigValidationError`] if the HTTP actuator is
    /// selected without an endpoint or without the `http` feature.
    pub fn from_config(config: &Config) -> Result<Self> {
        let unlock = &config.unlock;
        let actuator: Arc<dyn UnlockActuator> = match unlock.actuator {
            ActuatorKind::Simulated => Arc::new(SimulatedActuator::new(Duration::from_millis(
                unlock.simulated_latency_ms,
            ))),
            ActuatorKind::Http => http_actuator(unlock)?,
        };
        Ok(Self::new(
            actuator,
            Duration::from_secs(unlock.command_timeout_secs),
        ))
    }

    /// Unlock the session's property if its last verdict is eligible.
    ///
    /// An actuator failure or timeout yields an unsuccessful
    /// [`UnlockOutcome`]; the location verdict is left untouched.
    ///
    /// # Errors
    ///
    /// - [`KeyfenceError::NotAuthorized`] without an eligible verdict (the
    ///   actuator is not called)
    /// - [`KeyfenceError::AlreadyInProgress`] while another command is pending
    /// - [`KeyfenceError::SessionClosed`] if the session is or becomes closed
    pub async fn attempt_unlock(
        &self,
        session: &Arc<AuthorizationStateMachine>,
    ) -> Result<UnlockOutcome> {
        let permit = session.begin_unlock().inspect_err(|e| {
            warn!(session_id = %session.id(), error = %e, "Unlock refused");
        })?;

        let property_id = session.target().id.clone();
        info!(session_id = %session.id(), property_id = %property_id, "Sending unlock command");

        let result = timeout(
            self.command_timeout,
            self.actuator.send_unlock_command(&property_id),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ActuatorError::Timeout {
                secs: self.command_timeout.as_secs(),
            })
        });

        if permit.session_closed() {
            warn!(
                session_id = %session.id(),
                property_id = %property_id,
                "Session closed while unlock was pending; discarding outcome"
            );
            return Err(KeyfenceError::SessionClosed);
        }

        let outcome = match result {
            Ok(()) => {
                info!(session_id = %session.id(), property_id = %property_id, "Property unlocked");
                UnlockOutcome::unlocked(property_id)
            }
            Err(err) => {
                let err = KeyfenceError::from(err);
                warn!(session_id = %session.id(), property_id = %property_id, error = %err, "Unlock failed");
                UnlockOutcome::failed(property_id, &err)
            }
        };
        Ok(outcome)
    }
}

/// Stand-in actuator that succeeds after a fixed delay.
#[derive(Debug, Clone)]
pub struct SimulatedActuator {
    latency: Duration,
}

impl SimulatedActuator {
    /// Create a simulated actuator.
    #[must_use]
    pub const fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for SimulatedActuator {
    fn default() -> Self {
        Self::new(DEFAULT_SIMULATED_LATENCY)
    }
}

#[async_trait]
impl UnlockActuator for SimulatedActuator {
    async fn send_unlock_command(&self, property_id: &str) -> std::result::Result<(), ActuatorError> {
        tokio::time::sleep(self.latency).await;
        info!(property_id, "Simulated actuator released lock");
        Ok(())
    }
}

#[cfg(feature = "http")]
fn http_actuator(unlock: &UnlockConfig) -> Result<Arc<dyn UnlockActuator>> {
    let endpoint = unlock.endpoint.clone().ok_or_else(|| {
        KeyfenceError::ConfigValidationError("unlock.endpoint: required for the http actuator".into())
    })?;
    let actuator = HttpActuator::new(endpoint, Duration::from_secs(unlock.command_timeout_secs))?;
    Ok(Arc::new(actuator))
}

#[cfg(not(feature = "http"))]
fn http_actuator(_unlock: &UnlockConfig) -> Result<Arc<dyn UnlockActuator>> {
    Err(KeyfenceError::ConfigValidationError(
        "unlock.actuator: http actuator requires the `http` feature".into(),
    ))
}

#[cfg(feature = "http")]
pub use http::HttpActuator;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use tracing::debug;
    use url::Url;

    use super::{ActuatorError, UnlockActuator};

    /// Actuator reached over HTTP: `POST {endpoint}/properties/{id}/unlock`.
    #[derive(Debug, Clone)]
    pub struct HttpActuator {
        client: reqwest::Client,
        endpoint: Url,
        timeout: Duration,
    }

    impl HttpActuator {
        /// Create a client with a per-request timeout.
        ///
        /// # Errors
        ///
        /// Returns [`ActuatorError::Transport`] if the HTTP client cannot be built.
        pub fn new(mut endpoint: Url, timeout: Duration) -> Result<Self, ActuatorError> {
            if !endpoint.path().ends_with('/') {
                let path = format!("{}/", endpoint.path());
                endpoint.set_path(&path);
            }
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| ActuatorError::Transport(e.to_string()))?;
            Ok(Self {
                client,
                endpoint,
                timeout,
            })
        }

        fn command_url(&self, property_id: &str) -> Result<Url, ActuatorError> {
            self.endpoint
                .join(&format!("properties/{property_id}/unlock"))
                .map_err(|e| ActuatorError::Transport(e.to_string()))
        }
    }

    #[async_trait]
    impl UnlockActuator for HttpActuator {
        async fn send_unlock_command(&self, property_id: &str) -> Result<(), ActuatorError> {
            let url = self.command_url(property_id)?;
            debug!(%url, "POST unlock command");
            let response = self.client.post(url).send().await.map_err(|e| {
                if e.is_timeout() {
                    ActuatorError::Timeout {
                        secs: self.timeout.as_secs(),
                    }
                } else {
                    ActuatorError::Transport(e.to_string())
                }
            })?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(ActuatorError::Rejected(format!("HTTP {status}")))
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_command_url_keeps_endpoint_path() {
            let actuator = HttpActuator::new(
                Url::parse("https://locks.example.com/api/v1").unwrap(),
                Duration::from_secs(5),
            )
            .unwrap();
            assert_eq!(
                actuator.command_url("12").unwrap().as_str(),
                "https://locks.example.com/api/v1/properties/12/unlock"
            );
        }
    }
}
