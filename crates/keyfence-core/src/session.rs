//! Session state, verdicts and the read-only session snapshot.
//!
//! [`SessionState`] is a single tagged union: the verdict of a finished
//! evaluation lives inside the state that produced it, so a session can never
//! be "checking" and "eligible" at once, and [`SessionState::verdict`] always
//! agrees with the state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{KeyfenceError, NextAction};
use crate::position::PositionError;
use crate::types::PropertyTarget;

/// Default geofence radius in meters.
pub const DEFAULT_GEOFENCE_RADIUS_M: f64 = 30.0;

/// The eligibility conclusion of one evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    /// Device is inside the geofence.
    Eligible {
        /// Measured distance to the property in meters.
        distance_m: f64,
    },
    /// Device is outside the geofence.
    Ineligible {
        /// Measured distance to the property in meters.
        distance_m: f64,
    },
    /// Location access was refused.
    PermissionDenied,
    /// No position fix could be obtained.
    SampleUnavailable {
        /// Why sampling failed.
        reason: PositionError,
    },
}

impl Verdict {
    /// Classify a measured distance against a geofence radius (closed bound).
    #[must_use]
    pub fn classify(distance_m: f64, radius_m: f64) -> Self {
        if distance_m <= radius_m {
            Self::Eligible { distance_m }
        } else {
            Self::Ineligible { distance_m }
        }
    }

    /// Returns `true` for [`Verdict::Eligible`].
    #[inline]
    #[must_use]
    pub const fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible { .. })
    }

    /// Measured distance, when the cycle got that far.
    #[must_use]
    pub const fn distance_m(&self) -> Option<f64> {
        match self {
            Self::Eligible { distance_m } | Self::Ineligible { distance_m } => Some(*distance_m),
            Self::PermissionDenied | Self::SampleUnavailable { .. } => None,
        }
    }

    /// Short name used in logs and error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Eligible { .. } => "eligible",
            Self::Ineligible { .. } => "ineligible",
            Self::PermissionDenied => "permission_denied",
            Self::SampleUnavailable { .. } => "sample_unavailable",
        }
    }

    /// The failure this verdict represents, if any.
    #[must_use]
    pub fn failure(&self) -> Option<KeyfenceError> {
        match self {
            Self::PermissionDenied => Some(KeyfenceError::PermissionDenied),
            Self::SampleUnavailable { reason } => Some(KeyfenceError::SampleUnavailable(*reason)),
            Self::Eligible { .. } | Self::Ineligible { .. } => None,
        }
    }
}

/// Where a session is in its evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing has been evaluated yet.
    #[default]
    Idle,
    /// Waiting for the user to answer the permission prompt.
    AwaitingPermission,
    /// Waiting for a position fix.
    SamplingPosition,
    /// Location access refused; retryable.
    PermissionDenied,
    /// No fix could be obtained; retryable.
    SampleFailed {
        /// Why sampling failed.
        reason: PositionError,
    },
    /// A fix was obtained and measured against the geofence.
    Evaluated {
        /// Measured distance in meters.
        distance_m: f64,
        /// Whether the distance is inside the geofence radius.
        within_geofence: bool,
    },
}

impl SessionState {
    /// Build the `Evaluated` state for a measured distance.
    #[must_use]
    pub fn evaluated(distance_m: f64, radius_m: f64) -> Self {
        Self::Evaluated {
            distance_m,
            within_geofence: Verdict::classify(distance_m, radius_m).is_eligible(),
        }
    }

    /// The verdict carried by this state, if the cycle has concluded.
    #[must_use]
    pub const fn verdict(&self) -> Option<Verdict> {
        match *self {
            Self::Idle | Self::AwaitingPermission | Self::SamplingPosition => None,
            Self::PermissionDenied => Some(Verdict::PermissionDenied),
            Self::SampleFailed { reason } => Some(Verdict::SampleUnavailable { reason }),
            Self::Evaluated {
                distance_m,
                within_geofence: true,
            } => Some(Verdict::Eligible { distance_m }),
            Self::Evaluated {
                distance_m,
                within_geofence: false,
            } => Some(Verdict::Ineligible { distance_m }),
        }
    }

    /// Returns `true` while a permission or sampling request is outstanding.
    #[inline]
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::AwaitingPermission | Self::SamplingPosition)
    }

    /// Returns `true` for the terminal-but-retryable states.
    #[inline]
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::SampleFailed { .. })
    }

    /// Short name used in logs and error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingPermission => "awaiting_permission",
            Self::SamplingPosition => "sampling_position",
            Self::PermissionDenied => "permission_denied",
            Self::SampleFailed { .. } => "sample_failed",
            Self::Evaluated { .. } => "evaluated",
        }
    }
}

/// Read-only view of a session for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuthorizationSession {
    /// Session identifier.
    pub id: Uuid,

    /// Property being unlocked.
    pub target: PropertyTarget,

    /// Current state.
    pub state: SessionState,

    /// Verdict of the last completed cycle, derived from `state`.
    pub last_verdict: Option<Verdict>,

    /// Sequence number of the most recent evaluation cycle.
    pub sequence: u64,

    /// Geofence radius in meters.
    pub radius_m: f64,

    /// When the session was opened (UTC).
    pub created_at: DateTime<Utc>,

    /// Human-readable status line.
    pub status: String,

    /// What the user can do next, when the session is stuck.
    pub next_action: Option<NextAction>,
}

impl AuthorizationSession {
    pub(crate) fn new(
        id: Uuid,
        target: PropertyTarget,
        state: SessionState,
        sequence: u64,
        radius_m: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        let last_verdict = state.verdict();
        let next_action = match last_verdict {
            Some(Verdict::Ineligible { .. }) => Some(NextAction::RetryLocationCheck),
            Some(verdict) => verdict.failure().and_then(|e| e.next_action()),
            None => None,
        };
        Self {
            id,
            status: status_message(&state, radius_m),
            target,
            state,
            last_verdict,
            sequence,
            radius_m,
            created_at,
            next_action,
        }
    }

    /// Returns `true` if an unlock would be authorized right now.
    #[must_use]
    pub fn can_unlock(&self) -> bool {
        self.last_verdict.is_some_and(|v| v.is_eligible())
    }
}

fn status_message(state: &SessionState, radius_m: f64) -> String {
    match state {
        SessionState::Idle => "Location check has not started".to_string(),
        SessionState::AwaitingPermission => "Requesting location permission...".to_string(),
        SessionState::SamplingPosition => "Verifying your location...".to_string(),
        SessionState::PermissionDenied => {
            "Location permission is required to unlock this property".to_string()
        }
        SessionState::SampleFailed { reason } => {
            format!("Unable to determine your location: {reason}")
        }
        SessionState::Evaluated {
            distance_m,
            within_geofence: true,
        } => format!("You're within range to unlock this property ({distance_m:.1} m away)"),
        SessionState::Evaluated { distance_m, .. } => format!(
            "You must be within {radius_m:.0} meters to unlock this property ({distance_m:.1} m away)"
        ),
    }
}
