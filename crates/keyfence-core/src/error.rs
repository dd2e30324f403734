//! Unified error types for the keyfence core library.
//!
//! This module provides a unified error type [`KeyfenceError`] that covers all
//! failure modes across keyfence. Each module also has its own specific error
//! type ([`PositionError`], [`ActuatorError`], [`CatalogError`],
//! [`ConfigError`], [`CoordinateError`]) for internal use.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Actionable messages**: Every recoverable failure names a [`NextAction`]
//! - **Context preservation**: Wrapped errors maintain their original context
//! - **HTTP-ready**: Error types include HTTP status codes and error codes
//!
//! # Example
//!
//! ```rust
//! use keyfence_core::error::{KeyfenceError, NextAction};
//!
//! let err = KeyfenceError::PermissionDenied;
//! assert_eq!(err.next_action(), Some(NextAction::GrantPermission));
//! assert!(err.is_recoverable());
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::position::PositionError;
use crate::types::CoordinateError;
use crate::unlock::ActuatorError;

/// What the user can do next after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    /// Grant location access in device settings, then retry.
    GrantPermission,
    /// Run the location check again (after moving closer, if out of range).
    RetryLocationCheck,
    /// Wait for the pending command to finish, then retry the unlock.
    RetryUnlock,
    /// Open a new session for the property.
    OpenSession,
}

/// The unified error type for all keyfence operations.
#[derive(Debug, Error)]
pub enum KeyfenceError {
    // =========================================================================
    // LOCATION ERRORS
    // =========================================================================
    /// The user declined location access.
    #[error("Location permission is required to unlock this property. Grant access and retry.")]
    PermissionDenied,

    /// A position sample could not be obtained.
    #[error("Unable to determine your location: {0}")]
    SampleUnavailable(PositionError),

    /// A coordinate was outside the valid latitude/longitude ranges.
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(#[from] CoordinateError),

    /// A reported accuracy radius was negative or not finite.
    #[error("Invalid accuracy radius: {0} m")]
    InvalidAccuracy(f64),

    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// Unlock was attempted without an eligible verdict.
    #[error("Unlock of property '{property_id}' is not authorized (verdict: {verdict})")]
    NotAuthorized {
        /// Property the unlock targeted.
        property_id: String,
        /// The verdict in force when the attempt was made.
        verdict: String,
    },

    /// An unlock command is already pending for this session.
    #[error("An unlock command for property '{property_id}' is already in progress")]
    AlreadyInProgress {
        /// Property the unlock targeted.
        property_id: String,
    },

    /// A location check is already running for this session.
    #[error("A location check is already in progress for this session")]
    EvaluationInProgress,

    /// The caller invoked an operation that is illegal in the current state.
    #[error("Operation '{operation}' is not valid in state '{state}'")]
    InvalidStateTransition {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: &'static str,
    },

    /// The session was torn down.
    #[error("The session has been closed")]
    SessionClosed,

    /// No session with the given id exists.
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    // =========================================================================
    // ACTUATOR ERRORS
    // =========================================================================
    /// The unlock command failed downstream.
    #[error("Unlock command failed: {0}")]
    ActuatorFailure(String),

    // =========================================================================
    // CATALOG ERRORS
    // =========================================================================
    /// The property id is malformed.
    #[error("Invalid property id: '{0}'")]
    InvalidPropertyId(String),

    /// The property does not exist in the catalog.
    #[error("Property not found: '{0}'")]
    PropertyNotFound(String),

    /// The catalog returned data that cannot be used (e.g. malformed coordinates).
    #[error("Malformed property data: {0}")]
    MalformedPropertyData(String),

    /// The catalog could not be reached.
    #[error("Property catalog unavailable: {0}")]
    CatalogUnavailable(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & INTERNAL ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// An internal task failed unexpectedly.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized [`Result`] type for keyfence operations.
pub type Result<T> = std::result::Result<T, KeyfenceError>;

impl KeyfenceError {
    /// Returns `true` if the session stays usable and the user can recover.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied
                | Self::SampleUnavailable(_)
                | Self::AlreadyInProgress { .. }
                | Self::EvaluationInProgress
                | Self::ActuatorFailure(_)
                | Self::CatalogUnavailable(_)
        )
    }

    /// Returns `true` if the caller broke the operation contract.
    ///
    /// These should be unreachable from a well-behaved client and are surfaced
    /// as defects rather than silently ignored.
    #[inline]
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::NotAuthorized { .. } | Self::InvalidStateTransition { .. }
        )
    }

    /// Returns `true` if this error came from the property catalog.
    #[inline]
    #[must_use]
    pub fn is_catalog_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPropertyId(_)
                | Self::PropertyNotFound(_)
                | Self::MalformedPropertyData(_)
                | Self::CatalogUnavailable(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// The action to present alongside this failure, if any.
    #[must_use]
    pub fn next_action(&self) -> Option<NextAction> {
        match self {
            Self::PermissionDenied
            | Self::SampleUnavailable(PositionError::PermissionRevoked) => {
                Some(NextAction::GrantPermission)
            }
            Self::SampleUnavailable(_) | Self::NotAuthorized { .. } => {
                Some(NextAction::RetryLocationCheck)
            }
            Self::AlreadyInProgress { .. } | Self::ActuatorFailure(_) => {
                Some(NextAction::RetryUnlock)
            }
            Self::SessionClosed | Self::SessionNotFound(_) => Some(NextAction::OpenSession),
            _ => None,
        }
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidCoordinate(_)
            | Self::InvalidAccuracy(_)
            | Self::InvalidPropertyId(_) => 400,

            // 403 Forbidden - understood but refused
            Self::PermissionDenied | Self::NotAuthorized { .. } => 403,

            // 404 Not Found
            Self::PropertyNotFound(_) | Self::SessionNotFound(_) | Self::ConfigNotFound(_) => 404,

            // 409 Conflict - operation clashes with the current state
            Self::AlreadyInProgress { .. }
            | Self::EvaluationInProgress
            | Self::InvalidStateTransition { .. } => 409,

            // 410 Gone - session torn down
            Self::SessionClosed => 410,

            // 422 Unprocessable Entity - semantic errors
            Self::SampleUnavailable(_)
            | Self::MalformedPropertyData(_)
            | Self::ConfigParseError(_)
            | Self::ConfigValidationError(_) => 422,

            // 502 Bad Gateway - downstream actuator failed
            Self::ActuatorFailure(_) => 502,

            // 503 Service Unavailable - catalog unreachable
            Self::CatalogUnavailable(_) => 503,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::SampleUnavailable(_) => "SAMPLE_UNAVAILABLE",
            Self::InvalidCoordinate(_) => "INVALID_COORDINATE",
            Self::InvalidAccuracy(_) => "INVALID_ACCURACY",
            Self::NotAuthorized { .. } => "NOT_AUTHORIZED",
            Self::AlreadyInProgress { .. } => "ALREADY_IN_PROGRESS",
            Self::EvaluationInProgress => "EVALUATION_IN_PROGRESS",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::ActuatorFailure(_) => "ACTUATOR_FAILURE",
            Self::InvalidPropertyId(_) => "INVALID_PROPERTY_ID",
            Self::PropertyNotFound(_) => "PROPERTY_NOT_FOUND",
            Self::MalformedPropertyData(_) => "MALFORMED_PROPERTY_DATA",
            Self::CatalogUnavailable(_) => "CATALOG_UNAVAILABLE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<PositionError> for KeyfenceError {
    fn from(err: PositionError) -> Self {
        Self::SampleUnavailable(err)
    }
}

impl From<ActuatorError> for KeyfenceError {
    fn from(err: ActuatorError) -> Self {
        Self::ActuatorFailure(err.to_string())
    }
}

impl From<CatalogError> for KeyfenceError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::InvalidId(id) => Self::InvalidPropertyId(id),
            CatalogError::NotFound(id) => Self::PropertyNotFound(id),
            err @ (CatalogError::MalformedCoordinate { .. }
            | CatalogError::InvalidCoordinate { .. }) => {
                Self::MalformedPropertyData(err.to_string())
            }
            CatalogError::Network(message) => Self::CatalogUnavailable(message),
            CatalogError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {}: {}", path.display(), source))
            }
            CatalogError::ParseError { source } => Self::MalformedPropertyData(source.to_string()),
        }
    }
}

impl From<ConfigError> for KeyfenceError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
