//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use keyfence_core::{KeyfenceError, NextAction};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 403 Forbidden - Location permission missing or unlock not authorized.
    Forbidden {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// What the user can do about it.
        next_action: Option<NextAction>,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// What the user can do about it.
        next_action: Option<NextAction>,
    },

    /// 409 Conflict - Operation cannot be completed in the session's current state.
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// What the user can do about it.
        next_action: Option<NextAction>,
    },

    /// 410 Gone - The session was torn down.
    Gone {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 422 Unprocessable Entity - Well-formed but unusable data.
    UnprocessableEntity {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// What the user can do about it.
        next_action: Option<NextAction>,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details (not exposed to client in production).
        details: Option<String>,
    },

    /// 502 Bad Gateway - The lock actuator failed.
    BadGateway {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 503 Service Unavailable - The property catalog is unreachable.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<String>,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "PERMISSION_DENIED",
    "message": "Location permission is required to unlock this property. Grant access and retry.",
    "next_action": "grant_permission",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "NOT_AUTHORIZED").
    #[schema(example = "NOT_AUTHORIZED")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Unlock of property '12' is not authorized (verdict: ineligible)")]
    pub message: String,

    /// What the user can do next, if anything.
    #[schema(nullable)]
    pub next_action: Option<NextAction>,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    fn new(error: String, message: String, next_action: Option<NextAction>) -> Self {
        Self {
            error,
            message,
            next_action,
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest { error_code, message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(error_code, message, None),
            ),

            Self::Forbidden {
                error_code,
                message,
                next_action,
            } => (
                StatusCode::FORBIDDEN,
                ErrorResponse::new(error_code, message, next_action),
            ),

            Self::NotFound {
                error_code,
                message,
                next_action,
            } => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new(error_code, message, next_action),
            ),

            Self::Conflict {
                error_code,
                message,
                next_action,
            } => (
                StatusCode::CONFLICT,
                ErrorResponse::new(error_code, message, next_action),
            ),

            Self::Gone { error_code, message } => (
                StatusCode::GONE,
                ErrorResponse::new(error_code, message, Some(NextAction::OpenSession)),
            ),

            Self::UnprocessableEntity {
                error_code,
                message,
                next_action,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse::new(error_code, message, next_action),
            ),

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                // Log internal errors
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        details: details.map(|d| serde_json::json!(d)),
                        ..ErrorResponse::new(error_code, message, None)
                    },
                )
            }

            Self::BadGateway { error_code, message } => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse::new(error_code, message, Some(NextAction::RetryUnlock)),
            ),

            Self::ServiceUnavailable {
                error_code,
                message,
                details,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    details: details.map(|d| serde_json::json!(d)),
                    ..ErrorResponse::new(error_code, message, None)
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::Forbidden { message, .. } => write!(f, "Forbidden: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::Conflict { message, .. } => write!(f, "Conflict: {message}"),
            Self::Gone { message, .. } => write!(f, "Gone: {message}"),
            Self::UnprocessableEntity { message, .. } => {
                write!(f, "Unprocessable Entity: {message}")
            }
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::BadGateway { message, .. } => write!(f, "Bad Gateway: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from keyfence_core errors.
impl From<KeyfenceError> for ApiError {
    fn from(err: KeyfenceError) -> Self {
        if err.is_contract_violation() {
            tracing::warn!(error_code = err.error_code(), error = %err, "Client broke the session contract");
        }

        let error_code = err.error_code().to_string();
        let message = err.to_string();
        let next_action = err.next_action();

        match err.http_status_code() {
            400 => Self::BadRequest { error_code, message },
            403 => Self::Forbidden {
                error_code,
                message,
                next_action,
            },
            404 => Self::NotFound {
                error_code,
                message,
                next_action,
            },
            409 => Self::Conflict {
                error_code,
                message,
                next_action,
            },
            410 => Self::Gone { error_code, message },
            422 => Self::UnprocessableEntity {
                error_code,
                message,
                next_action,
            },
            502 => Self::BadGateway { error_code, message },
            503 => Self::ServiceUnavailable {
                error_code,
                message,
                details: None,
            },
            _ => Self::InternalError {
                error_code,
                message,
                details: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyfence_core::PositionError;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::BadRequest {
            error_code: "test_error".to_string(),
            message: "Test message".to_string(),
        };
        assert!(err.to_string().contains("Bad Request"));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse::new(
            "NOT_AUTHORIZED".to_string(),
            "Test message".to_string(),
            Some(NextAction::RetryLocationCheck),
        );
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("NOT_AUTHORIZED"));
        assert!(json.contains("\"next_action\":\"retry_location_check\""));
    }

    #[test]
    fn test_keyfence_error_mapping() {
        let err = ApiError::from(KeyfenceError::NotAuthorized {
            property_id: "12".into(),
            verdict: "ineligible".into(),
        });
        assert!(matches!(err, ApiError::Forbidden { .. }));
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);

        let err = ApiError::from(KeyfenceError::EvaluationInProgress);
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

        let err = ApiError::from(KeyfenceError::SessionClosed);
        assert_eq!(err.into_response().status(), StatusCode::GONE);

        let err = ApiError::from(KeyfenceError::SampleUnavailable(PositionError::Timeout));
        assert!(matches!(
            err,
            ApiError::UnprocessableEntity {
                next_action: Some(NextAction::RetryLocationCheck),
                ..
            }
        ));

        let err = ApiError::from(KeyfenceError::CatalogUnavailable("dns".into()));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
