//! Unlock session API endpoints.
//!
//! A client opens a session for a property, submits the device's location
//! permission and position fix with each location check, and may unlock once
//! the session's verdict is eligible. Closing the session discards anything
//! still in flight.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use keyfence_core::{
    AuthorizationSession, Coordinate, KeyfenceError, PermissionStatus, PositionError,
    PositionReport, PositionSample, UnlockOutcome,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the sessions router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", post(open_session))
        .route("/{id}", get(get_session).delete(close_session))
        .route("/{id}/evaluate", post(evaluate))
        .route("/{id}/retry", post(retry))
        .route("/{id}/refresh", post(refresh))
        .route("/{id}/unlock", post(unlock))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to open an unlock session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"property_id": "12"}))]
pub struct OpenSessionRequest {
    /// Catalog id of the property to unlock.
    #[schema(example = "12")]
    pub property_id: String,
}

/// A position fix as reported by the device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportedPosition {
    /// Latitude in degrees.
    #[schema(example = 37.7749)]
    pub latitude: f64,

    /// Longitude in degrees.
    #[schema(example = json!(-122.4194))]
    pub longitude: f64,

    /// Horizontal accuracy radius in meters; must be finite and non-negative.
    #[schema(example = 4.5, minimum = 0.0)]
    pub accuracy_m: f64,

    /// When the fix was taken; defaults to the time of receipt.
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

/// The device's answer for one location check.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "permission": "granted",
    "position": {
        "latitude": 37.7749,
        "longitude": -122.4194,
        "accuracy_m": 4.5
    }
}))]
pub struct DeviceReport {
    /// Whether the user allowed location access.
    pub permission: PermissionStatus,

    /// The fix, if one was obtained.
    #[serde(default)]
    pub position: Option<ReportedPosition>,

    /// The sensor error, if no fix was obtained.
    #[serde(default)]
    pub error: Option<PositionError>,
}

impl TryFrom<DeviceReport> for PositionReport {
    type Error = KeyfenceError;

    fn try_from(report: DeviceReport) -> Result<Self, Self::Error> {
        let sample = report
            .position
            .map(|p| -> Result<PositionSample, KeyfenceError> {
                if !p.accuracy_m.is_finite() || p.accuracy_m < 0.0 {
                    return Err(KeyfenceError::InvalidAccuracy(p.accuracy_m));
                }
                Ok(PositionSample {
                    coordinate: Coordinate::new(p.latitude, p.longitude)?,
                    accuracy_m: p.accuracy_m,
                    captured_at: p.captured_at.unwrap_or_else(Utc::now),
                })
            })
            .transpose()?;
        Ok(Self {
            permission: report.permission,
            sample,
            error: report.error,
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Open a session for a property.
#[utoipa::path(
    post,
    path = "/api/sessions",
    tag = "sessions",
    operation_id = "openSession",
    summary = "Open an unlock session",
    description = "Looks the property up in the catalog and opens a session in the \
        `idle` state. Submit a device report to `/evaluate` next.",
    request_body = OpenSessionRequest,
    responses(
        (status = 201, description = "Session opened", body = AuthorizationSession),
        (status = 400, description = "Malformed property id", body = crate::api::ErrorResponse),
        (status = 404, description = "No such property", body = crate::api::ErrorResponse),
        (status = 422, description = "Property has malformed coordinates", body = crate::api::ErrorResponse),
        (status = 503, description = "Catalog unreachable", body = crate::api::ErrorResponse)
    )
)]
pub async fn open_session(
    State(state): State<SharedState>,
    Json(request): Json<OpenSessionRequest>,
) -> ApiResult<(StatusCode, Json<AuthorizationSession>)> {
    let snapshot = state.open_session(&request.property_id).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// Read a session.
#[utoipa::path(
    get,
    path = "/api/sessions/{id}",
    tag = "sessions",
    operation_id = "getSession",
    summary = "Get session state",
    description = "Returns the session's state, its last verdict, a status line \
        and the next action the user can take.",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session snapshot", body = AuthorizationSession),
        (status = 404, description = "Unknown session", body = crate::api::ErrorResponse)
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AuthorizationSession>> {
    let entry = state.session(id).await?;
    Ok(Json(entry.machine.snapshot()))
}

/// Close a session.
#[utoipa::path(
    delete,
    path = "/api/sessions/{id}",
    tag = "sessions",
    operation_id = "closeSession",
    summary = "Close a session",
    description = "Tears the session down. Location checks or unlock commands \
        still in flight are discarded when they complete.",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session closed"),
        (status = 404, description = "Unknown session", body = crate::api::ErrorResponse)
    )
)]
pub async fn close_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.close_session(id).await?;
    info!(session_id = %id, "Session closed by client");
    Ok(StatusCode::NO_CONTENT)
}

/// Run the first location check.
#[utoipa::path(
    post,
    path = "/api/sessions/{id}/evaluate",
    tag = "sessions",
    operation_id = "evaluateLocation",
    summary = "Check the device location",
    description = "Starts a location check from `idle` or after a failed check. \
        A denied permission or failed fix is reported in the returned session \
        state, not as an error.",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = DeviceReport,
    responses(
        (status = 200, description = "Check completed", body = AuthorizationSession),
        (status = 400, description = "Reported coordinates out of range", body = crate::api::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::api::ErrorResponse),
        (status = 409, description = "A check is already running, or the session is already evaluated", body = crate::api::ErrorResponse),
        (status = 410, description = "Session closed during the check", body = crate::api::ErrorResponse)
    )
)]
pub async fn evaluate(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(report): Json<DeviceReport>,
) -> ApiResult<Json<AuthorizationSession>> {
    let report = PositionReport::try_from(report)?;
    let entry = state.session(id).await?;
    let snapshot = entry
        .check_with_report(report, |machine| async move {
            machine.begin_evaluation().await
        })
        .await?;
    Ok(Json(snapshot))
}

/// Retry after a denied permission or failed fix.
#[utoipa::path(
    post,
    path = "/api/sessions/{id}/retry",
    tag = "sessions",
    operation_id = "retryLocation",
    summary = "Retry the location check",
    description = "Only valid in `permission_denied` or `sample_failed`. A denied \
        permission is asked again; a failed fix is taken again.",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = DeviceReport,
    responses(
        (status = 200, description = "Check completed", body = AuthorizationSession),
        (status = 400, description = "Reported coordinates out of range", body = crate::api::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::api::ErrorResponse),
        (status = 409, description = "Session is not in a retryable state", body = crate::api::ErrorResponse),
        (status = 410, description = "Session closed during the check", body = crate::api::ErrorResponse)
    )
)]
pub async fn retry(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(report): Json<DeviceReport>,
) -> ApiResult<Json<AuthorizationSession>> {
    let report = PositionReport::try_from(report)?;
    let entry = state.session(id).await?;
    let controller = state.retry.clone();
    let snapshot = entry
        .check_with_report(report, move |machine| async move {
            controller.request_retry(&machine).await
        })
        .await?;
    Ok(Json(snapshot))
}

/// Check the location again after a completed check.
#[utoipa::path(
    post,
    path = "/api/sessions/{id}/refresh",
    tag = "sessions",
    operation_id = "refreshLocation",
    summary = "Check location again",
    description = "Only valid in `evaluated`. Replaces the current verdict with \
        the result of a fresh check, e.g. after moving closer.",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = DeviceReport,
    responses(
        (status = 200, description = "Check completed", body = AuthorizationSession),
        (status = 400, description = "Reported coordinates out of range", body = crate::api::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::api::ErrorResponse),
        (status = 409, description = "Session has not been evaluated", body = crate::api::ErrorResponse),
        (status = 410, description = "Session closed during the check", body = crate::api::ErrorResponse)
    )
)]
pub async fn refresh(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(report): Json<DeviceReport>,
) -> ApiResult<Json<AuthorizationSession>> {
    let report = PositionReport::try_from(report)?;
    let entry = state.session(id).await?;
    let snapshot = entry
        .check_with_report(report, |machine| async move { machine.refresh().await })
        .await?;
    Ok(Json(snapshot))
}

/// Unlock the property.
#[utoipa::path(
    post,
    path = "/api/sessions/{id}/unlock",
    tag = "sessions",
    operation_id = "unlockProperty",
    summary = "Unlock the property",
    description = "Sends the unlock command if and only if the session's verdict \
        is eligible. One command per session may be pending at a time.",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Property unlocked", body = UnlockOutcome),
        (status = 403, description = "Verdict is not eligible", body = crate::api::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::api::ErrorResponse),
        (status = 409, description = "An unlock command is already pending", body = crate::api::ErrorResponse),
        (status = 410, description = "Session closed while the command was pending", body = crate::api::ErrorResponse),
        (status = 502, description = "Actuator failed or timed out", body = UnlockOutcome)
    )
)]
pub async fn unlock(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<UnlockOutcome>)> {
    let entry = state.session(id).await?;
    let outcome = state.executor.attempt_unlock(&entry.machine).await?;
    let status = if outcome.succeeded {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(outcome)))
}
