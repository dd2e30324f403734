//! Liveness endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Liveness report.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "active_sessions": 2,
    "uptime_secs": 3600
}))]
pub struct HealthResponse {
    /// Always `ok` when the server answers.
    pub status: String,

    /// Crate version of the running binary.
    pub version: String,

    /// Open unlock sessions.
    pub active_sessions: usize,

    /// Seconds since startup.
    pub uptime_secs: i64,
}

pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Report liveness, version and session load.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Liveness check",
    description = "Answers `ok` with the server version, the number of open \
        sessions and the uptime. Suitable for load balancer health checks.",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime = chrono::Utc::now() - state.started_at;
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        active_sessions: state.session_count().await,
        uptime_secs: uptime.num_seconds(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_field_names() {
        let value = serde_json::to_value(HealthResponse {
            status: "ok".into(),
            version: "9.9.9".into(),
            active_sessions: 0,
            uptime_secs: 5,
        })
        .unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["active_sessions"], 0);
        assert_eq!(value["uptime_secs"], 5);
    }
}
