//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `properties` - Read-only property catalog
//! - `sessions` - Location checks and unlock commands
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod error;
pub mod health;
pub mod openapi;
pub mod properties;
pub mod sessions;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                      - Health check
/// /docs                        - Swagger UI
/// /api
/// ├── /properties              - Catalog listing and lookup
/// ├── /sessions                - Open a session
/// │   └── /{id}                - Read or close a session
/// │       ├── /evaluate        - First location check
/// │       ├── /retry           - Retry after denial or failed fix
/// │       ├── /refresh         - Re-check an evaluated session
/// │       └── /unlock          - Send the unlock command
/// └── /openapi.json            - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                // OpenAPI spec at /api/openapi.json
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/properties", properties::router())
                .nest("/sessions", sessions::router()),
        )
        .merge(SwaggerUi::new("/docs").url("/docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    //! Router tests using axum-test.

    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use keyfence_core::mock::MockActuator;
    use keyfence_core::{ActuatorError, Config, MemoryCatalog, PropertyRecord, UnlockCommandExecutor};
    use serde_json::{json, Value};

    use super::*;
    use crate::state::AppState;

    fn catalog() -> MemoryCatalog {
        let records: Vec<PropertyRecord> = serde_json::from_value(json!([
            {
                "id": "12",
                "location": "1 Harbor Way",
                "price": 2400,
                "latitude": "40.0",
                "longitude": "-74.0"
            },
            {
                "id": "broken",
                "latitude": "north-ish",
                "longitude": "-74.0"
            }
        ]))
        .unwrap();
        MemoryCatalog::new(records)
    }

    fn test_server(actuator: &Arc<MockActuator>) -> TestServer {
        let state = AppState::new(
            Config::default(),
            Arc::new(catalog()),
            UnlockCommandExecutor::new(actuator.clone(), Duration::from_secs(10)),
        );
        TestServer::new(create_router(state)).unwrap()
    }

    fn at(latitude: f64, longitude: f64) -> Value {
        json!({
            "permission": "granted",
            "position": {"latitude": latitude, "longitude": longitude, "accuracy_m": 5.0}
        })
    }

    async fn open(server: &TestServer) -> String {
        let response = server
            .post("/api/sessions")
            .json(&json!({"property_id": "12"}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let body = response.json::<Value>();
        assert_eq!(body["state"]["state"], "idle");
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let server = test_server(&Arc::new(MockActuator::new()));
        let response = server.get("/health").await;
        response.assert_status_ok();

        let body = response.json::<Value>();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_sessions"], 0);
    }

    #[tokio::test]
    async fn test_openapi_is_served() {
        let server = test_server(&Arc::new(MockActuator::new()));
        let response = server.get("/api/openapi.json").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["info"]["title"], "keyfence API");
    }

    #[tokio::test]
    async fn test_property_lookup() {
        let server = test_server(&Arc::new(MockActuator::new()));

        let list = server.get("/api/properties").await.json::<Value>();
        assert_eq!(list.as_array().unwrap().len(), 2);

        let response = server.get("/api/properties/12").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["address"], "1 Harbor Way");

        server
            .get("/api/properties/99")
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .get("/api/properties/bad%20id")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_open_session_errors() {
        let server = test_server(&Arc::new(MockActuator::new()));

        let response = server
            .post("/api/sessions")
            .json(&json!({"property_id": "broken"}))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.json::<Value>()["error"], "MALFORMED_PROPERTY_DATA");

        server
            .post("/api/sessions")
            .json(&json!({"property_id": "99"}))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_eligible_session_unlocks() {
        let actuator = Arc::new(MockActuator::new());
        let server = test_server(&actuator);
        let id = open(&server).await;

        let response = server
            .post(&format!("/api/sessions/{id}/evaluate"))
            .json(&at(40.0001, -74.0))
            .await;
        response.assert_status_ok();
        let body = response.json::<Value>();
        assert_eq!(body["state"]["state"], "evaluated");
        assert_eq!(body["last_verdict"]["kind"], "eligible");

        let response = server.post(&format!("/api/sessions/{id}/unlock")).await;
        response.assert_status_ok();
        let body = response.json::<Value>();
        assert_eq!(body["succeeded"], true);
        assert_eq!(body["property_id"], "12");
        assert_eq!(actuator.calls(), 1);
    }

    #[tokio::test]
    async fn test_ineligible_session_cannot_unlock() {
        let actuator = Arc::new(MockActuator::new());
        let server = test_server(&actuator);
        let id = open(&server).await;

        let body = server
            .post(&format!("/api/sessions/{id}/evaluate"))
            .json(&at(40.01, -74.0))
            .await
            .json::<Value>();
        assert_eq!(body["last_verdict"]["kind"], "ineligible");
        assert_eq!(body["next_action"], "retry_location_check");

        let response = server.post(&format!("/api/sessions/{id}/unlock")).await;
        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(response.json::<Value>()["error"], "NOT_AUTHORIZED");
        assert_eq!(actuator.calls(), 0);

        // Walk closer and check again
        let body = server
            .post(&format!("/api/sessions/{id}/refresh"))
            .json(&at(40.0, -74.0))
            .await
            .json::<Value>();
        assert_eq!(body["last_verdict"]["kind"], "eligible");
        assert_eq!(body["sequence"], 2);

        server
            .post(&format!("/api/sessions/{id}/unlock"))
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn test_denied_permission_then_retry() {
        let server = test_server(&Arc::new(MockActuator::new()));
        let id = open(&server).await;

        let response = server
            .post(&format!("/api/sessions/{id}/evaluate"))
            .json(&json!({"permission": "denied"}))
            .await;
        response.assert_status_ok();
        let body = response.json::<Value>();
        assert_eq!(body["state"]["state"], "permission_denied");
        assert_eq!(body["next_action"], "grant_permission");

        server
            .post(&format!("/api/sessions/{id}/unlock"))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let body = server
            .post(&format!("/api/sessions/{id}/retry"))
            .json(&at(40.0, -74.0))
            .await
            .json::<Value>();
        assert_eq!(body["state"]["state"], "evaluated");
        assert_eq!(body["last_verdict"]["kind"], "eligible");
    }

    #[tokio::test]
    async fn test_failed_fix_then_retry() {
        let server = test_server(&Arc::new(MockActuator::new()));
        let id = open(&server).await;

        let body = server
            .post(&format!("/api/sessions/{id}/evaluate"))
            .json(&json!({"permission": "granted", "error": "unavailable"}))
            .await
            .json::<Value>();
        assert_eq!(body["state"]["state"], "sample_failed");
        assert_eq!(body["state"]["reason"], "unavailable");

        let body = server
            .post(&format!("/api/sessions/{id}/retry"))
            .json(&at(40.0, -74.0))
            .await
            .json::<Value>();
        assert_eq!(body["last_verdict"]["kind"], "eligible");
    }

    #[tokio::test]
    async fn test_out_of_order_operations_conflict() {
        let server = test_server(&Arc::new(MockActuator::new()));
        let id = open(&server).await;

        let response = server
            .post(&format!("/api/sessions/{id}/refresh"))
            .json(&at(40.0, -74.0))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["error"], "INVALID_STATE_TRANSITION");

        server
            .post(&format!("/api/sessions/{id}/evaluate"))
            .json(&at(40.0, -74.0))
            .await
            .assert_status_ok();
        server
            .post(&format!("/api/sessions/{id}/evaluate"))
            .json(&at(40.0, -74.0))
            .await
            .assert_status(StatusCode::CONFLICT);
        server
            .post(&format!("/api/sessions/{id}/retry"))
            .json(&at(40.0, -74.0))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_invalid_reported_position() {
        let server = test_server(&Arc::new(MockActuator::new()));
        let id = open(&server).await;

        server
            .post(&format!("/api/sessions/{id}/evaluate"))
            .json(&at(91.0, -74.0))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let body = server
            .get(&format!("/api/sessions/{id}"))
            .await
            .json::<Value>();
        assert_eq!(body["state"]["state"], "idle");
    }

    #[tokio::test]
    async fn test_negative_accuracy_is_rejected() {
        let server = test_server(&Arc::new(MockActuator::new()));
        let id = open(&server).await;

        let response = server
            .post(&format!("/api/sessions/{id}/evaluate"))
            .json(&json!({
                "permission": "granted",
                "position": {"latitude": 40.7128, "longitude": -74.006, "accuracy_m": -2.0}
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "INVALID_ACCURACY");

        let body = server
            .get(&format!("/api/sessions/{id}"))
            .await
            .json::<Value>();
        assert_eq!(body["state"]["state"], "idle");
    }

    #[tokio::test]
    async fn test_actuator_failure_is_bad_gateway() {
        let actuator = Arc::new(MockActuator::new());
        actuator.fail_with(ActuatorError::Rejected("bolt jammed".into()));
        let server = test_server(&actuator);
        let id = open(&server).await;

        server
            .post(&format!("/api/sessions/{id}/evaluate"))
            .json(&at(40.0, -74.0))
            .await
            .assert_status_ok();

        let response = server.post(&format!("/api/sessions/{id}/unlock")).await;
        response.assert_status(StatusCode::BAD_GATEWAY);
        let body = response.json::<Value>();
        assert_eq!(body["succeeded"], false);
        assert_eq!(body["next_action"], "retry_unlock");

        let body = server
            .get(&format!("/api/sessions/{id}"))
            .await
            .json::<Value>();
        assert_eq!(body["last_verdict"]["kind"], "eligible");
    }

    #[tokio::test]
    async fn test_closed_session_is_gone() {
        let server = test_server(&Arc::new(MockActuator::new()));
        let id = open(&server).await;

        server
            .delete(&format!("/api/sessions/{id}"))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .get(&format!("/api/sessions/{id}"))
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .delete(&format!("/api/sessions/{id}"))
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .get("/api/sessions/not-a-uuid")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}
