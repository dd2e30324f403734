//! OpenAPI specification generation for the keyfence API.
//!
//! The document is served at `/api/openapi.json`, rendered by Swagger UI at
//! `/docs`, and written to disk by the `gen-openapi` binary for client
//! generation.

use axum::Json;
use keyfence_core::{
    AuthorizationSession, Coordinate, DecimalDegrees, NextAction, PermissionStatus,
    PositionError, PropertyRecord, PropertyTarget, SessionState, UnlockOutcome, Verdict,
};
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::sessions::{DeviceReport, OpenSessionRequest, ReportedPosition};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed JSON string.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for keyfence.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "keyfence API",
        version = "0.1.0",
        description = r#"
# keyfence API

keyfence decides whether a user standing near a rental property may unlock it.

## Flow

1. **Open a session** for a property from the catalog.
2. **Evaluate**: submit the device's location permission and a position fix.
   The server measures the great-circle distance to the property. A device
   within 30 meters is `eligible`.
3. **Unlock**: only an `eligible` session may send the unlock command.

A denied permission or failed fix leaves the session in `permission_denied`
or `sample_failed`; `/retry` with a fresh report recovers from either.
`/refresh` re-checks an evaluated session, e.g. after the user walked closer.

Every session response carries a `status` line suitable for display and a
`next_action` telling the client what the user can do next.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local keyfence server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "properties",
            description = "Read-only property catalog"
        ),
        (
            name = "sessions",
            description = "Location checks and unlock commands for one property"
        )
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Property endpoints
        super::properties::list_properties,
        super::properties::get_property,
        // Session endpoints
        super::sessions::open_session,
        super::sessions::get_session,
        super::sessions::close_session,
        super::sessions::evaluate,
        super::sessions::retry,
        super::sessions::refresh,
        super::sessions::unlock,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            NextAction,
            // Health types
            HealthResponse,
            // Catalog types
            PropertyRecord,
            DecimalDegrees,
            PropertyTarget,
            Coordinate,
            // Session types
            AuthorizationSession,
            SessionState,
            Verdict,
            OpenSessionRequest,
            DeviceReport,
            ReportedPosition,
            PermissionStatus,
            PositionError,
            // Unlock types
            UnlockOutcome,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "keyfence API");
        assert!(spec.paths.paths.contains_key("/api/sessions/{id}/unlock"));
        assert!(spec.paths.paths.contains_key("/api/properties"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"keyfence API\""));
        assert!(json.contains("DeviceReport"));
    }
}
