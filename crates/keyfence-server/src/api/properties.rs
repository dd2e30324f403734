//! Property catalog API endpoints.
//!
//! Read-only views of the catalog that sessions are opened against.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use keyfence_core::{validate_property_id, KeyfenceError, PropertyRecord};

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the properties router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_properties))
        .route("/{id}", get(get_property))
}

/// List every property in the catalog.
#[utoipa::path(
    get,
    path = "/api/properties",
    tag = "properties",
    operation_id = "listProperties",
    summary = "List properties",
    description = "Returns every property in the catalog. Coordinates are passed \
        through as stored (number or decimal string).",
    responses(
        (status = 200, description = "Catalog listing", body = Vec<PropertyRecord>),
        (status = 422, description = "Catalog data is malformed", body = crate::api::ErrorResponse),
        (status = 503, description = "Catalog unreachable", body = crate::api::ErrorResponse)
    )
)]
pub async fn list_properties(
    State(state): State<SharedState>,
) -> ApiResult<Json<Vec<PropertyRecord>>> {
    Ok(Json(state.catalog.list_properties().await?))
}

/// Fetch one property.
#[utoipa::path(
    get,
    path = "/api/properties/{id}",
    tag = "properties",
    operation_id = "getProperty",
    summary = "Get a property",
    description = "Returns one catalog record by id.",
    params(
        ("id" = String, Path, description = "Property id ([A-Za-z0-9_-], at most 64 characters)")
    ),
    responses(
        (status = 200, description = "Property found", body = PropertyRecord),
        (status = 400, description = "Malformed property id", body = crate::api::ErrorResponse),
        (status = 404, description = "No such property", body = crate::api::ErrorResponse),
        (status = 503, description = "Catalog unreachable", body = crate::api::ErrorResponse)
    )
)]
pub async fn get_property(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PropertyRecord>> {
    validate_property_id(&id).map_err(KeyfenceError::from)?;
    Ok(Json(state.catalog.fetch_record(&id).await?))
}
