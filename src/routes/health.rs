use axum::{Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

use crate::common::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub data_loaded: bool,
    pub updating: bool,
}

/// Health check endpoint
///
/// Returns 200 OK while the service is running, along with whether the
/// chart has completed its first load.
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        data_loaded: state.coordinator.is_data_loaded(),
        updating: state.coordinator.is_updating(),
    })
}
