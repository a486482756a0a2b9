use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use utoipa::ToSchema;

use crate::common::AppState;
use crate::error::{AppError, AppResult};
use crate::sync::ChartSnapshot;

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub scheduled: bool,
    pub delay_ms: u64,
}

/// Latest chart snapshot
#[utoipa::path(
    get,
    path = "/api/snapshot",
    responses(
        (status = 200, description = "Latest snapshot of every series", body = ChartSnapshot),
        (status = 503, description = "No snapshot has been produced yet"),
    ),
    tag = "chart"
)]
pub async fn get_snapshot(State(state): State<AppState>) -> AppResult<Json<ChartSnapshot>> {
    state
        .snapshot
        .get()
        .map(|snapshot| Json(ChartSnapshot::clone(&snapshot)))
        .ok_or_else(|| AppError::ServiceUnavailable("Chart data is still loading".to_string()))
}

/// Schedule a debounced refresh
///
/// Bursts of requests collapse into a single refresh cycle.
#[utoipa::path(
    post,
    path = "/api/refresh",
    responses(
        (status = 202, description = "Refresh scheduled", body = RefreshResponse),
    ),
    tag = "chart"
)]
pub async fn request_refresh(State(state): State<AppState>) -> (StatusCode, Json<RefreshResponse>) {
    state.coordinator.request_update();
    let delay_ms = u64::try_from(state.coordinator.chart().debounce_ms()).unwrap_or_default();
    tracing::debug!(delay_ms, "refresh_requested");

    (
        StatusCode::ACCEPTED,
        Json(RefreshResponse {
            scheduled: true,
            delay_ms,
        }),
    )
}
