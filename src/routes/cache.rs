use axum::{Json, extract::State};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::common::AppState;
use crate::error::AppResult;
use crate::services::cache;

#[derive(Debug, Serialize, ToSchema)]
pub struct SweepResponse {
    pub removed: usize,
}

/// Run the cache maintenance sweep
///
/// Removes entries written by another version, undecodable entries, and
/// entries fetched longer ago than the span they cover.
#[utoipa::path(
    post,
    path = "/api/cache/sweep",
    responses(
        (status = 200, description = "Sweep completed", body = SweepResponse),
    ),
    tag = "cache"
)]
pub async fn sweep_cache(State(state): State<AppState>) -> AppResult<Json<SweepResponse>> {
    let removed = cache::sweep(state.cache_store.as_ref(), Utc::now()).await?;
    Ok(Json(SweepResponse { removed }))
}
