pub mod cache;
pub mod health;
pub mod snapshot;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::common::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::healthz,
        snapshot::get_snapshot,
        snapshot::request_refresh,
        cache::sweep_cache,
    ),
    components(
        schemas(
            health::HealthResponse,
            snapshot::RefreshResponse,
            cache::SweepResponse,
            crate::sync::ChartSnapshot,
            crate::sync::SeriesSnapshot,
            crate::sync::Window,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "chart", description = "Chart snapshots and refresh triggers"),
        (name = "cache", description = "History cache maintenance"),
    ),
    info(
        title = "Chart History API",
        description = "Cached, aggregated history for dashboard chart series",
        version = "0.1.0"
    )
)]
struct ApiDoc;

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/snapshot", get(snapshot::get_snapshot))
        .route("/refresh", post(snapshot::request_refresh))
        .route("/cache/sweep", post(cache::sweep_cache))
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    let health_routes = Router::new().route("/healthz", get(health::healthz));

    // OpenAPI documentation
    let docs_routes = Router::new().merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(docs_routes)
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
