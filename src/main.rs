use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chart_history::chart::ChartConfig;
use chart_history::common::{AppState, LatestSnapshot};
use chart_history::config::Config;
use chart_history::routes;
use chart_history::services::cache::{self, PersistentCache};
use chart_history::services::file_store::FileStore;
use chart_history::source::{HistorySource, HttpHistorySource};
use chart_history::sync::{self, UpdateCoordinator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chart_history=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting chart-history...");

    // Load configuration (fail-fast)
    let config = Config::from_env()?;
    tracing::info!(
        deployment = ?config.deployment,
        host = %config.api_host,
        port = config.api_port,
        "Configuration loaded"
    );

    // Chart configuration is validated before any engine exists
    let document = tokio::fs::read_to_string(&config.chart_config_path).await?;
    let chart = ChartConfig::from_json(serde_json::from_str(&document)?)?;
    tracing::info!(
        path = %config.chart_config_path,
        series = chart.series.len(),
        "Chart configuration loaded"
    );

    let source: Arc<dyn HistorySource> = Arc::new(HttpHistorySource::new(&config)?);
    tracing::info!(base_url = %config.history_base_url, "History source initialized");

    let cache_store: Arc<dyn PersistentCache> =
        Arc::new(FileStore::open(&config.cache_dir, config.cache_max_bytes).await?);
    if let Err(e) = cache::sweep(cache_store.as_ref(), Utc::now()).await {
        tracing::warn!(error = %e, "Cache sweep failed");
    }

    let snapshot = LatestSnapshot::default();
    let coordinator = UpdateCoordinator::new(
        chart,
        Arc::clone(&source),
        Arc::clone(&cache_store),
        Arc::new(snapshot.clone()),
    );

    // Spawn background tasks (fire-and-forget, non-blocking)
    tracing::info!("Spawning background tasks...");
    tokio::spawn(sync::scheduler::run_state_poller(
        Arc::clone(&coordinator),
        Arc::clone(&source),
        Duration::from_secs(config.state_poll_interval_seconds),
    ));
    {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.start().await });
    }

    let addr = config.bind_address();
    let state = AppState::new(config, Arc::clone(&coordinator), cache_store, snapshot);

    // Build router
    let app = routes::build_router(state);

    // Start server with graceful shutdown
    tracing::info!(address = %addr, "Starting server");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.shutdown();
    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        },
    }
}
