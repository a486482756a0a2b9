use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::source::HistorySource;
use crate::sync::coordinator::UpdateCoordinator;

/// Refresh the chart every `period`, independent of state changes.
///
/// The first tick is one period after start; the initial load is done by
/// [`UpdateCoordinator::start`]. Ends once the coordinator is gone or shut down.
pub async fn run_interval_updates(coordinator: Weak<UpdateCoordinator>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        if coordinator.is_torn_down() {
            break;
        }

        tracing::debug!("Running interval update...");
        if !coordinator.update().await {
            tracing::debug!("Interval update skipped, another update is in flight");
        }
    }
}

/// Poll the current state of every tracked entity and feed it to the coordinator.
pub async fn run_state_poller(
    coordinator: Arc<UpdateCoordinator>,
    source: Arc<dyn HistorySource>,
    period: Duration,
) {
    let entities = coordinator.entities();
    tracing::info!(
        interval_secs = period.as_secs(),
        entities = entities.len(),
        "Starting state poller"
    );

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // First tick completes immediately
        ticker.tick().await;
        if coordinator.is_torn_down() {
            break;
        }

        for entity_id in &entities {
            match source.fetch_state(entity_id).await {
                Ok(Some(state)) => coordinator.on_state_change(state),
                Ok(None) => {
                    tracing::warn!(entity = %entity_id, "Entity not found on host");
                }
                Err(e) if e.to_string().contains("Rate limited") => {
                    tracing::warn!(entity = %entity_id, "State poll rate limited, waiting for next tick");
                    break;
                }
                Err(e) => {
                    tracing::error!(entity = %entity_id, error = %e, "State poll failed");
                }
            }
        }
    }
}
