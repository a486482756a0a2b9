//! Drives every series engine of one chart through coherent refresh cycles.

use chrono::{DateTime, Duration as TimeDelta, Local, TimeZone, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::chart::{ChartConfig, HeaderValue};
use crate::engine::SeriesHistoryEngine;
use crate::services::cache::PersistentCache;
use crate::source::{EntityState, HistorySource};
use crate::sync::debounce::DebouncedAction;
use crate::sync::scheduler;
use crate::sync::snapshot::{self, SnapshotSink};
use crate::sync::span::{self, Window};

/// Clears a flag when dropped.
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct UpdateCoordinator {
    chart: Arc<ChartConfig>,
    engines: Vec<Arc<SeriesHistoryEngine>>,
    sink: Arc<dyn SnapshotSink>,
    debounce: DebouncedAction,
    interval_task: Mutex<Option<JoinHandle<()>>>,
    /// Last entity snapshot seen per series, for change detection.
    observed: Mutex<Vec<Option<EntityState>>>,
    updating: AtomicBool,
    data_loaded: AtomicBool,
    torn_down: AtomicBool,
}

impl UpdateCoordinator {
    pub fn new(
        chart: ChartConfig,
        source: Arc<dyn HistorySource>,
        store: Arc<dyn PersistentCache>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Arc<Self> {
        let chart = Arc::new(chart);
        let engines: Vec<Arc<SeriesHistoryEngine>> = chart
            .series
            .iter()
            .cloned()
            .map(|series| {
                Arc::new(SeriesHistoryEngine::new(
                    &chart,
                    series,
                    Arc::clone(&source),
                    Arc::clone(&store),
                ))
            })
            .collect();
        let delay = Duration::from_millis(u64::try_from(chart.debounce_ms()).unwrap_or_default());

        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let debounce = DebouncedAction::new(delay, move || {
                let weak = weak.clone();
                async move {
                    if let Some(coordinator) = weak.upgrade() {
                        coordinator.update().await;
                    }
                }
            });

            Self {
                observed: Mutex::new(vec![None; engines.len()]),
                chart,
                engines,
                sink,
                debounce,
                interval_task: Mutex::new(None),
                updating: AtomicBool::new(false),
                data_loaded: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
            }
        })
    }

    #[must_use]
    pub fn chart(&self) -> &ChartConfig {
        &self.chart
    }

    #[must_use]
    pub fn engines(&self) -> &[Arc<SeriesHistoryEngine>] {
        &self.engines
    }

    /// Distinct entities tracked by the chart, in series order.
    #[must_use]
    pub fn entities(&self) -> Vec<String> {
        let mut entities: Vec<String> = Vec::new();
        for engine in &self.engines {
            let entity = &engine.series().entity;
            if !entities.contains(entity) {
                entities.push(entity.clone());
            }
        }
        entities
    }

    #[must_use]
    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_data_loaded(&self) -> bool {
        self.data_loaded.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn has_pending_update(&self) -> bool {
        self.debounce.is_pending()
    }

    /// Load data once, then refresh on `update_interval` if configured.
    pub async fn start(self: &Arc<Self>) {
        if let Some(interval_ms) = self.chart.update_interval_ms {
            let period = Duration::from_millis(u64::try_from(interval_ms).unwrap_or(1));
            tracing::info!(interval_ms, "Starting interval updates");
            let handle = tokio::spawn(scheduler::run_interval_updates(Arc::downgrade(self), period));
            let previous = self.interval_task.lock().replace(handle);
            if let Some(previous) = previous {
                previous.abort();
            }
        }
        self.update().await;
    }

    /// Feed a fresh entity snapshot from the host.
    ///
    /// The first load runs as soon as every series has a state. After that,
    /// and only without `update_interval`, a change to a displayed series
    /// schedules a debounced update.
    pub fn on_state_change(self: &Arc<Self>, entity: EntityState) {
        if self.is_torn_down() {
            return;
        }

        let mut changed = false;
        let mut relevant_change = false;
        {
            let mut observed = self.observed.lock();
            for (engine, seen) in self.engines.iter().zip(observed.iter_mut()) {
                let series = engine.series();
                if series.entity != entity.entity_id {
                    continue;
                }
                engine.set_entity_state(entity.clone());
                if seen.as_ref() != Some(&entity) {
                    *seen = Some(entity.clone());
                    changed = true;
                    relevant_change |= series.in_chart || series.header != HeaderValue::Hidden;
                }
            }
        }

        if !changed {
            return;
        }

        if !self.is_data_loaded() {
            if self.has_all_entity_states() {
                let coordinator = Arc::clone(self);
                tokio::spawn(async move {
                    coordinator.update().await;
                });
            }
        } else if relevant_change && self.chart.update_interval_ms.is_none() {
            self.debounce.trigger();
        }
    }

    fn has_all_entity_states(&self) -> bool {
        self.engines.iter().all(|e| e.entity_state().is_some())
    }

    /// Ask for an update; bursts are coalesced by the debounce delay.
    pub fn request_update(&self) {
        if !self.is_torn_down() {
            self.debounce.trigger();
        }
    }

    /// Run one refresh cycle now, using the local time zone for calendar spans.
    pub async fn update(&self) -> bool {
        self.update_at(&Local::now()).await
    }

    /// Run one refresh cycle as of `now`.
    ///
    /// Returns `false` when another cycle is in flight, some entity has no
    /// state yet, or the coordinator has been shut down, and `true` once a
    /// snapshot has been handed over.
    pub fn update_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> impl Future<Output = bool> + Send + '_ {
        let window = span::compute_window(&self.chart, now);
        let now = now.with_timezone(&Utc);
        self.run_cycle(window, now)
    }

    async fn run_cycle(&self, window: Window, now: DateTime<Utc>) -> bool {
        if self.is_torn_down() {
            return false;
        }
        if !self.has_all_entity_states() {
            tracing::debug!("update_waiting_for_entity_states");
            return false;
        }
        if self
            .updating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("update_in_progress");
            return false;
        }
        let _guard = FlagGuard(&self.updating);

        let refreshes = self.engines.iter().map(|engine| {
            let offset = TimeDelta::milliseconds(engine.series().offset_ms);
            engine.refresh(window.start + offset, window.end + offset)
        });
        let changed = join_all(refreshes).await;

        if self.is_torn_down() {
            tracing::debug!("update_discarded_after_shutdown");
            return false;
        }

        let snapshot = snapshot::assemble(&self.chart, &self.engines, window, now);
        self.sink.apply(snapshot);
        self.data_loaded.store(true, Ordering::Release);

        tracing::debug!(
            series = self.engines.len(),
            changed = changed.iter().filter(|c| **c).count(),
            start = %window.start,
            end = %window.end,
            "chart_updated"
        );
        true
    }

    /// Stop timers; in-flight refreshes finish but their results are dropped.
    pub fn shutdown(&self) {
        self.torn_down.store(true, Ordering::Release);
        self.debounce.cancel();
        if let Some(handle) = self.interval_task.lock().take() {
            handle.abort();
        }
        tracing::info!("Update coordinator shut down");
    }
}
