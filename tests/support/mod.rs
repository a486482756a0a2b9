//! In-memory doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chart_history::chart::ChartConfig;
use chart_history::engine::{ObservationPoint, SeriesHistoryEngine};
use chart_history::error::{AppError, AppResult};
use chart_history::services::cache::{MokaStore, PersistentCache, StoredBlob};
use chart_history::source::{
    EntityState, HistoryEntry, HistoryRequest, HistorySource, StatisticValue, StatisticsRequest,
};
use chart_history::sync::{ChartSnapshot, SnapshotSink};

pub fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

pub fn p(timestamp_ms: i64, value: Option<f64>) -> ObservationPoint {
    ObservationPoint::new(timestamp_ms, value)
}

pub fn entity(id: &str, state: &str) -> EntityState {
    entity_at(id, state, 0)
}

pub fn entity_at(id: &str, state: &str, updated_ms: i64) -> EntityState {
    EntityState {
        entity_id: id.to_string(),
        state: state.to_string(),
        attributes: Map::new(),
        last_changed: at(updated_ms),
        last_updated: at(updated_ms),
    }
}

pub fn chart(document: Value) -> ChartConfig {
    ChartConfig::from_json(document).unwrap()
}

/// Engine for the first series of `document`.
pub fn engine(
    document: Value,
    source: &Arc<FakeSource>,
    store: &Arc<CountingStore>,
) -> SeriesHistoryEngine {
    let chart = chart(document);
    let series = chart.series[0].clone();
    SeriesHistoryEngine::new(&chart, series, source.clone(), store.clone())
}

/// History host serving canned data.
///
/// Every fetch yields once before answering so that concurrent callers
/// interleave the way they would against a real network.
#[derive(Default)]
pub struct FakeSource {
    history: Mutex<Vec<(String, HistoryEntry)>>,
    statistics: Mutex<Vec<StatisticValue>>,
    states: Mutex<HashMap<String, EntityState>>,
    failing: AtomicBool,
    history_requests: Mutex<Vec<HistoryRequest>>,
    statistics_requests: Mutex<Vec<StatisticsRequest>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_history(&self, entity_id: &str, timestamp_ms: i64, state: &str) {
        self.history.lock().push((
            entity_id.to_string(),
            HistoryEntry {
                entity_id: None,
                state: json!(state),
                attributes: None,
                last_changed: at(timestamp_ms),
                last_updated: None,
            },
        ));
    }

    pub fn set_statistics(&self, values: Vec<StatisticValue>) {
        *self.statistics.lock() = values;
    }

    pub fn set_state(&self, state: EntityState) {
        self.states.lock().insert(state.entity_id.clone(), state);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn history_requests(&self) -> Vec<HistoryRequest> {
        self.history_requests.lock().clone()
    }

    pub fn statistics_requests(&self) -> Vec<StatisticsRequest> {
        self.statistics_requests.lock().clone()
    }

    fn check_failing(&self) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(AppError::HistorySource("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HistorySource for FakeSource {
    async fn fetch_raw_history(&self, request: &HistoryRequest) -> AppResult<Vec<HistoryEntry>> {
        tokio::task::yield_now().await;
        self.history_requests.lock().push(request.clone());
        self.check_failing()?;

        Ok(self
            .history
            .lock()
            .iter()
            .filter(|(id, entry)| {
                *id == request.entity_id
                    && entry.last_changed >= request.start
                    && entry.last_changed <= request.end
            })
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn fetch_statistics(
        &self,
        request: &StatisticsRequest,
    ) -> AppResult<Vec<StatisticValue>> {
        tokio::task::yield_now().await;
        self.statistics_requests.lock().push(request.clone());
        self.check_failing()?;
        Ok(self.statistics.lock().clone())
    }

    async fn fetch_state(&self, entity_id: &str) -> AppResult<Option<EntityState>> {
        self.check_failing()?;
        Ok(self.states.lock().get(entity_id).cloned())
    }
}

/// Real in-process store that counts writes and removals.
pub struct CountingStore {
    pub inner: MokaStore,
    sets: AtomicUsize,
    removes: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MokaStore::new(16 * 1024 * 1024),
            sets: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
        })
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistentCache for CountingStore {
    async fn get(&self, key: &str) -> AppResult<Option<StoredBlob>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, blob: StoredBlob) -> AppResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, blob).await
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(key).await
    }

    async fn entries(&self) -> AppResult<Vec<(String, StoredBlob)>> {
        self.inner.entries().await
    }
}

/// Keeps every snapshot it is handed.
#[derive(Default)]
pub struct RecordingSink {
    snapshots: Mutex<Vec<ChartSnapshot>>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn last(&self) -> Option<ChartSnapshot> {
        self.snapshots.lock().last().cloned()
    }
}

impl SnapshotSink for RecordingSink {
    fn apply(&self, snapshot: ChartSnapshot) {
        self.snapshots.lock().push(snapshot);
    }
}

/// Let spawned tasks run without moving the paused clock.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
