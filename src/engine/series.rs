//! History acquisition for one chart series.
//!
//! A refresh walks: re-entrancy guard, pre-image window, ignore-history or
//! generator short-circuits, cache read, fetch, merge, cache write, bucketing.
//! No failure inside a refresh escapes it; the previous history survives.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::chart::{ChartConfig, SeriesConfig};
use crate::engine::aggregate::{AggregateFunc, reduce_buckets};
use crate::engine::bucket::{self, BUCKET_BOUNDARY};
use crate::engine::point::{ObservationPoint, merge_history, normalize};
use crate::services::cache::{self, CacheEntry, PersistentCache, StoredBlob};
use crate::source::{EntityState, HistoryEntry, HistoryRequest, HistorySource, StatisticsRequest};
use crate::transform::{TransformContext, TransformEvaluator, numeric_value};

/// Minimum and maximum points of a range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Extrema {
    pub min: ObservationPoint,
    pub max: ObservationPoint,
}

#[derive(Debug, Default)]
struct EngineState {
    entity: Option<EntityState>,
    history: Vec<ObservationPoint>,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Clears the refreshing flag however the refresh ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SeriesHistoryEngine {
    series: SeriesConfig,
    cache_enabled: bool,
    use_compress: bool,
    cache_key: String,
    source: Arc<dyn HistorySource>,
    store: Arc<dyn PersistentCache>,
    state: RwLock<EngineState>,
    refreshing: AtomicBool,
    transform_failure_logged: AtomicBool,
}

impl SeriesHistoryEngine {
    pub fn new(
        chart: &ChartConfig,
        series: SeriesConfig,
        source: Arc<dyn HistorySource>,
        store: Arc<dyn PersistentCache>,
    ) -> Self {
        let fingerprint = cache::fingerprint(chart.graph_span_ms, &series.source, &chart.span);
        let cache_key = cache::cache_key(&series.entity, &fingerprint, chart.use_compress);
        let cache_enabled = chart.cache
            && series.statistics.is_none()
            && series.data_generator.is_none()
            && !series.ignore_history;

        Self {
            series,
            cache_enabled,
            use_compress: chart.use_compress,
            cache_key,
            source,
            store,
            state: RwLock::new(EngineState::default()),
            refreshing: AtomicBool::new(false),
            transform_failure_logged: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn series(&self) -> &SeriesConfig {
        &self.series
    }

    #[must_use]
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Record the latest snapshot of the tracked entity.
    pub fn set_entity_state(&self, entity: EntityState) {
        self.state.write().entity = Some(entity);
    }

    #[must_use]
    pub fn entity_state(&self) -> Option<EntityState> {
        self.state.read().entity.clone()
    }

    #[must_use]
    pub fn history(&self) -> Vec<ObservationPoint> {
        self.state.read().history.clone()
    }

    /// Window of the last completed refresh.
    #[must_use]
    pub fn window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.state.read().window
    }

    #[must_use]
    pub fn last_state(&self) -> Option<f64> {
        self.state.read().history.last().and_then(|p| p.value)
    }

    #[must_use]
    pub fn min(&self) -> Option<f64> {
        self.state
            .read()
            .history
            .iter()
            .filter_map(|p| p.value)
            .reduce(f64::min)
    }

    #[must_use]
    pub fn max(&self) -> Option<f64> {
        self.state
            .read()
            .history
            .iter()
            .filter_map(|p| p.value)
            .reduce(f64::max)
    }

    /// Value of the last point at or before `t_ms`.
    #[must_use]
    pub fn value_at_or_before(&self, t_ms: i64) -> Option<f64> {
        let state = self.state.read();
        let idx = state.history.partition_point(|p| p.timestamp_ms <= t_ms);
        idx.checked_sub(1).and_then(|i| state.history[i].value)
    }

    /// Value of the first point at or after `t_ms`.
    #[must_use]
    pub fn value_at_or_after(&self, t_ms: i64) -> Option<f64> {
        let state = self.state.read();
        let idx = state.history.partition_point(|p| p.timestamp_ms < t_ms);
        state.history.get(idx).and_then(|p| p.value)
    }

    /// Lowest and highest non-null points within `[start_ms, end_ms]`,
    /// timestamps shifted back by `offset_ms`.
    #[must_use]
    pub fn extrema_in_range(&self, start_ms: i64, end_ms: i64, offset_ms: i64) -> Option<Extrema> {
        let state = self.state.read();
        if let [only] = state.history.as_slice() {
            let value = only.value?;
            return Some(Extrema {
                min: ObservationPoint::new(start_ms, Some(value)),
                max: ObservationPoint::new(end_ms, Some(value)),
            });
        }

        let mut extrema: Option<Extrema> = None;
        for point in &state.history {
            let Some(value) = point.value else { continue };
            if point.timestamp_ms < start_ms || point.timestamp_ms > end_ms {
                continue;
            }
            extrema = Some(match extrema {
                None => Extrema {
                    min: *point,
                    max: *point,
                },
                Some(mut acc) => {
                    if acc.min.value.is_some_and(|m| value < m) {
                        acc.min = *point;
                    }
                    if acc.max.value.is_some_and(|m| value > m) {
                        acc.max = *point;
                    }
                    acc
                }
            });
        }

        extrema.map(|mut e| {
            e.min.timestamp_ms -= offset_ms;
            e.max.timestamp_ms -= offset_ms;
            e
        })
    }

    /// Extrema for axis scaling: the range is widened to the last point
    /// before `start_ms` so the line entering the window is accounted for.
    #[must_use]
    pub fn extrema_for_axis(&self, start_ms: i64, end_ms: i64) -> Option<Extrema> {
        let widened_start = {
            let state = self.state.read();
            let idx = state.history.partition_point(|p| p.timestamp_ms < start_ms);
            idx.checked_sub(1)
                .map_or(start_ms, |i| state.history[i].timestamp_ms)
        };
        self.extrema_in_range(widened_start, end_ms, 0)
    }

    /// Bring the history up to date for `[start, end]`.
    ///
    /// Returns `true` when the computed history changed. Returns `false`
    /// without touching anything when no entity state has been seen yet,
    /// another refresh of this engine is in flight, or the source failed
    /// with nothing cached to fall back on.
    pub async fn refresh(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let Some(entity) = self.entity_state() else {
            return false;
        };
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(entity = %self.series.entity, "refresh_in_progress");
            return false;
        }
        let _guard = RefreshGuard(&self.refreshing);

        let start_ms = start.timestamp_millis();
        let end_ms = end.timestamp_millis();
        let group_by = self.series.group_by;
        let fetch_start_ms = if group_by.func == AggregateFunc::Raw {
            start_ms
        } else {
            bucket::fetch_start(start_ms, end_ms, group_by.duration_ms)
        };

        let history = if self.series.ignore_history {
            self.current_point(&entity)
        } else if let Some(generator) = &self.series.data_generator {
            self.generate(generator.as_ref(), &entity, fetch_start_ms, end_ms)
        } else {
            let fetched = if self.series.statistics.is_some() {
                self.fetch_statistics(fetch_start_ms, end).await
            } else {
                self.fetch_cached_history(fetch_start_ms, end).await
            };
            let Some(points) = fetched else {
                return false;
            };

            if group_by.func == AggregateFunc::Raw {
                points
            } else {
                let buckets = bucket::bucketize(
                    &points,
                    start_ms,
                    end_ms,
                    group_by.duration_ms,
                    BUCKET_BOUNDARY,
                );
                reduce_buckets(
                    &buckets,
                    group_by.func,
                    group_by.fill,
                    self.series.trims_leading_nulls(),
                )
            }
        };

        let mut state = self.state.write();
        state.window = Some((start, end));
        let changed = state.history != history;
        state.history = history;
        tracing::debug!(
            entity = %self.series.entity,
            points = state.history.len(),
            changed,
            "history_refreshed"
        );
        changed
    }

    /// Single point built from the entity's current state.
    fn current_point(&self, entity: &EntityState) -> Vec<ObservationPoint> {
        let raw = match &self.series.attribute {
            Some(attr) => entity.attributes.get(attr).cloned().unwrap_or(Value::Null),
            None => Value::String(entity.state.clone()),
        };
        let timestamp_ms = entity.last_updated.timestamp_millis();
        let ctx = TransformContext {
            timestamp_ms,
            state: Some(&entity.state),
            attributes: Some(&entity.attributes),
        };
        let value = self.transform(numeric_value(&raw), &ctx);
        vec![ObservationPoint::new(timestamp_ms, value)]
    }

    /// Evaluate the generator at every bucket step across `(from, to]`.
    fn generate(
        &self,
        generator: &dyn TransformEvaluator,
        entity: &EntityState,
        from_ms: i64,
        to_ms: i64,
    ) -> Vec<ObservationPoint> {
        let step = self.series.group_by.duration_ms;
        let x = numeric_value(&Value::String(entity.state.clone())).unwrap_or(f64::NAN);

        let mut points = Vec::new();
        let mut t = from_ms + step;
        while t <= to_ms {
            let ctx = TransformContext {
                timestamp_ms: t,
                state: Some(&entity.state),
                attributes: Some(&entity.attributes),
            };
            let value = match generator.evaluate(x, &ctx) {
                Ok(v) => Some(v),
                Err(e) => {
                    self.log_transform_failure(&e.to_string());
                    None
                }
            };
            points.push(ObservationPoint::new(t, value));
            t += step;
        }
        points
    }

    /// Long-term statistics for `[from, end]`, or `None` when the source failed.
    async fn fetch_statistics(&self, from_ms: i64, end: DateTime<Utc>) -> Option<Vec<ObservationPoint>> {
        let stats = self.series.statistics?;
        let request = StatisticsRequest {
            statistic_id: self.series.entity.clone(),
            start: DateTime::from_timestamp_millis(from_ms).unwrap_or(end),
            end,
            period: stats.period,
            stat_type: stats.stat_type,
            align: stats.align,
        };

        let values = match self.source.fetch_statistics(&request).await {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(entity = %self.series.entity, error = %e, "statistics_fetch_failed");
                return None;
            }
        };

        let mut last_known = None;
        let mut points: Vec<ObservationPoint> = values
            .iter()
            .map(|item| {
                let timestamp_ms = item.timestamp_ms(stats.align);
                let ctx = TransformContext {
                    timestamp_ms,
                    ..TransformContext::default()
                };
                let value = self.transform(item.value(stats.stat_type), &ctx);
                self.fill_raw(timestamp_ms, value, &mut last_known)
            })
            .collect();
        normalize(&mut points);
        Some(points)
    }

    /// Raw history for `[fetch_start, end]`, served from the cache where possible.
    ///
    /// A failed fetch counts as no new data; with nothing cached either, the
    /// result is `None` and the caller keeps its previous history.
    async fn fetch_cached_history(
        &self,
        fetch_start_ms: i64,
        end: DateTime<Utc>,
    ) -> Option<Vec<ObservationPoint>> {
        let cached = if self.cache_enabled {
            self.read_cache(fetch_start_ms).await
        } else {
            None
        };
        let has_cache = cached.is_some();
        let cached_points = cached.map(|entry| entry.data).unwrap_or_default();

        let fetch_from_ms = cached_points
            .last()
            .map_or(fetch_start_ms, |p| p.timestamp_ms.max(fetch_start_ms));
        let seed = cached_points.iter().rev().find_map(|p| p.value);
        let fresh = match self.fetch_raw(fetch_from_ms, end, seed).await {
            Some(fresh) => fresh,
            None if has_cache => Vec::new(),
            None => return None,
        };

        let mut merged = merge_history(&cached_points, &fresh);
        merged.retain(|p| p.timestamp_ms >= fetch_start_ms);

        if self.cache_enabled && !fresh.is_empty() {
            self.write_cache(CacheEntry::new(fetch_start_ms, merged.clone()))
                .await;
        }
        Some(merged)
    }

    /// A usable cache entry, or `None` after discarding an unusable one.
    async fn read_cache(&self, fetch_start_ms: i64) -> Option<CacheEntry> {
        let blob = match self.store.get(&self.cache_key).await {
            Ok(blob) => blob?,
            Err(e) => {
                tracing::warn!(cache_key = %self.cache_key, error = %e, "cache_read_failed");
                return None;
            }
        };

        let reason = match blob.decode() {
            Ok(entry) if !entry.is_current_version() => "version_mismatch",
            Ok(entry) if entry.span_covered_from_ms > fetch_start_ms => "span_too_short",
            Ok(entry) => {
                tracing::debug!(cache_key = %self.cache_key, points = entry.data.len(), "cache_hit");
                return Some(entry);
            }
            Err(e) => {
                tracing::warn!(cache_key = %self.cache_key, error = %e, "cache_undecodable");
                "undecodable"
            }
        };

        tracing::debug!(cache_key = %self.cache_key, reason, "cache_discarded");
        if let Err(e) = self.store.remove(&self.cache_key).await {
            tracing::warn!(cache_key = %self.cache_key, error = %e, "cache_remove_failed");
        }
        None
    }

    async fn write_cache(&self, entry: CacheEntry) {
        let result = match StoredBlob::encode(entry, self.use_compress) {
            Ok(blob) => self.store.set(&self.cache_key, blob).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(cache_key = %self.cache_key, error = %e, "cache_write_failed");
        }
    }

    /// Raw points in `[from_ms, end]`; `seed` is the last value known before
    /// `from_ms` and feeds the raw fill policy.
    async fn fetch_raw(
        &self,
        from_ms: i64,
        end: DateTime<Utc>,
        seed: Option<f64>,
    ) -> Option<Vec<ObservationPoint>> {
        let request = HistoryRequest {
            entity_id: self.series.entity.clone(),
            start: DateTime::from_timestamp_millis(from_ms).unwrap_or(end),
            end,
            no_attributes: self.series.attribute.is_none(),
            skip_initial_state: false,
        };

        let entries = match self.source.fetch_raw_history(&request).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(entity = %self.series.entity, error = %e, "history_fetch_failed");
                return None;
            }
        };
        tracing::debug!(entity = %self.series.entity, entries = entries.len(), "history_fetched");

        let mut last_known = seed;
        let mut points: Vec<ObservationPoint> = entries
            .iter()
            .map(|entry| self.entry_point(entry, &mut last_known))
            .collect();

        if self.series.group_by.start_with_last {
            if let Some(first) = points.first().copied() {
                points.insert(0, ObservationPoint::new(from_ms, first.value));
            }
        }
        normalize(&mut points);
        Some(points)
    }

    fn entry_point(&self, entry: &HistoryEntry, last_known: &mut Option<f64>) -> ObservationPoint {
        let raw = match &self.series.attribute {
            Some(attr) => entry.attributes.as_ref().and_then(|a| a.get(attr)),
            None => Some(&entry.state),
        };
        let timestamp_ms = entry.last_changed.timestamp_millis();
        let ctx = TransformContext {
            timestamp_ms,
            state: entry.state.as_str(),
            attributes: entry.attributes.as_ref(),
        };
        let value = self.transform(raw.and_then(numeric_value), &ctx);
        self.fill_raw(timestamp_ms, value, last_known)
    }

    fn transform(&self, value: Option<f64>, ctx: &TransformContext<'_>) -> Option<f64> {
        let value = value?;
        let Some(transform) = &self.series.transform else {
            return Some(value);
        };
        match transform.evaluate(value, ctx) {
            Ok(v) => Some(v),
            Err(e) => {
                self.log_transform_failure(&e.to_string());
                None
            }
        }
    }

    fn fill_raw(&self, timestamp_ms: i64, value: Option<f64>, last_known: &mut Option<f64>) -> ObservationPoint {
        if value.is_some() {
            *last_known = value;
        }
        ObservationPoint::new(timestamp_ms, self.series.fill_raw.fill(value, *last_known))
    }

    fn log_transform_failure(&self, error: &str) {
        if !self.transform_failure_logged.swap(true, Ordering::Relaxed) {
            tracing::warn!(entity = %self.series.entity, error, "transform_failed");
        }
    }
}
