//! Chart-ready output of one refresh cycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::chart::{ChartConfig, ExtendTo, HeaderMode, HeaderValue};
use crate::engine::{Extrema, ObservationPoint, SeriesHistoryEngine};
use crate::sync::span::Window;
use crate::transform::numeric_value;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChartSnapshot {
    pub generated_at: DateTime<Utc>,
    pub window: Window,
    pub series: Vec<SeriesSnapshot>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SeriesSnapshot {
    pub index: usize,
    pub entity: String,
    pub name: Option<String>,
    pub in_chart: bool,
    /// `[timestamp_ms, value|null]` pairs, empty for non-timeline charts.
    #[schema(value_type = Vec<Vec<Object>>)]
    pub data: Vec<ObservationPoint>,
    pub last_state: Option<f64>,
    pub header_value: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[schema(value_type = Option<Object>)]
    pub extrema: Option<Extrema>,
    /// Extrema including the point entering the window, for axis scaling.
    #[schema(value_type = Option<Object>)]
    pub axis_extrema: Option<Extrema>,
}

/// Receives every assembled snapshot, one call per refresh cycle.
pub trait SnapshotSink: Send + Sync {
    fn apply(&self, snapshot: ChartSnapshot);
}

/// Shape the engines' histories into one snapshot.
pub fn assemble(
    chart: &ChartConfig,
    engines: &[Arc<SeriesHistoryEngine>],
    window: Window,
    now: DateTime<Utc>,
) -> ChartSnapshot {
    let series = engines
        .iter()
        .map(|engine| {
            if chart.is_timeline() {
                timeline_series(engine, window, now)
            } else {
                single_value_series(engine)
            }
        })
        .collect();

    ChartSnapshot {
        generated_at: now,
        window,
        series,
    }
}

fn timeline_series(engine: &SeriesHistoryEngine, window: Window, now: DateTime<Utc>) -> SeriesSnapshot {
    let series = engine.series();
    let end_ms = window.end.timestamp_millis();
    let start_ms = window.start.timestamp_millis();
    let now_ms = now.timestamp_millis();

    let shift = series.offset_ms - series.time_delta_ms;
    let mut data: Vec<ObservationPoint> = engine
        .history()
        .into_iter()
        .map(|p| ObservationPoint::new(p.timestamp_ms - shift, p.value))
        .collect();

    if !series.is_column() {
        if let (Some(to), Some(last)) = (series.extend_to, data.last().copied()) {
            let target = match to {
                ExtendTo::End => end_ms,
                ExtendTo::Now => now_ms,
            };
            if last.timestamp_ms < target {
                data.push(ObservationPoint::new(target, last.value));
            }
        }
    }

    if series.invert {
        for point in &mut data {
            point.value = point.value.map(|v| -v);
        }
    }

    let header_value = match series.header {
        HeaderValue::Hidden => None,
        HeaderValue::Last => engine.last_state(),
        HeaderValue::Mode(HeaderMode::BeforeNow) => engine.value_at_or_before(now_ms + series.offset_ms),
        HeaderValue::Mode(HeaderMode::AfterNow) => engine.value_at_or_after(now_ms + series.offset_ms),
        HeaderValue::Mode(HeaderMode::Raw) => raw_state(engine),
    };

    SeriesSnapshot {
        index: series.index,
        entity: series.entity.clone(),
        name: series.name.clone(),
        in_chart: series.in_chart,
        data,
        last_state: engine.last_state(),
        header_value,
        min: engine.min(),
        max: engine.max(),
        extrema: engine.extrema_in_range(
            start_ms + series.offset_ms,
            end_ms + series.offset_ms,
            series.offset_ms,
        ),
        axis_extrema: engine.extrema_for_axis(start_ms + series.offset_ms, end_ms + series.offset_ms),
    }
}

fn single_value_series(engine: &SeriesHistoryEngine) -> SeriesSnapshot {
    let series = engine.series();
    let last_state = engine.last_state();
    let header_value = match series.header {
        HeaderValue::Hidden => None,
        HeaderValue::Mode(HeaderMode::Raw) => raw_state(engine),
        HeaderValue::Last | HeaderValue::Mode(_) => last_state,
    };

    SeriesSnapshot {
        index: series.index,
        entity: series.entity.clone(),
        name: series.name.clone(),
        in_chart: series.in_chart,
        data: Vec::new(),
        last_state,
        header_value,
        min: None,
        max: None,
        extrema: None,
        axis_extrema: None,
    }
}

/// Current entity state (or attribute), untransformed.
fn raw_state(engine: &SeriesHistoryEngine) -> Option<f64> {
    let entity = engine.entity_state()?;
    match &engine.series().attribute {
        Some(attr) => entity.attributes.get(attr).and_then(numeric_value),
        None => numeric_value(&Value::String(entity.state)),
    }
}
