//! Validated, immutable chart and series configuration.
//!
//! Everything that can be rejected is rejected here, before any engine is
//! built, with the offending field path in the error.

use std::sync::Arc;

use crate::chart::duration::{validate_interval, validate_offset};
use crate::chart::spec::{
    ChartSpec, ChartType, ExtendTo, ExtendToSpec, HeaderMode, InHeaderSpec, SeriesSpec,
    SeriesType, SpanSpec, SpanUnit,
};
use crate::config::ConfigError;
use crate::engine::{AggregateFunc, FillPolicy};
use crate::source::{StatisticType, StatisticsAlign, StatisticsPeriod};
use crate::transform::Expression;

pub const DEFAULT_GRAPH_SPAN_MS: i64 = 24 * 3_600_000;
pub const DEFAULT_GROUP_BY_DURATION: &str = "1h";
/// Lower bound for the state-change debounce.
pub const MIN_UPDATE_DELAY_MS: i64 = 500;
/// Upper bound on the buckets (or generator steps) one window may produce.
pub const MAX_BUCKETS_PER_WINDOW: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupBy {
    pub duration_ms: i64,
    pub func: AggregateFunc,
    pub fill: FillPolicy,
    pub start_with_last: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatisticsConfig {
    pub period: StatisticsPeriod,
    pub stat_type: StatisticType,
    pub align: StatisticsAlign,
}

/// Which value a series reports as its headline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderValue {
    Hidden,
    Last,
    Mode(HeaderMode),
}

#[derive(Debug, Clone)]
pub struct SeriesConfig {
    pub index: usize,
    pub entity: String,
    pub attribute: Option<String>,
    pub name: Option<String>,
    pub series_type: Option<SeriesType>,
    pub transform: Option<Arc<Expression>>,
    pub data_generator: Option<Arc<Expression>>,
    pub group_by: GroupBy,
    pub fill_raw: FillPolicy,
    pub statistics: Option<StatisticsConfig>,
    pub ignore_history: bool,
    pub offset_ms: i64,
    pub time_delta_ms: i64,
    pub extend_to: Option<ExtendTo>,
    pub invert: bool,
    pub in_chart: bool,
    pub header: HeaderValue,
    /// The user's series document after defaults; input to the cache fingerprint.
    pub source: SeriesSpec,
}

impl SeriesConfig {
    /// Continuous-line series start at their first non-null bucket.
    #[must_use]
    pub fn trims_leading_nulls(&self) -> bool {
        matches!(self.series_type, None | Some(SeriesType::Line | SeriesType::Area))
    }

    #[must_use]
    pub fn is_column(&self) -> bool {
        self.series_type == Some(SeriesType::Column)
    }
}

#[derive(Debug, Clone)]
pub struct ChartConfig {
    pub chart_type: Option<ChartType>,
    pub graph_span_ms: i64,
    pub span: SpanSpec,
    pub span_start: Option<SpanUnit>,
    pub span_end: Option<SpanUnit>,
    pub span_offset_ms: i64,
    pub update_interval_ms: Option<i64>,
    pub update_delay_ms: Option<i64>,
    pub cache: bool,
    pub use_compress: bool,
    pub series: Vec<SeriesConfig>,
}

impl ChartConfig {
    /// Validate a parsed chart document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn from_spec(spec: ChartSpec) -> Result<Self, ConfigError> {
        if spec.series.is_empty() {
            return Err(ConfigError::invalid("series", "at least one series is required"));
        }

        let graph_span_ms = match &spec.graph_span {
            Some(v) => validate_interval(v, "graph_span")?,
            None => DEFAULT_GRAPH_SPAN_MS,
        };
        if graph_span_ms <= 0 {
            return Err(ConfigError::invalid("graph_span", "must be positive"));
        }

        let update_interval_ms = spec
            .update_interval
            .as_deref()
            .map(|v| validate_interval(v, "update_interval"))
            .transpose()?;
        if update_interval_ms.is_some_and(|ms| ms <= 0) {
            return Err(ConfigError::invalid("update_interval", "must be positive"));
        }

        let update_delay_ms = spec
            .update_delay
            .as_deref()
            .map(|v| validate_interval(v, "update_delay"))
            .transpose()?;

        let span = spec.span.clone().unwrap_or_default();
        if span.start.is_some() && span.end.is_some() {
            return Err(ConfigError::invalid(
                "span",
                "only one of 'start' or 'end' is allowed",
            ));
        }
        let span_offset_ms = span
            .offset
            .as_deref()
            .map(|v| validate_offset(v, "span.offset"))
            .transpose()?
            .unwrap_or(0);

        let series = spec
            .series
            .iter()
            .enumerate()
            .map(|(index, item)| build_series(index, item, spec.chart_type, graph_span_ms))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            chart_type: spec.chart_type,
            graph_span_ms,
            span_start: span.start,
            span_end: span.end,
            span_offset_ms,
            span,
            update_interval_ms,
            update_delay_ms,
            cache: spec.cache.unwrap_or(true),
            use_compress: spec.use_compress.unwrap_or(false),
            series,
        })
    }

    /// Parse and validate a JSON chart document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for malformed documents or options.
    pub fn from_json(document: serde_json::Value) -> Result<Self, ConfigError> {
        let spec = ChartSpec::from_json(document)
            .map_err(|e| ConfigError::invalid("<document>", e.to_string()))?;
        Self::from_spec(spec)
    }

    /// Delay applied to state-change driven refreshes.
    #[must_use]
    pub fn debounce_ms(&self) -> i64 {
        self.update_delay_ms
            .unwrap_or(0)
            .max(MIN_UPDATE_DELAY_MS)
    }

    #[must_use]
    pub fn is_timeline(&self) -> bool {
        self.chart_type.is_none_or(ChartType::is_timeline)
    }
}

fn build_series(
    index: usize,
    item: &SeriesSpec,
    chart_type: Option<ChartType>,
    graph_span_ms: i64,
) -> Result<SeriesConfig, ConfigError> {
    let path = |field: &str| format!("series[{index}].{field}");

    if item.entity.trim().is_empty() {
        return Err(ConfigError::invalid(path("entity"), "entity is required"));
    }

    let group_by_spec = item.group_by.clone().unwrap_or_default();
    let duration = group_by_spec
        .duration
        .clone()
        .unwrap_or_else(|| DEFAULT_GROUP_BY_DURATION.to_string());
    let duration_ms = validate_interval(&duration, &path("group_by.duration"))?;
    if duration_ms <= 0 {
        return Err(ConfigError::invalid(
            path("group_by.duration"),
            "must be positive",
        ));
    }
    let group_by = GroupBy {
        duration_ms,
        func: group_by_spec.func.unwrap_or(AggregateFunc::Raw),
        fill: group_by_spec.fill.unwrap_or(FillPolicy::Last),
        start_with_last: group_by_spec.start_with_last.unwrap_or(false),
    };

    let offset_ms = item
        .offset
        .as_deref()
        .map(|v| validate_offset(v, &path("offset")))
        .transpose()?
        .unwrap_or(0);
    let time_delta_ms = item
        .time_delta
        .as_deref()
        .map(|v| validate_offset(v, &path("time_delta")))
        .transpose()?
        .unwrap_or(0);

    let transform = item
        .transform
        .as_deref()
        .map(|src| {
            Expression::compile(src)
                .map(Arc::new)
                .map_err(|e| ConfigError::invalid(path("transform"), e.to_string()))
        })
        .transpose()?;
    let data_generator = item
        .data_generator
        .as_deref()
        .map(|src| {
            Expression::compile(src)
                .map(Arc::new)
                .map_err(|e| ConfigError::invalid(path("data_generator"), e.to_string()))
        })
        .transpose()?;
    let steps = graph_span_ms / duration_ms;
    if (group_by.func != AggregateFunc::Raw || data_generator.is_some())
        && steps > MAX_BUCKETS_PER_WINDOW
    {
        return Err(ConfigError::invalid(
            path("group_by.duration"),
            format!("graph_span splits into {steps} buckets, more than {MAX_BUCKETS_PER_WINDOW}"),
        ));
    }

    let statistics = item.statistics.as_ref().map(|s| StatisticsConfig {
        period: s.period.unwrap_or_default(),
        stat_type: s.stat_type.unwrap_or_default(),
        align: s.align.unwrap_or_default(),
    });

    let ignore_history = chart_type.is_some_and(|t| !t.is_timeline())
        && group_by.func == AggregateFunc::Raw
        && data_generator.is_none()
        && statistics.is_none()
        && offset_ms == 0;

    let series_type = match chart_type {
        Some(_) => None,
        None => Some(item.series_type.unwrap_or(SeriesType::Line)),
    };

    let extend_to = match item.extend_to {
        None | Some(ExtendToSpec::Flag(true)) => Some(ExtendTo::End),
        Some(ExtendToSpec::Flag(false)) => None,
        Some(ExtendToSpec::To(to)) => Some(to),
    };

    let show = item.show.clone().unwrap_or_default();
    let header = match show.in_header {
        None | Some(InHeaderSpec::Enabled(true)) => HeaderValue::Last,
        Some(InHeaderSpec::Enabled(false)) => HeaderValue::Hidden,
        Some(InHeaderSpec::Mode(mode)) => HeaderValue::Mode(mode),
    };

    // Defaults are written back so that the fingerprint changes whenever an
    // effective option changes.
    let mut source = item.clone();
    let mut gb = group_by_spec;
    gb.duration = Some(duration);
    gb.func = Some(group_by.func);
    gb.fill = Some(group_by.fill);
    source.group_by = Some(gb);
    source.fill_raw = Some(item.fill_raw.unwrap_or(FillPolicy::Null));
    source.series_type = series_type;

    Ok(SeriesConfig {
        index,
        entity: item.entity.clone(),
        attribute: item.attribute.clone(),
        name: item.name.clone(),
        series_type,
        transform,
        data_generator,
        group_by,
        fill_raw: item.fill_raw.unwrap_or(FillPolicy::Null),
        statistics,
        ignore_history,
        offset_ms,
        time_delta_ms,
        extend_to,
        invert: item.invert.unwrap_or(false),
        in_chart: show.in_chart.unwrap_or(true),
        header,
        source,
    })
}
