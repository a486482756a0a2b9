//! Chart configuration as written by the user.
//!
//! These types mirror the JSON document one-to-one. Presentation options
//! (colors, legends, axis formatting) are not modelled and are ignored on
//! deserialization. Use [`crate::chart::ChartConfig::from_spec`] to validate.

use serde::{Deserialize, Serialize};

use crate::engine::{AggregateFunc, FillPolicy};
use crate::source::{StatisticType, StatisticsAlign, StatisticsPeriod};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChartType {
    Line,
    Scatter,
    Pie,
    Donut,
    RadialBar,
}

impl ChartType {
    /// Chart types that plot values against a time axis.
    #[must_use]
    pub fn is_timeline(self) -> bool {
        matches!(self, Self::Line | Self::Scatter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SeriesType {
    Line,
    Column,
    Area,
    Scatter,
    Pie,
    Donut,
    RadialBar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpanUnit {
    Minute,
    Hour,
    Day,
    Week,
    IsoWeek,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtendTo {
    End,
    Now,
}

/// `extend_to` accepts `false` to disable extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtendToSpec {
    Flag(bool),
    To(ExtendTo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMode {
    Raw,
    BeforeNow,
    AfterNow,
}

/// `show.in_header` is either a boolean or one of the [`HeaderMode`] strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InHeaderSpec {
    Enabled(bool),
    Mode(HeaderMode),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<SpanUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<SpanUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupBySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<AggregateFunc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<FillPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_with_last: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSpec {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub stat_type: Option<StatisticType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<StatisticsPeriod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<StatisticsAlign>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShowSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_chart: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_header: Option<InHeaderSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesSpec {
    #[serde(default)]
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub series_type: Option<SeriesType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_generator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupBySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_raw: Option<FillPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<StatisticsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extend_to: Option<ExtendToSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invert: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show: Option<ShowSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(default)]
    pub series: Vec<SeriesSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<ChartType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_span: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<SpanSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_delay: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_compress: Option<bool>,
}

impl ChartSpec {
    /// Parse a chart document, folding `all_series_config` into every series.
    ///
    /// `all_series_config` is deep-merged under each series: objects merge
    /// key by key and the series' own values win.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the document does not match the
    /// configuration shape.
    pub fn from_json(document: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut document = document;
        if let Some(root) = document.as_object_mut() {
            // `entities` is accepted as an alias of `series`
            if !root.contains_key("series") {
                if let Some(entities) = root.remove("entities") {
                    root.insert("series".to_string(), entities);
                }
            }

            if let Some(all) = root.remove("all_series_config") {
                if let Some(serde_json::Value::Array(series)) = root.get_mut("series") {
                    for item in series.iter_mut() {
                        let own = std::mem::take(item);
                        *item = merge_deep(all.clone(), own);
                    }
                }
            }
        }
        serde_json::from_value(document)
    }
}

/// Deep-merge `source` into `target`; values from `source` win.
#[must_use]
pub fn merge_deep(target: serde_json::Value, source: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;

    match (target, source) {
        (Value::Object(mut target), Value::Object(source)) => {
            for (key, value) in source {
                let merged = match target.remove(&key) {
                    Some(existing) => merge_deep(existing, value),
                    None => value,
                };
                target.insert(key, merged);
            }
            Value::Object(target)
        }
        (_, source) => source,
    }
}
