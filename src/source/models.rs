use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current snapshot of one entity as reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// One recorded state change from `/history/period`.
///
/// With `minimal_response` only the first entry carries `entity_id` and
/// `attributes`, so both are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub attributes: Option<Map<String, Value>>,
    pub last_changed: DateTime<Utc>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Response of `/history/period`: one array per requested entity.
pub type HistoryResponse = Vec<Vec<HistoryEntry>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatisticsPeriod {
    #[serde(rename = "5minute")]
    FiveMinute,
    #[default]
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "week")]
    Week,
    #[serde(rename = "month")]
    Month,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatisticType {
    #[default]
    Mean,
    Min,
    Max,
    Sum,
    State,
    Change,
}

/// Which instant of a statistics bucket represents it on the time axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatisticsAlign {
    Start,
    #[default]
    Middle,
    End,
}

/// One pre-aggregated bucket from `recorder/statistics_during_period`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticValue {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub mean: Option<f64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub sum: Option<f64>,
    #[serde(default)]
    pub state: Option<f64>,
    #[serde(default)]
    pub change: Option<f64>,
}

impl StatisticValue {
    /// The value of the requested statistic type.
    #[must_use]
    pub fn value(&self, stat_type: StatisticType) -> Option<f64> {
        match stat_type {
            StatisticType::Mean => self.mean,
            StatisticType::Min => self.min,
            StatisticType::Max => self.max,
            StatisticType::Sum => self.sum,
            StatisticType::State => self.state,
            StatisticType::Change => self.change,
        }
    }

    /// Representative timestamp of the bucket in milliseconds.
    #[must_use]
    pub fn timestamp_ms(&self, align: StatisticsAlign) -> i64 {
        let start = self.start.timestamp_millis();
        let end = self.end.timestamp_millis();
        match align {
            StatisticsAlign::Start => start,
            StatisticsAlign::Middle => start + (end - start) / 2,
            StatisticsAlign::End => end,
        }
    }
}

/// Raw history query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub entity_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Drop attributes from the response; only safe when no attribute is read.
    pub no_attributes: bool,
    /// Skip the synthetic point the host inserts at `start`.
    pub skip_initial_state: bool,
}

/// Statistics query body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticsRequest {
    #[serde(rename = "statistic_ids", serialize_with = "single_id")]
    pub statistic_id: String,
    #[serde(rename = "start_time")]
    pub start: DateTime<Utc>,
    #[serde(rename = "end_time")]
    pub end: DateTime<Utc>,
    pub period: StatisticsPeriod,
    #[serde(rename = "types", serialize_with = "single_type")]
    pub stat_type: StatisticType,
    #[serde(skip)]
    pub align: StatisticsAlign,
}

fn single_id<S: serde::Serializer>(id: &str, s: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;
    let mut seq = s.serialize_seq(Some(1))?;
    seq.serialize_element(id)?;
    seq.end()
}

fn single_type<S: serde::Serializer>(t: &StatisticType, s: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;
    let mut seq = s.serialize_seq(Some(1))?;
    seq.serialize_element(t)?;
    seq.end()
}
