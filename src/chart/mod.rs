pub mod config;
pub mod duration;
pub mod spec;

pub use config::{ChartConfig, GroupBy, HeaderValue, SeriesConfig, StatisticsConfig};
pub use duration::parse_duration;
pub use spec::{
    ChartSpec, ChartType, ExtendTo, HeaderMode, SeriesSpec, SeriesType, SpanSpec, SpanUnit,
};
