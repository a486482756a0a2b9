pub mod aggregate;
pub mod bucket;
pub mod point;
pub mod series;

pub use aggregate::AggregateFunc;
pub use bucket::{BUCKET_BOUNDARY, Boundary, Bucket};
pub use point::{FillPolicy, ObservationPoint, merge_history};
pub use series::{Extrema, SeriesHistoryEngine};
