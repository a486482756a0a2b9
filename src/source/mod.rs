pub mod client;
pub mod models;

use async_trait::async_trait;

pub use client::HttpHistorySource;
pub use models::{
    EntityState, HistoryEntry, HistoryRequest, StatisticType, StatisticValue, StatisticsAlign,
    StatisticsPeriod, StatisticsRequest,
};

use crate::error::AppResult;

/// Remote data API owned by the host environment.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Recorded state changes of one entity, ordered by time.
    async fn fetch_raw_history(&self, request: &HistoryRequest) -> AppResult<Vec<HistoryEntry>>;

    /// Pre-aggregated buckets of one statistic, ordered by time.
    async fn fetch_statistics(&self, request: &StatisticsRequest)
    -> AppResult<Vec<StatisticValue>>;

    /// Current state of one entity, `None` if the host does not know it.
    async fn fetch_state(&self, entity_id: &str) -> AppResult<Option<EntityState>>;
}
