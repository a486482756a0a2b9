use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::Config;
use crate::services::cache::PersistentCache;
use crate::sync::{ChartSnapshot, SnapshotSink, UpdateCoordinator};

/// Latest snapshot handed over by the coordinator.
#[derive(Clone, Default)]
pub struct LatestSnapshot(Arc<RwLock<Option<Arc<ChartSnapshot>>>>);

impl LatestSnapshot {
    #[must_use]
    pub fn get(&self) -> Option<Arc<ChartSnapshot>> {
        self.0.read().clone()
    }
}

impl SnapshotSink for LatestSnapshot {
    fn apply(&self, snapshot: ChartSnapshot) {
        *self.0.write() = Some(Arc::new(snapshot));
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub coordinator: Arc<UpdateCoordinator>,
    pub cache_store: Arc<dyn PersistentCache>,
    pub snapshot: LatestSnapshot,
}

impl AppState {
    pub fn new(
        config: Config,
        coordinator: Arc<UpdateCoordinator>,
        cache_store: Arc<dyn PersistentCache>,
        snapshot: LatestSnapshot,
    ) -> Self {
        Self {
            config: Arc::new(config),
            coordinator,
            cache_store,
            snapshot,
        }
    }
}
