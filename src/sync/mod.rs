pub mod coordinator;
pub mod debounce;
pub mod scheduler;
pub mod snapshot;
pub mod span;

pub use coordinator::UpdateCoordinator;
pub use debounce::DebouncedAction;
pub use snapshot::{ChartSnapshot, SeriesSnapshot, SnapshotSink};
pub use span::{Window, compute_window};
