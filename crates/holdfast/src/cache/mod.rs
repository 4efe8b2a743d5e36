//! In-memory caching: the record cache, its counters, and the manager that
//! flushes and warms every cached repository.

mod manager;
mod metrics;
mod record_cache;

pub use manager::{CacheManager, ManagedRepository};
pub use metrics::{CacheMetrics, MetricsSnapshot, GLOBAL_METRICS};
pub use record_cache::{DirtyRecord, RecordCache};
