//! holdfast: write-behind record storage.
//!
//! Callers get [`CachedRepository`] instances from a [`StorageSession`].
//! Saves land in an in-memory cache immediately and reach the backend (sharded
//! JSON files or SQLite) through a bounded [`WriteQueue`] that coalesces
//! repeated writes of the same record.

pub mod cache;
pub mod config;
pub mod health;
pub mod maintenance;
pub mod queue;
pub mod retry;
pub mod session;
pub mod storage;
pub mod transfer;

pub use cache::{CacheManager, MetricsSnapshot};
pub use health::HealthReport;
pub use maintenance::SeedReport;
pub use queue::{WriteQueue, WriteTask};
pub use retry::{RetryExecutor, RetryOutcome};
pub use session::{ActiveBackend, SessionError, SessionHandle, StorageSession};
pub use storage::cached::{CachedRepository, FlushReport};
pub use transfer::{transfer, TransferOptions, TransferReport};
