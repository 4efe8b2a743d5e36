use async_trait::async_trait;

use crate::record::Record;

use super::{BackendKind, PoolStats, Result};

/// CRUD contract every backend implements for one record namespace.
#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    /// The repository's namespace name, e.g. `"meta"`.
    fn name(&self) -> &str;

    /// Loads a record by id.
    async fn load(&self, id: &str) -> Result<Option<T>>;

    /// Inserts or replaces a record.
    async fn save(&self, record: &T) -> Result<()>;

    /// Deletes a record by id. Deleting a missing record is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Checks whether a record exists.
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Loads up to `limit` records, or all of them when `limit` is `None`.
    ///
    /// Unreadable individual records are skipped, never failing the scan.
    async fn load_all(&self, limit: Option<usize>) -> Result<Vec<T>>;

    /// Counts stored records.
    async fn count(&self) -> Result<u64>;
}

/// Capability for backends that sit on a connection pool.
pub trait PoolMetrics: Send + Sync {
    /// Current pool counts.
    fn pool_stats(&self) -> PoolStats;
}

/// A backend instance shared by every repository built over it.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether initialization finished and the backend accepts operations.
    fn is_ready(&self) -> bool;

    /// Pool counts, for backends that have a pool.
    fn pool_metrics(&self) -> Option<&dyn PoolMetrics> {
        None
    }

    /// Performs a cheap round trip against the durable medium.
    async fn probe(&self) -> Result<()>;

    /// Releases connections and file handles.
    async fn close(&self);
}
