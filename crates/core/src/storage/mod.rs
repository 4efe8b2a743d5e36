mod error;
mod traits;
mod types;

pub use error::{RepositoryError, Result};
pub use traits::{PoolMetrics, Repository, StorageBackend};
pub use types::{BackendKind, PoolStats};
