//! Storage configuration tree.
//!
//! Values deserialize with serde defaults for every missing field; call
//! [`StorageConfig::validate`] before use.

mod types;
mod validate;

pub use types::{
    ConfigIssue, FileConfig, PoolConfig, QueueConfig, QueueFullPolicy, RelationalConfig,
    SeedConfig, StorageConfig,
};
