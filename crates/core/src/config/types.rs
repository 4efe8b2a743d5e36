use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::retry::RetryPolicy;
use crate::shard::ShardConfig;
use crate::storage::BackendKind;

/// Behavior of the write queue when it is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueFullPolicy {
    /// Wait for space up to the full timeout, then run the write inline.
    #[default]
    Block,
    /// Reject the write.
    Drop,
    /// Run the write inline on the caller.
    Sync,
}

impl fmt::Display for QueueFullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueFullPolicy::Block => "block",
            QueueFullPolicy::Drop => "drop",
            QueueFullPolicy::Sync => "sync",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for QueueFullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(QueueFullPolicy::Block),
            "drop" => Ok(QueueFullPolicy::Drop),
            "sync" => Ok(QueueFullPolicy::Sync),
            other => Err(format!("unknown queue full policy: {other}")),
        }
    }
}

/// Write queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_size: usize,
    pub full_policy: QueueFullPolicy,
    pub full_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 5000,
            full_policy: QueueFullPolicy::Block,
            full_timeout_ms: 200,
        }
    }
}

impl QueueConfig {
    pub fn new(max_size: usize, full_policy: QueueFullPolicy, full_timeout: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            full_policy,
            full_timeout_ms: full_timeout.as_millis() as u64,
        }
    }

    pub fn full_timeout(&self) -> Duration {
        Duration::from_millis(self.full_timeout_ms)
    }
}

/// File backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Root directory; each repository gets a subdirectory.
    pub path: String,
    pub shard: ShardConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: "data".to_string(),
            shard: ShardConfig::default(),
        }
    }
}

/// Connection pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_size: u32,
    pub min_idle: u32,
    pub connection_timeout_ms: u64,
    pub idle_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 2,
            connection_timeout_ms: 10_000,
            idle_timeout_ms: 600_000,
        }
    }
}

/// Relational backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    /// Connection URL, e.g. `sqlite://holdfast.db`.
    pub url: String,
    pub pool: PoolConfig,
}

/// Well-known `meta` records written once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub enabled: bool,
    pub owner: String,
    pub server_name: String,
    pub seed_owner: bool,
    pub seed_server_name: bool,
    pub seed_created_at: bool,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            owner: "admin".to_string(),
            server_name: "holdfast".to_string(),
            seed_owner: true,
            seed_server_name: true,
            seed_created_at: true,
        }
    }
}

/// Complete storage configuration for one session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    pub file: FileConfig,
    pub relational: RelationalConfig,
    pub queue: QueueConfig,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
    pub seed: SeedConfig,
}

/// A configuration value that was replaced because it was invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    /// Dotted path of the offending setting, e.g. `file.shard.depth`.
    pub path: String,
    pub message: String,
}

impl ConfigIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}
