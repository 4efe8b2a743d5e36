//! Loading a [`StorageConfig`] from the environment or a JSON file.

use std::path::Path;
use std::str::FromStr;
use std::{env, fs};

use thiserror::Error;

use holdfast_core::config::StorageConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },
}

/// Reads a JSON config file. Missing fields take their defaults.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<StorageConfig, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load configuration from environment variables.
///
/// Every variable is optional; unset or unparsable values keep the default.
///
/// Environment variables:
/// - `HOLDFAST_BACKEND` - `file` or `relational` (default: file)
/// - `HOLDFAST_DATA_PATH` - File backend root (default: "data")
/// - `HOLDFAST_SHARD_ENABLED`, `HOLDFAST_SHARD_STRATEGY`, `HOLDFAST_SHARD_DEPTH`,
///   `HOLDFAST_SHARD_CHARS_PER_LEVEL`, `HOLDFAST_SHARD_MIGRATE_LEGACY`
/// - `HOLDFAST_DATABASE_URL` - Relational connection URL
/// - `HOLDFAST_POOL_MAX_SIZE`, `HOLDFAST_POOL_MIN_IDLE`
/// - `HOLDFAST_QUEUE_MAX_SIZE`, `HOLDFAST_QUEUE_FULL_POLICY`, `HOLDFAST_QUEUE_FULL_TIMEOUT_MS`
/// - `HOLDFAST_RETRY_ENABLED`, `HOLDFAST_RETRY_MAX_ATTEMPTS`, `HOLDFAST_RETRY_BASE_DELAY_MS`,
///   `HOLDFAST_RETRY_MAX_DELAY_MS`, `HOLDFAST_RETRY_JITTER_MS`
/// - `HOLDFAST_CACHE_ENABLED`, `HOLDFAST_CACHE_TTL_SECONDS`, `HOLDFAST_CACHE_MAX_ENTRIES`,
///   `HOLDFAST_CACHE_FLUSH_INTERVAL_SECONDS`, `HOLDFAST_CACHE_FLUSH_ON_SAVE`
/// - `HOLDFAST_WARMUP_ENABLED`, `HOLDFAST_WARMUP_MAX_ENTRIES`, `HOLDFAST_WARMUP_DELAY_SECONDS`
/// - `HOLDFAST_SEED_ENABLED`, `HOLDFAST_SEED_OWNER`, `HOLDFAST_SEED_SERVER_NAME`
pub fn from_env() -> StorageConfig {
    from_lookup(|key| env::var(key).ok())
}

fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StorageConfig {
    let mut config = StorageConfig::default();

    set(&mut config.backend, lookup("HOLDFAST_BACKEND"));
    if let Some(path) = lookup("HOLDFAST_DATA_PATH") {
        config.file.path = path;
    }

    let shard = &mut config.file.shard;
    set(&mut shard.enabled, lookup("HOLDFAST_SHARD_ENABLED"));
    set(&mut shard.strategy, lookup("HOLDFAST_SHARD_STRATEGY"));
    set(&mut shard.depth, lookup("HOLDFAST_SHARD_DEPTH"));
    set(&mut shard.chars_per_level, lookup("HOLDFAST_SHARD_CHARS_PER_LEVEL"));
    set(&mut shard.migrate_legacy_on_read, lookup("HOLDFAST_SHARD_MIGRATE_LEGACY"));

    if let Some(url) = lookup("HOLDFAST_DATABASE_URL") {
        config.relational.url = url;
    }
    set(&mut config.relational.pool.max_size, lookup("HOLDFAST_POOL_MAX_SIZE"));
    set(&mut config.relational.pool.min_idle, lookup("HOLDFAST_POOL_MIN_IDLE"));

    set(&mut config.queue.max_size, lookup("HOLDFAST_QUEUE_MAX_SIZE"));
    set(&mut config.queue.full_policy, lookup("HOLDFAST_QUEUE_FULL_POLICY"));
    set(&mut config.queue.full_timeout_ms, lookup("HOLDFAST_QUEUE_FULL_TIMEOUT_MS"));

    let retry = &mut config.retry;
    set(&mut retry.enabled, lookup("HOLDFAST_RETRY_ENABLED"));
    set(&mut retry.max_attempts, lookup("HOLDFAST_RETRY_MAX_ATTEMPTS"));
    set(&mut retry.base_delay_ms, lookup("HOLDFAST_RETRY_BASE_DELAY_MS"));
    set(&mut retry.max_delay_ms, lookup("HOLDFAST_RETRY_MAX_DELAY_MS"));
    set(&mut retry.jitter_ms, lookup("HOLDFAST_RETRY_JITTER_MS"));

    let cache = &mut config.cache;
    set(&mut cache.enabled, lookup("HOLDFAST_CACHE_ENABLED"));
    set(&mut cache.ttl_seconds, lookup("HOLDFAST_CACHE_TTL_SECONDS"));
    set(&mut cache.max_entries, lookup("HOLDFAST_CACHE_MAX_ENTRIES"));
    set(&mut cache.flush_interval_seconds, lookup("HOLDFAST_CACHE_FLUSH_INTERVAL_SECONDS"));
    set(&mut cache.default_policy.flush_on_save, lookup("HOLDFAST_CACHE_FLUSH_ON_SAVE"));
    set(&mut cache.warmup.enabled, lookup("HOLDFAST_WARMUP_ENABLED"));
    set(&mut cache.warmup.max_entries_per_repo, lookup("HOLDFAST_WARMUP_MAX_ENTRIES"));
    set(&mut cache.warmup.delay_seconds, lookup("HOLDFAST_WARMUP_DELAY_SECONDS"));

    let seed = &mut config.seed;
    set(&mut seed.enabled, lookup("HOLDFAST_SEED_ENABLED"));
    if let Some(owner) = lookup("HOLDFAST_SEED_OWNER") {
        seed.owner = owner;
    }
    if let Some(server_name) = lookup("HOLDFAST_SEED_SERVER_NAME") {
        seed.server_name = server_name;
    }

    config
}

/// Overwrites `target` when `value` parses.
fn set<T: FromStr>(target: &mut T, value: Option<String>) {
    if let Some(parsed) = value.and_then(|v| v.trim().parse().ok()) {
        *target = parsed;
    }
}
