//! Configuration validation.
//!
//! Invalid values never fail startup; they are replaced by their defaults and
//! reported as [`ConfigIssue`]s for the caller to log.

use crate::cache::{CacheConfig, WarmupConfig};
use crate::retry::RetryPolicy;
use crate::shard::{ShardConfig, SHARD_LEVEL_RANGE};
use crate::storage::BackendKind;

use super::{ConfigIssue, FileConfig, PoolConfig, QueueConfig, SeedConfig, StorageConfig};

impl StorageConfig {
    /// Returns a config with every invalid value replaced, plus the issues found.
    pub fn validate(self) -> (StorageConfig, Vec<ConfigIssue>) {
        let mut issues = Vec::new();
        let mut config = self;

        validate_file(&mut config.file, &mut issues);
        validate_queue(&mut config.queue, &mut issues);
        validate_retry(&mut config.retry, &mut issues);
        validate_cache(&mut config.cache, &mut issues);
        validate_pool(&mut config.relational.pool, &mut issues);
        validate_seed(&mut config.seed, &mut issues);

        if config.backend == BackendKind::Relational && config.relational.url.trim().is_empty() {
            issues.push(ConfigIssue::new(
                "relational.url",
                "empty connection url, using the file backend",
            ));
            config.backend = BackendKind::File;
        }

        (config, issues)
    }
}

fn validate_file(file: &mut FileConfig, issues: &mut Vec<ConfigIssue>) {
    let defaults = FileConfig::default();
    if file.path.trim().is_empty() {
        issues.push(ConfigIssue::new(
            "file.path",
            format!("empty path, using {:?}", defaults.path),
        ));
        file.path = defaults.path;
    }

    let shard_defaults = ShardConfig::default();
    if !SHARD_LEVEL_RANGE.contains(&file.shard.depth) {
        issues.push(ConfigIssue::new(
            "file.shard.depth",
            format!(
                "{} is outside 1-4, using {}",
                file.shard.depth, shard_defaults.depth
            ),
        ));
        file.shard.depth = shard_defaults.depth;
    }
    if !SHARD_LEVEL_RANGE.contains(&file.shard.chars_per_level) {
        issues.push(ConfigIssue::new(
            "file.shard.chars_per_level",
            format!(
                "{} is outside 1-4, using {}",
                file.shard.chars_per_level, shard_defaults.chars_per_level
            ),
        ));
        file.shard.chars_per_level = shard_defaults.chars_per_level;
    }
}

fn validate_queue(queue: &mut QueueConfig, issues: &mut Vec<ConfigIssue>) {
    if queue.max_size == 0 {
        let default = QueueConfig::default().max_size;
        issues.push(ConfigIssue::new(
            "queue.max_size",
            format!("must be at least 1, using {default}"),
        ));
        queue.max_size = default;
    }
}

fn validate_retry(retry: &mut RetryPolicy, issues: &mut Vec<ConfigIssue>) {
    let defaults = RetryPolicy::default();
    if retry.max_attempts == 0 {
        issues.push(ConfigIssue::new(
            "retry.max_attempts",
            format!("must be at least 1, using {}", defaults.max_attempts),
        ));
        retry.max_attempts = defaults.max_attempts;
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        issues.push(ConfigIssue::new(
            "retry.max_delay_ms",
            format!(
                "{} is below base delay {}, raising it",
                retry.max_delay_ms, retry.base_delay_ms
            ),
        ));
        retry.max_delay_ms = retry.base_delay_ms;
    }
}

fn validate_cache(cache: &mut CacheConfig, issues: &mut Vec<ConfigIssue>) {
    let defaults = CacheConfig::default();
    if cache.ttl_seconds == 0 {
        issues.push(ConfigIssue::new(
            "cache.ttl_seconds",
            format!("must be positive, using {}", defaults.ttl_seconds),
        ));
        cache.ttl_seconds = defaults.ttl_seconds;
    }
    if cache.max_entries == 0 {
        issues.push(ConfigIssue::new(
            "cache.max_entries",
            format!("must be positive, using {}", defaults.max_entries),
        ));
        cache.max_entries = defaults.max_entries;
    }
    if cache.flush_interval_seconds == 0 {
        issues.push(ConfigIssue::new(
            "cache.flush_interval_seconds",
            format!("must be positive, using {}", defaults.flush_interval_seconds),
        ));
        cache.flush_interval_seconds = defaults.flush_interval_seconds;
    }
    if cache.warmup.max_entries_per_repo == 0 {
        let default = WarmupConfig::default().max_entries_per_repo;
        issues.push(ConfigIssue::new(
            "cache.warmup.max_entries_per_repo",
            format!("must be positive, using {default}"),
        ));
        cache.warmup.max_entries_per_repo = default;
    }
}

fn validate_seed(seed: &mut SeedConfig, issues: &mut Vec<ConfigIssue>) {
    let defaults = SeedConfig::default();
    if seed.owner.trim().is_empty() {
        issues.push(ConfigIssue::new(
            "seed.owner",
            format!("empty owner, using {:?}", defaults.owner),
        ));
        seed.owner = defaults.owner;
    }
    if seed.server_name.trim().is_empty() {
        issues.push(ConfigIssue::new(
            "seed.server_name",
            format!("empty server name, using {:?}", defaults.server_name),
        ));
        seed.server_name = defaults.server_name;
    }
}

fn validate_pool(pool: &mut PoolConfig, issues: &mut Vec<ConfigIssue>) {
    if pool.max_size == 0 {
        let default = PoolConfig::default().max_size;
        issues.push(ConfigIssue::new(
            "relational.pool.max_size",
            format!("must be at least 1, using {default}"),
        ));
        pool.max_size = default;
    }
    if pool.min_idle > pool.max_size {
        issues.push(ConfigIssue::new(
            "relational.pool.min_idle",
            format!("{} exceeds max_size, using {}", pool.min_idle, pool.max_size),
        ));
        pool.min_idle = pool.max_size;
    }
}
