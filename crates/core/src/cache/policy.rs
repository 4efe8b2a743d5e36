//! Cache settings and per-repository policy resolution.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::keys::policy_name;

/// Per-repository caching behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// When false the repository bypasses the cache and the queue.
    pub enabled: bool,
    /// Makes `save` wait until the write is durable or the timeout elapses.
    pub flush_on_save: bool,
    pub flush_timeout_ms: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            flush_on_save: false,
            flush_timeout_ms: 2000,
        }
    }
}

impl CachePolicy {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

/// One-time delayed cache warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    pub enabled: bool,
    pub max_entries_per_repo: usize,
    pub delay_seconds: u64,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries_per_repo: 500,
            delay_seconds: 5,
        }
    }
}

/// Cache settings shared by every cached repository of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub max_entries: usize,
    pub flush_interval_seconds: u64,
    pub warmup: WarmupConfig,
    /// Flush a repository on demand when its owner goes away.
    pub flush_on_player_quit: bool,
    pub default_policy: CachePolicy,
    /// Policies keyed by repository name.
    pub overrides: HashMap<String, CachePolicy>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 900,
            max_entries: 2100,
            flush_interval_seconds: 10,
            warmup: WarmupConfig::default(),
            flush_on_player_quit: true,
            default_policy: CachePolicy::default(),
            overrides: HashMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }

    /// Resolves the policy for a repository: override, then default.
    ///
    /// A globally disabled cache disables every repository.
    pub fn policy_for(&self, repository: &str) -> CachePolicy {
        let name = policy_name(repository);
        let policy = self
            .overrides
            .iter()
            .find(|(key, _)| policy_name(key) == name)
            .map(|(_, policy)| *policy)
            .unwrap_or(self.default_policy);
        if self.enabled {
            policy
        } else {
            CachePolicy {
                enabled: false,
                ..policy
            }
        }
    }
}
