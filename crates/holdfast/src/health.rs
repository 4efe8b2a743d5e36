//! Read-only diagnostic snapshot of a storage session.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

use holdfast_core::cache::CacheConfig;
use holdfast_core::config::{ConfigIssue, QueueFullPolicy};
use holdfast_core::retry::RetryPolicy;
use holdfast_core::shard::ShardConfig;
use holdfast_core::storage::{BackendKind, PoolStats};

use crate::cache::MetricsSnapshot;
use crate::queue::QueueState;
use crate::session::StorageSession;

/// Outcome of one round trip against the durable medium.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub state: QueueState,
    pub depth: usize,
    pub capacity: usize,
    pub pending_keys: usize,
    pub full_policy: QueueFullPolicy,
    pub full_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub backend: BackendKind,
    pub ready: bool,
    pub probe: ProbeResult,
    /// Shard settings, for the file backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardConfig>,
    /// Pool counts, for pooled backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStats>,
    pub retry: RetryPolicy,
    pub queue: QueueHealth,
    pub cache: CacheConfig,
    /// Per repository plus the `"all"` aggregate.
    pub metrics: BTreeMap<String, MetricsSnapshot>,
    pub config_issues: Vec<ConfigIssue>,
}

impl HealthReport {
    /// Collects the report. The only side effect is the backend probe, which
    /// touches nothing but its own temporary data.
    pub async fn collect(session: &StorageSession) -> Self {
        let backend = session.backend();

        let started = Instant::now();
        let probe = backend.probe().await;
        let probe = ProbeResult {
            ok: probe.is_ok(),
            latency_ms: started.elapsed().as_millis() as u64,
            error: probe.err().map(|e| e.to_string()),
        };
        if let Some(error) = &probe.error {
            tracing::warn!(backend = %backend.kind(), error = %error, "Backend probe failed");
        }

        let queue = session.queue();
        let config = queue.config();

        Self {
            backend: backend.kind(),
            ready: backend.is_ready(),
            probe,
            shard: session
                .active_backend()
                .file()
                .map(|file| file.shard().clone()),
            pool: backend.pool_metrics().map(|pool| pool.pool_stats()),
            retry: session.config().retry,
            queue: QueueHealth {
                state: queue.state(),
                depth: queue.depth(),
                capacity: queue.capacity(),
                pending_keys: queue.pending_keys(),
                full_policy: config.full_policy,
                full_timeout_ms: config.full_timeout_ms,
            },
            cache: session.config().cache.clone(),
            metrics: session.cache_manager().metrics(),
            config_issues: session.issues().to_vec(),
        }
    }
}
