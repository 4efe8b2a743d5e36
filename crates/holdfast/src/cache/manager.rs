//! Owner of every cached repository in a session.
//!
//! Runs the periodic flush and the one-time warm-up as Tokio tasks and
//! aggregates metrics per repository and globally.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use holdfast_core::cache::{policy_name, CacheConfig};
use holdfast_core::record::Record;
use holdfast_core::storage::Repository;

use crate::storage::cached::{CachedRepository, FlushReport};

use super::metrics::{MetricsSnapshot, GLOBAL_METRICS};

/// Type-erased view of a cached repository for the manager.
#[async_trait]
pub trait ManagedRepository: Send + Sync {
    fn repository_name(&self) -> &str;

    async fn flush(&self) -> FlushReport;

    async fn warm_up(&self, limit: usize) -> usize;

    fn metrics(&self) -> MetricsSnapshot;
}

#[async_trait]
impl<T: Record> ManagedRepository for CachedRepository<T> {
    fn repository_name(&self) -> &str {
        Repository::name(self)
    }

    async fn flush(&self) -> FlushReport {
        CachedRepository::flush(self).await
    }

    async fn warm_up(&self, limit: usize) -> usize {
        CachedRepository::warm_up(self, limit).await
    }

    fn metrics(&self) -> MetricsSnapshot {
        CachedRepository::metrics(self)
    }
}

fn merge_reports(total: FlushReport, report: FlushReport) -> FlushReport {
    FlushReport {
        queued: total.queued + report.queued,
        remaining_dirty: total.remaining_dirty + report.remaining_dirty,
        evicted_expired: total.evicted_expired + report.evicted_expired,
        evicted_overflow: total.evicted_overflow + report.evicted_overflow,
    }
}

pub struct CacheManager {
    config: CacheConfig,
    repositories: RwLock<Vec<Arc<dyn ManagedRepository>>>,
    warmed_up: AtomicBool,
    timers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            repositories: RwLock::new(Vec::new()),
            warmed_up: AtomicBool::new(false),
            timers: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn timers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn repositories(&self) -> Vec<Arc<dyn ManagedRepository>> {
        self.repositories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Adds a repository, replacing one registered under the same name.
    pub fn register(&self, repository: Arc<dyn ManagedRepository>) {
        let name = policy_name(repository.repository_name());
        let mut repositories = self
            .repositories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        repositories.retain(|existing| policy_name(existing.repository_name()) != name);
        repositories.push(repository);
        tracing::debug!(repository = %name, "Registered cached repository");
    }

    pub fn repository_names(&self) -> Vec<String> {
        self.repositories()
            .iter()
            .map(|repository| repository.repository_name().to_string())
            .collect()
    }

    /// Spawns the periodic flush and, when enabled, the delayed warm-up.
    pub fn start(self: &Arc<Self>) {
        let mut timers = self.timers();
        if !timers.is_empty() {
            return;
        }

        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.flush_interval();
        timers.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        manager.flush_all().await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Periodic cache flush stopped");
                        break;
                    }
                }
            }
        }));

        let warmup = self.config.warmup;
        if warmup.enabled && !self.warmed_up.load(Ordering::SeqCst) {
            let manager = Arc::clone(self);
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let delay = std::time::Duration::from_secs(warmup.delay_seconds);
            timers.push(tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        manager.warm_up().await;
                    }
                    _ = shutdown_rx.recv() => {}
                }
            }));
        }

        tracing::debug!(
            flush_interval_seconds = self.config.flush_interval_seconds,
            warmup = warmup.enabled,
            "Cache manager started"
        );
    }

    /// Flushes every registered repository.
    pub async fn flush_all(&self) -> FlushReport {
        let mut total = FlushReport::default();
        for repository in self.repositories() {
            total = merge_reports(total, repository.flush().await);
        }
        total
    }

    /// Flushes one repository on demand, e.g. when its owner disconnects.
    ///
    /// Returns `None` when `flush_on_player_quit` is off or the name is not
    /// registered.
    pub async fn flush_repository(&self, name: &str) -> Option<FlushReport> {
        if !self.config.flush_on_player_quit {
            return None;
        }
        let name = policy_name(name);
        let repository = self
            .repositories()
            .into_iter()
            .find(|repository| policy_name(repository.repository_name()) == name)?;
        Some(repository.flush().await)
    }

    /// Runs the warm-up once; later calls return 0.
    pub async fn warm_up(&self) -> usize {
        if self.warmed_up.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let limit = self.config.warmup.max_entries_per_repo;
        let mut loaded = 0;
        for repository in self.repositories() {
            loaded += repository.warm_up(limit).await;
        }
        tracing::info!(loaded, "Cache warm-up finished");
        loaded
    }

    /// Per-repository metrics plus the aggregate under `"all"`.
    pub fn metrics(&self) -> BTreeMap<String, MetricsSnapshot> {
        let mut metrics = BTreeMap::new();
        let mut global = MetricsSnapshot::default();
        for repository in self.repositories() {
            let snapshot = repository.metrics();
            global = global.merge(snapshot);
            metrics.insert(repository.repository_name().to_string(), snapshot);
        }
        metrics.insert(GLOBAL_METRICS.to_string(), global);
        metrics
    }

    /// Stops the timers and runs a final flush.
    pub async fn shutdown(&self) -> FlushReport {
        let _ = self.shutdown_tx.send(());
        let timers: Vec<JoinHandle<()>> = self.timers().drain(..).collect();
        for timer in timers {
            if let Err(err) = timer.await {
                tracing::warn!(error = %err, "Cache timer ended abnormally");
            }
        }
        let report = self.flush_all().await;
        tracing::debug!(
            queued = report.queued,
            remaining_dirty = report.remaining_dirty,
            "Cache manager stopped"
        );
        report
    }
}
