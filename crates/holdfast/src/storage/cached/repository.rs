//! Write-behind repository decorator.
//!
//! Reads prefer the cache. Writes land in the cache as dirty entries right
//! away and reach the backend through the shared [`WriteQueue`], keyed by
//! `<repository>:<id>` so repeated saves of one record coalesce.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use holdfast_core::cache::{
    delete_description, record_key, save_description, CacheConfig, CachePolicy,
};
use holdfast_core::record::{normalize_id, Record};
use holdfast_core::storage::{Repository, RepositoryError, Result};

use crate::cache::{CacheMetrics, MetricsSnapshot, RecordCache};
use crate::queue::{WriteQueue, WriteTask};

use super::tombstones::Tombstones;

/// Counts from one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Dirty entries and pending deletes handed to the queue.
    pub queued: usize,
    /// Entries still dirty when the flush returned.
    pub remaining_dirty: usize,
    pub evicted_expired: usize,
    pub evicted_overflow: usize,
}

/// Cache-fronted repository with asynchronous backend writes.
pub struct CachedRepository<T: Record> {
    name: String,
    backend: Arc<dyn Repository<T>>,
    cache: Arc<RecordCache<T>>,
    queue: Arc<WriteQueue>,
    policy: CachePolicy,
    metrics: Arc<CacheMetrics>,
    tombstones: Arc<Tombstones>,
    generation: AtomicU64,
}

impl<T: Record> CachedRepository<T> {
    pub fn new(backend: Arc<dyn Repository<T>>, config: &CacheConfig, queue: Arc<WriteQueue>) -> Self {
        let name = backend.name().to_string();
        let policy = config.policy_for(&name);
        Self {
            cache: Arc::new(RecordCache::new(config.ttl(), config.max_entries)),
            name,
            backend,
            queue,
            policy,
            metrics: Arc::new(CacheMetrics::default()),
            tombstones: Arc::new(Tombstones::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// The backend repository behind the cache.
    pub fn backend(&self) -> &Arc<dyn Repository<T>> {
        &self.backend
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn dirty_entries(&self) -> usize {
        self.cache.count_dirty()
    }

    fn save_task(&self, id: &str, record: T, version: u64) -> WriteTask {
        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.cache);
        let owned_id = id.to_string();
        WriteTask::new(save_description(&self.name, id), move || async move {
            backend.save(&record).await?;
            cache.mark_clean_if(&owned_id, version);
            Ok(())
        })
        .keyed(&record_key(&self.name, id))
    }

    fn delete_task(&self, id: &str, generation: u64) -> WriteTask {
        let backend = Arc::clone(&self.backend);
        let tombstones = Arc::clone(&self.tombstones);
        let owned_id = id.to_string();
        WriteTask::new(delete_description(&self.name, id), move || async move {
            backend.delete(&owned_id).await?;
            tombstones.clear_if(&owned_id, generation);
            Ok(())
        })
        .keyed(&record_key(&self.name, id))
    }

    /// Hands a write to the queue, waiting for it under flush-on-save.
    async fn submit(&self, task: WriteTask, id: &str) -> Result<()> {
        self.metrics.record_write_task();
        let description = task.description().to_string();

        let result = if self.policy.flush_on_save {
            if self
                .queue
                .enqueue_and_wait(task, self.policy.flush_timeout())
                .await
            {
                Ok(())
            } else {
                Err(RepositoryError::NotDurable {
                    repository: self.name.clone(),
                    id: id.to_string(),
                })
            }
        } else {
            if !self.queue.enqueue(task).await {
                tracing::warn!(
                    task = %description,
                    "Write was not queued, retrying on next flush"
                );
            }
            Ok(())
        };

        self.metrics.record_queue_size(self.queue.depth());
        result
    }

    /// Evicts idle and overflow entries, then re-queues every dirty entry and
    /// pending delete.
    pub async fn flush(&self) -> FlushReport {
        if !self.policy.enabled {
            return FlushReport::default();
        }

        let evicted_expired = self.cache.evict_expired();
        let evicted_overflow = self.cache.evict_overflow();
        self.metrics
            .record_evictions(evicted_expired, evicted_overflow);

        if self.cache.len() > self.cache.max_entries() {
            tracing::warn!(
                repository = %self.name,
                entries = self.cache.len(),
                max_entries = self.cache.max_entries(),
                dirty = self.cache.count_dirty(),
                "Cache above capacity with unflushed writes"
            );
        }

        let mut queued = 0;
        for dirty in self.cache.snapshot_dirty() {
            let task = self.save_task(&dirty.id, dirty.value, dirty.version);
            self.metrics.record_write_task();
            if self.queue.enqueue(task).await {
                queued += 1;
            }
        }
        for (id, generation) in self.tombstones.snapshot() {
            let task = self.delete_task(&id, generation);
            self.metrics.record_write_task();
            if self.queue.enqueue(task).await {
                queued += 1;
            }
        }

        self.metrics.record_flush();
        self.metrics.record_queue_size(self.queue.depth());

        let report = FlushReport {
            queued,
            remaining_dirty: self.cache.count_dirty(),
            evicted_expired,
            evicted_overflow,
        };
        tracing::debug!(
            repository = %self.name,
            queued = report.queued,
            remaining_dirty = report.remaining_dirty,
            evicted_expired = report.evicted_expired,
            evicted_overflow = report.evicted_overflow,
            "Cache flushed"
        );
        report
    }

    /// Loads up to `limit` backend records into the cache as clean entries.
    pub async fn warm_up(&self, limit: usize) -> usize {
        if !self.policy.enabled || limit == 0 {
            return 0;
        }

        let records = match self.backend.load_all(Some(limit)).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(repository = %self.name, error = %err, "Cache warm-up failed");
                return 0;
            }
        };

        let mut loaded = 0;
        for record in records {
            let id = record.id().trim().to_string();
            if self.tombstones.contains(&id) {
                continue;
            }
            if self.cache.populate(&id, record) {
                loaded += 1;
            }
        }
        let overflow = self.cache.evict_overflow();
        self.metrics.record_evictions(0, overflow);

        tracing::debug!(repository = %self.name, loaded, "Cache warmed up");
        loaded
    }
}

#[async_trait]
impl<T: Record> Repository<T> for CachedRepository<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, id: &str) -> Result<Option<T>> {
        if !self.policy.enabled {
            return self.backend.load(id).await;
        }
        let id = normalize_id(id)?;

        if self.tombstones.contains(id) {
            self.metrics.record_hit();
            return Ok(None);
        }
        if let Some(record) = self.cache.get(id) {
            tracing::trace!(repository = %self.name, id = %id, "Cache hit");
            self.metrics.record_hit();
            return Ok(Some(record));
        }

        tracing::trace!(repository = %self.name, id = %id, "Cache miss");
        self.metrics.record_miss();
        let Some(record) = self.backend.load(id).await? else {
            return Ok(None);
        };

        // A delete or save may have landed while the backend was read.
        if self.tombstones.contains(id) {
            return Ok(None);
        }
        if !self.cache.populate(id, record.clone()) {
            if let Some(cached) = self.cache.get(id) {
                return Ok(Some(cached));
            }
        }
        Ok(Some(record))
    }

    async fn save(&self, record: &T) -> Result<()> {
        if !self.policy.enabled {
            return self.backend.save(record).await;
        }
        let id = normalize_id(record.id())?.to_string();

        self.tombstones.clear(&id);
        let version = self.cache.put(&id, record.clone(), true);
        let task = self.save_task(&id, record.clone(), version);
        self.submit(task, &id).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if !self.policy.enabled {
            return self.backend.delete(id).await;
        }
        let id = normalize_id(id)?.to_string();

        self.cache.remove(&id);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.tombstones.mark(&id, generation);
        let task = self.delete_task(&id, generation);
        self.submit(task, &id).await
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        if !self.policy.enabled {
            return self.backend.exists(id).await;
        }
        let id = normalize_id(id)?;

        if self.tombstones.contains(id) {
            return Ok(false);
        }
        if self.cache.contains(id) {
            return Ok(true);
        }
        self.backend.exists(id).await
    }

    async fn load_all(&self, limit: Option<usize>) -> Result<Vec<T>> {
        if !self.policy.enabled {
            return self.backend.load_all(limit).await;
        }

        let expired = self.cache.evict_expired();
        self.metrics.record_evictions(expired, 0);

        let mut cached: HashMap<String, T> = self
            .cache
            .snapshot()
            .into_iter()
            .map(|record| (record.id().trim().to_string(), record))
            .collect();

        let limit = limit.unwrap_or(usize::MAX);
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        // Tombstoned rows are dropped below, so read past them.
        let fetch = limit.saturating_add(self.tombstones.pending());
        for record in self.backend.load_all(Some(fetch)).await? {
            if records.len() >= limit {
                break;
            }
            let id = record.id().trim().to_string();
            if self.tombstones.contains(&id) || !seen.insert(id.clone()) {
                continue;
            }
            records.push(cached.remove(&id).unwrap_or(record));
        }

        // Cached records the backend has not seen yet, e.g. unflushed saves.
        for (id, record) in cached {
            if records.len() >= limit {
                break;
            }
            if self.tombstones.contains(&id) || !seen.insert(id) {
                continue;
            }
            records.push(record);
        }

        records.truncate(limit);
        Ok(records)
    }

    async fn count(&self) -> Result<u64> {
        if !self.policy.enabled {
            return self.backend.count().await;
        }
        Ok(self.load_all(None).await?.len() as u64)
    }
}
