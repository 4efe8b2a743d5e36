//! Cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Name of the aggregated metrics view.
pub const GLOBAL_METRICS: &str = "all";

/// Lock-free counters for one cached repository.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    flushes: AtomicU64,
    write_tasks: AtomicU64,
    evicted_expired: AtomicU64,
    evicted_overflow: AtomicU64,
    last_queue_size: AtomicU64,
    max_queue_size: AtomicU64,
}

impl CacheMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_task(&self) {
        self.write_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, expired: usize, overflow: usize) {
        self.evicted_expired
            .fetch_add(expired as u64, Ordering::Relaxed);
        self.evicted_overflow
            .fetch_add(overflow as u64, Ordering::Relaxed);
    }

    pub fn record_queue_size(&self, size: usize) {
        let size = size as u64;
        self.last_queue_size.store(size, Ordering::Relaxed);
        self.max_queue_size.fetch_max(size, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        MetricsSnapshot {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            flushes: self.flushes.load(Ordering::Relaxed),
            write_tasks: self.write_tasks.load(Ordering::Relaxed),
            evicted_expired: self.evicted_expired.load(Ordering::Relaxed),
            evicted_overflow: self.evicted_overflow.load(Ordering::Relaxed),
            last_queue_size: self.last_queue_size.load(Ordering::Relaxed),
            max_queue_size: self.max_queue_size.load(Ordering::Relaxed),
        }
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub flushes: u64,
    pub write_tasks: u64,
    pub evicted_expired: u64,
    pub evicted_overflow: u64,
    pub last_queue_size: u64,
    pub max_queue_size: u64,
}

impl MetricsSnapshot {
    /// Sums counters; queue sizes take the maximum since the queue is shared.
    pub fn merge(self, other: MetricsSnapshot) -> MetricsSnapshot {
        let hits = self.hits + other.hits;
        let misses = self.misses + other.misses;
        MetricsSnapshot {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            flushes: self.flushes + other.flushes,
            write_tasks: self.write_tasks + other.write_tasks,
            evicted_expired: self.evicted_expired + other.evicted_expired,
            evicted_overflow: self.evicted_overflow + other.evicted_overflow,
            last_queue_size: self.last_queue_size.max(other.last_queue_size),
            max_queue_size: self.max_queue_size.max(other.max_queue_size),
        }
    }
}
