//! In-memory record cache with dirty tracking.
//!
//! Entries expire after `ttl` without access and overflow is trimmed in LRU
//! order, but dirty entries are never evicted by either: `max_entries` is a
//! soft bound that unflushed writes may exceed.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    dirty: bool,
    last_access: Instant,
    /// Bumped on every put; lets a write confirmation detect newer saves.
    version: u64,
}

impl<T> CacheEntry<T> {
    fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_access) >= ttl
    }
}

struct Inner<T> {
    entries: LruCache<String, CacheEntry<T>>,
    next_version: u64,
}

/// A dirty entry captured for a flush.
#[derive(Debug, Clone)]
pub struct DirtyRecord<T> {
    pub id: String,
    pub value: T,
    pub version: u64,
}

/// Thread-safe id → record cache.
pub struct RecordCache<T> {
    inner: Mutex<Inner<T>>,
    ttl: Duration,
    max_entries: usize,
}

impl<T: Clone> RecordCache<T> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                next_version: 0,
            }),
            ttl,
            max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Returns a live entry and refreshes its last access.
    ///
    /// An idle clean entry is dropped and reported as missing; an idle dirty
    /// entry is still returned.
    pub fn get(&self, id: &str) -> Option<T> {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.entries.get_mut(id) {
            None => return None,
            Some(entry) if entry.dirty || !entry.is_idle(now, self.ttl) => {
                entry.last_access = now;
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }
        inner.entries.pop(id);
        None
    }

    /// Same liveness rules as [`RecordCache::get`] without cloning.
    pub fn contains(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.entries.get_mut(id) {
            None => return false,
            Some(entry) if entry.dirty || !entry.is_idle(now, self.ttl) => {
                entry.last_access = now;
                return true;
            }
            Some(_) => {}
        }
        inner.entries.pop(id);
        false
    }

    /// Inserts or replaces a value and returns the entry's new version.
    ///
    /// The dirty flag is OR'd with the existing one, so a clean overwrite of
    /// a dirty entry stays dirty.
    pub fn put(&self, id: &str, value: T, dirty: bool) -> u64 {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.next_version += 1;
        let version = inner.next_version;
        if let Some(entry) = inner.entries.get_mut(id) {
            entry.value = value;
            entry.dirty |= dirty;
            entry.last_access = now;
            entry.version = version;
        } else {
            inner.entries.put(
                id.to_string(),
                CacheEntry {
                    value,
                    dirty,
                    last_access: now,
                    version,
                },
            );
        }
        version
    }

    /// Inserts a clean value only if the id is not cached yet.
    ///
    /// Used for values read from the backend, which must never replace a
    /// newer cached write.
    pub fn populate(&self, id: &str, value: T) -> bool {
        let mut inner = self.lock();
        if inner.entries.contains(id) {
            return false;
        }
        inner.next_version += 1;
        let version = inner.next_version;
        inner.entries.put(
            id.to_string(),
            CacheEntry {
                value,
                dirty: false,
                last_access: Instant::now(),
                version,
            },
        );
        true
    }

    pub fn remove(&self, id: &str) -> Option<T> {
        self.lock().entries.pop(id).map(|entry| entry.value)
    }

    /// Marks an entry clean regardless of later puts.
    ///
    /// For callers that persisted the current value themselves. Queued writes
    /// use [`RecordCache::mark_clean_if`] so a newer save stays dirty.
    pub fn mark_clean(&self, id: &str) -> bool {
        match self.lock().entries.peek_mut(id) {
            Some(entry) => {
                entry.dirty = false;
                true
            }
            None => false,
        }
    }

    /// Marks an entry clean only if no put happened since `version`.
    pub fn mark_clean_if(&self, id: &str, version: u64) -> bool {
        match self.lock().entries.peek_mut(id) {
            Some(entry) if entry.version == version => {
                entry.dirty = false;
                true
            }
            _ => false,
        }
    }

    pub fn is_dirty(&self, id: &str) -> bool {
        self.lock().entries.peek(id).is_some_and(|entry| entry.dirty)
    }

    /// Removes clean entries idle for at least the TTL.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.dirty && entry.is_idle(now, self.ttl))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            inner.entries.pop(id);
        }
        expired.len()
    }

    /// Trims clean entries in LRU order until the size fits `max_entries`.
    pub fn evict_overflow(&self) -> usize {
        let mut inner = self.lock();
        let excess = inner.entries.len().saturating_sub(self.max_entries);
        if excess == 0 {
            return 0;
        }
        let victims: Vec<String> = inner
            .entries
            .iter()
            .rev()
            .filter(|(_, entry)| !entry.dirty)
            .take(excess)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &victims {
            inner.entries.pop(id);
        }
        victims.len()
    }

    pub fn snapshot_dirty(&self) -> Vec<DirtyRecord<T>> {
        self.lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(id, entry)| DirtyRecord {
                id: id.clone(),
                value: entry.value.clone(),
                version: entry.version,
            })
            .collect()
    }

    /// All cached values, most recently used first.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock()
            .entries
            .iter()
            .map(|(_, entry)| entry.value.clone())
            .collect()
    }

    pub fn count_dirty(&self) -> usize {
        self.lock().entries.iter().filter(|(_, e)| e.dirty).count()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
