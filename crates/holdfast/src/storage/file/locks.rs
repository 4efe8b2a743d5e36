//! Per-path write locks.
//!
//! Writers to the same file are serialized twice: by an in-process stripe
//! (hash of the absolute path) and by an OS advisory lock on a `.lock`
//! sibling, which also covers other processes.

use std::collections::hash_map::DefaultHasher;
use std::fs::OpenOptions;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs2::FileExt;

use super::atomic::sibling;

/// Default number of in-process stripes.
pub const DEFAULT_STRIPES: usize = 64;

/// Fixed set of mutexes selected by path hash.
#[derive(Debug)]
pub struct LockStripes {
    stripes: Vec<Mutex<()>>,
}

impl Default for LockStripes {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl LockStripes {
    pub fn new(count: usize) -> Self {
        Self {
            stripes: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Index of the stripe guarding `path`.
    pub fn stripe_index(&self, path: &Path) -> usize {
        let mut hasher = DefaultHasher::new();
        absolute(path).hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    fn lock(&self, path: &Path) -> MutexGuard<'_, ()> {
        let stripe = &self.stripes[self.stripe_index(path)];
        stripe.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` while holding both the stripe and the OS lock for `path`.
    ///
    /// The `.lock` file is removed once `f` returns.
    pub fn with_path_lock<R>(&self, path: &Path, f: impl FnOnce() -> io::Result<R>) -> io::Result<R> {
        let _guard = self.lock(path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = sibling(path, "lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        lock_file.lock_exclusive()?;

        let result = f();

        if let Err(err) = FileExt::unlock(&lock_file) {
            tracing::debug!(path = %lock_path.display(), error = %err, "Failed to release file lock");
        }
        drop(lock_file);
        if let Err(err) = std::fs::remove_file(&lock_path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(path = %lock_path.display(), error = %err, "Failed to remove lock file");
            }
        }

        result
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
