use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Ids deleted in the cache whose backend delete has not completed yet.
///
/// Reads treat a tombstoned id as missing so a queued delete is visible
/// immediately, the same way a queued save is.
#[derive(Debug, Default)]
pub(crate) struct Tombstones {
    ids: Mutex<HashMap<String, u64>>,
}

impl Tombstones {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks an id deleted at `generation`.
    pub fn mark(&self, id: &str, generation: u64) {
        self.lock().insert(id.to_string(), generation);
    }

    /// Clears the tombstone unless a newer delete replaced it.
    pub fn clear_if(&self, id: &str, generation: u64) {
        let mut ids = self.lock();
        if ids.get(id) == Some(&generation) {
            ids.remove(id);
        }
    }

    /// Clears unconditionally, e.g. when the id is saved again.
    pub fn clear(&self, id: &str) {
        self.lock().remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of pending deletes.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Pending deletes as `(id, generation)` pairs.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.lock()
            .iter()
            .map(|(id, generation)| (id.clone(), *generation))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_generation_survives_stale_clear() {
        let tombstones = Tombstones::default();
        tombstones.mark("a", 1);
        tombstones.mark("a", 2);

        tombstones.clear_if("a", 1);
        assert!(tombstones.contains("a"));

        tombstones.clear_if("a", 2);
        assert!(!tombstones.contains("a"));
    }
}
