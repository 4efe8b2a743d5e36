//! Blocking filesystem operations for one repository directory.
//!
//! Everything here runs on the blocking pool; the async repository only
//! dispatches and retries.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use holdfast_core::record::{decode_record, Record};
use holdfast_core::shard::{file_name, id_from_file_name, shard_segments, ShardConfig};

use super::atomic::{read_if_exists, remove_if_exists, write_atomic};
use super::locks::LockStripes;

/// Where one repository's files live and how they are sharded.
#[derive(Debug)]
pub(crate) struct RepositoryLayout {
    pub name: String,
    pub dir: PathBuf,
    pub shard: ShardConfig,
    pub stripes: Arc<LockStripes>,
}

/// What a point read found.
pub(crate) enum ReadResult<T> {
    Missing,
    Found(T),
    /// File exists but could not be decoded.
    Corrupt,
}

impl RepositoryLayout {
    /// Flat path: `<dir>/<sanitized-id>.json`.
    pub fn legacy_path(&self, id: &str) -> PathBuf {
        self.dir.join(file_name(id))
    }

    /// Sharded path, or the legacy path when sharding is disabled.
    pub fn primary_path(&self, id: &str) -> PathBuf {
        let mut path = self.dir.clone();
        for segment in shard_segments(id, &self.shard) {
            path.push(segment);
        }
        path.push(file_name(id));
        path
    }

    fn legacy_fallback(&self, id: &str) -> Option<PathBuf> {
        self.shard.enabled.then(|| self.legacy_path(id))
    }

    pub fn read<T: Record>(&self, id: &str) -> io::Result<ReadResult<T>> {
        let primary = self.primary_path(id);
        if let Some(bytes) = read_if_exists(&primary)? {
            return Ok(self.decode(&primary, &bytes));
        }

        let Some(legacy) = self.legacy_fallback(id) else {
            return Ok(ReadResult::Missing);
        };
        let Some(bytes) = read_if_exists(&legacy)? else {
            return Ok(ReadResult::Missing);
        };
        let result = self.decode(&legacy, &bytes);
        if matches!(result, ReadResult::Found(_))
            && self.shard.migrate_legacy_on_read
            && !self.migrate_legacy(&legacy, &primary, &bytes)
        {
            // A write or delete landed after the legacy read; it wins.
            return match read_if_exists(&primary)? {
                Some(bytes) => Ok(self.decode(&primary, &bytes)),
                None => Ok(ReadResult::Missing),
            };
        }
        Ok(result)
    }

    fn decode<T: Record>(&self, path: &Path, bytes: &[u8]) -> ReadResult<T> {
        match decode_record::<T>(bytes) {
            Ok(record) => ReadResult::Found(record),
            Err(err) => {
                tracing::warn!(
                    repository = %self.name,
                    path = %path.display(),
                    error = %err,
                    "Unreadable record file"
                );
                ReadResult::Corrupt
            }
        }
    }

    /// Moves a legacy file to its sharded location. Failures are logged only.
    ///
    /// The copy only happens while the sharded path is still empty and the
    /// legacy file still exists. Returns `false` when a concurrent write or
    /// delete superseded the legacy bytes, in which case they are discarded.
    fn migrate_legacy(&self, legacy: &Path, primary: &Path, bytes: &[u8]) -> bool {
        let moved = self
            .stripes
            .with_path_lock(primary, || {
                if primary.is_file() || !legacy.is_file() {
                    return Ok(false);
                }
                write_atomic(primary, bytes).map(|()| true)
            })
            .and_then(|copied| {
                self.stripes
                    .with_path_lock(legacy, || remove_if_exists(legacy))
                    .map(|_| copied)
            });
        match moved {
            Ok(true) => {
                tracing::debug!(
                    repository = %self.name,
                    from = %legacy.display(),
                    to = %primary.display(),
                    "Migrated legacy record"
                );
                true
            }
            Ok(false) => {
                tracing::debug!(
                    repository = %self.name,
                    path = %legacy.display(),
                    "Legacy record superseded, dropped"
                );
                false
            }
            Err(err) => {
                tracing::warn!(
                    repository = %self.name,
                    path = %legacy.display(),
                    error = %err,
                    "Legacy record migration failed"
                );
                true
            }
        }
    }

    pub fn write(&self, id: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.primary_path(id);
        self.stripes.with_path_lock(&path, || write_atomic(&path, bytes))
    }

    /// Removes the record from both layouts.
    ///
    /// The legacy file goes first so a concurrent migration cannot copy it
    /// back into the sharded path.
    pub fn remove(&self, id: &str) -> io::Result<()> {
        if let Some(legacy) = self.legacy_fallback(id) {
            self.stripes
                .with_path_lock(&legacy, || remove_if_exists(&legacy))?;
        }
        let path = self.primary_path(id);
        self.stripes.with_path_lock(&path, || remove_if_exists(&path))?;
        Ok(())
    }

    pub fn exists(&self, id: &str) -> bool {
        self.primary_path(id).is_file()
            || self
                .legacy_fallback(id)
                .is_some_and(|legacy| legacy.is_file())
    }

    /// Record files in scan order: sharded tree first, then root-level files.
    pub fn record_files(&self) -> io::Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        if self.shard.enabled {
            self.walk_sharded(&self.dir, 0, &mut files)?;
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && is_record_file(&path) {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn walk_sharded(&self, dir: &Path, level: usize, files: &mut Vec<PathBuf>) -> io::Result<()> {
        if level > self.shard.depth {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.walk_sharded(&path, level + 1, files)?;
            } else if level > 0 && is_record_file(&path) {
                files.push(path);
            }
        }
        Ok(())
    }

    /// Decodes records from both layouts, deduplicated by record id.
    pub fn read_all<T: Record>(&self, limit: Option<usize>) -> io::Result<Vec<T>> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for path in self.record_files()? {
            if limit.is_some_and(|limit| records.len() >= limit) {
                break;
            }
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(
                        repository = %self.name,
                        path = %path.display(),
                        error = %err,
                        "Skipping unreadable record file"
                    );
                    continue;
                }
            };
            if let ReadResult::Found(record) = self.decode::<T>(&path, &bytes) {
                if seen.insert(record.id().to_string()) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Number of distinct record file names across both layouts.
    pub fn count_ids(&self) -> io::Result<u64> {
        let ids: HashSet<String> = self
            .record_files()?
            .iter()
            .filter_map(|path| path.file_name()?.to_str())
            .filter_map(id_from_file_name)
            .map(str::to_string)
            .collect();
        Ok(ids.len() as u64)
    }
}

fn is_record_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(id_from_file_name)
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_core::record::{encode_record, MetaRecord};
    use holdfast_core::shard::ShardStrategy;

    fn layout(dir: &Path, enabled: bool, migrate: bool) -> RepositoryLayout {
        RepositoryLayout {
            name: "meta".to_string(),
            dir: dir.join("meta"),
            shard: ShardConfig {
                enabled,
                strategy: ShardStrategy::Prefix,
                depth: 2,
                chars_per_level: 1,
                migrate_legacy_on_read: migrate,
            },
            stripes: Arc::new(LockStripes::default()),
        }
    }

    fn bytes(key: &str, value: &str) -> Vec<u8> {
        encode_record(&MetaRecord::new(key, value)).unwrap().into_bytes()
    }

    #[test]
    fn test_primary_path_uses_shard_segments() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path(), true, false);
        assert_eq!(
            layout.primary_path("motd"),
            dir.path().join("meta").join("m").join("o").join("motd.json")
        );
        assert_eq!(
            layout.legacy_path("motd"),
            dir.path().join("meta").join("motd.json")
        );
    }

    #[test]
    fn test_corrupt_file_reads_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path(), false, false);
        layout.write("bad", b"{oops").unwrap();

        let result = layout.read::<MetaRecord>("bad").unwrap();
        assert!(matches!(result, ReadResult::Corrupt));
    }

    #[test]
    fn test_scan_merges_layouts_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let flat = layout(dir.path(), false, false);
        flat.write("a", &bytes("a", "legacy")).unwrap();
        flat.write("b", &bytes("b", "legacy")).unwrap();

        let sharded = layout(dir.path(), true, false);
        sharded.write("a", &bytes("a", "sharded")).unwrap();
        sharded.write("c", &bytes("c", "sharded")).unwrap();

        let records: Vec<MetaRecord> = sharded.read_all(None).unwrap();
        let mut ids: Vec<_> = records.iter().map(|r| r.key.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
        let a = records.iter().find(|r| r.key == "a").unwrap();
        assert_eq!(a.value, "sharded");
        assert_eq!(sharded.count_ids().unwrap(), 3);
    }

    #[test]
    fn test_scan_ignores_transient_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path(), false, false);
        layout.write("a", &bytes("a", "1")).unwrap();
        fs::write(layout.dir.join("b.json.tmp"), b"partial").unwrap();
        fs::write(layout.dir.join("notes.txt"), b"hi").unwrap();

        assert_eq!(layout.count_ids().unwrap(), 1);
        assert_eq!(layout.read_all::<MetaRecord>(None).unwrap().len(), 1);
    }

    #[test]
    fn test_read_all_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path(), false, false);
        for id in ["a", "b", "c", "d"] {
            layout.write(id, &bytes(id, "x")).unwrap();
        }
        assert_eq!(layout.read_all::<MetaRecord>(Some(2)).unwrap().len(), 2);
    }

    #[test]
    fn test_legacy_read_migrates_to_sharded_path() {
        let dir = tempfile::tempdir().unwrap();
        let flat = layout(dir.path(), false, false);
        flat.write("abc", &bytes("abc", "old")).unwrap();
        let sharded = layout(dir.path(), true, true);

        let ReadResult::Found(record) = sharded.read::<MetaRecord>("abc").unwrap() else {
            panic!("legacy record not found");
        };

        assert_eq!(record.value, "old");
        assert!(sharded.primary_path("abc").is_file());
        assert!(!sharded.legacy_path("abc").exists());
    }

    #[test]
    fn test_legacy_migration_keeps_newer_sharded_write() {
        let dir = tempfile::tempdir().unwrap();
        let sharded = layout(dir.path(), true, true);
        let stale = bytes("abc", "old");
        fs::create_dir_all(&sharded.dir).unwrap();
        fs::write(sharded.legacy_path("abc"), &stale).unwrap();
        sharded.write("abc", &bytes("abc", "new")).unwrap();

        let copied = sharded.migrate_legacy(
            &sharded.legacy_path("abc"),
            &sharded.primary_path("abc"),
            &stale,
        );

        assert!(!copied);
        assert!(!sharded.legacy_path("abc").exists());
        let ReadResult::Found(record) = sharded.read::<MetaRecord>("abc").unwrap() else {
            panic!("sharded record lost");
        };
        assert_eq!(record.value, "new");
    }

    #[test]
    fn test_legacy_migration_skips_deleted_record() {
        let dir = tempfile::tempdir().unwrap();
        let sharded = layout(dir.path(), true, true);
        let stale = bytes("abc", "old");

        let copied = sharded.migrate_legacy(
            &sharded.legacy_path("abc"),
            &sharded.primary_path("abc"),
            &stale,
        );

        assert!(!copied);
        assert!(!sharded.primary_path("abc").exists());
    }

    #[test]
    fn test_concurrent_write_survives_legacy_read() {
        let dir = tempfile::tempdir().unwrap();
        let sharded = Arc::new(layout(dir.path(), true, true));

        for round in 0..100 {
            let id = format!("k{round}");
            fs::create_dir_all(&sharded.dir).unwrap();
            fs::write(sharded.legacy_path(&id), bytes(&id, "old")).unwrap();

            let reader = {
                let sharded = Arc::clone(&sharded);
                let id = id.clone();
                std::thread::spawn(move || {
                    sharded.read::<MetaRecord>(&id).unwrap();
                })
            };
            sharded.write(&id, &bytes(&id, "new")).unwrap();
            reader.join().unwrap();

            let ReadResult::Found(record) = sharded.read::<MetaRecord>(&id).unwrap() else {
                panic!("record {id} lost");
            };
            assert_eq!(record.value, "new", "round {round}");
        }
    }

    #[test]
    fn test_missing_directory_scans_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path(), true, false);
        assert!(layout.record_files().unwrap().is_empty());
        assert_eq!(layout.count_ids().unwrap(), 0);
    }
}
