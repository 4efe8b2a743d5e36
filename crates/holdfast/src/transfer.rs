//! Copying records between two repositories, e.g. file to relational.

use serde::Serialize;

use holdfast_core::record::Record;
use holdfast_core::storage::{Repository, Result};

/// Default cap on records read from the source.
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Count what would be copied without writing.
    pub dry_run: bool,
    pub max_records: usize,
    /// Leave records that already exist in the target untouched.
    pub skip_existing: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_records: DEFAULT_MAX_RECORDS,
            skip_existing: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    /// Records written, or that would be written in a dry run.
    pub migrated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Copies up to `options.max_records` records from `source` into `target`.
///
/// Only reading the source can fail the whole transfer; a record that fails
/// to copy is counted and logged.
pub async fn transfer<T: Record>(
    source: &dyn Repository<T>,
    target: &dyn Repository<T>,
    options: TransferOptions,
) -> Result<TransferReport> {
    let records = source.load_all(Some(options.max_records)).await?;
    let mut report = TransferReport::default();

    for record in &records {
        if options.skip_existing {
            match target.exists(record.id()).await {
                Ok(true) => {
                    report.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(id = %record.id(), error = %err, "Existence check failed");
                    report.failed += 1;
                    continue;
                }
            }
        }

        if options.dry_run {
            report.migrated += 1;
            continue;
        }

        match target.save(record).await {
            Ok(()) => report.migrated += 1,
            Err(err) => {
                tracing::warn!(
                    source = %source.name(),
                    target = %target.name(),
                    id = %record.id(),
                    error = %err,
                    "Failed to copy record"
                );
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        source = %source.name(),
        target = %target.name(),
        dry_run = options.dry_run,
        migrated = report.migrated,
        skipped = report.skipped,
        failed = report.failed,
        "Transfer finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_core::config::{FileConfig, RelationalConfig};
    use holdfast_core::record::MetaRecord;
    use holdfast_core::retry::RetryPolicy;
    use tempfile::TempDir;

    use crate::retry::RetryExecutor;
    use crate::storage::file::FileBackend;
    use crate::storage::sqlite::SqliteBackend;

    fn retry() -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::disabled())
    }

    async fn backends(dir: &TempDir) -> (FileBackend, SqliteBackend) {
        let file = FileBackend::open(
            &FileConfig {
                path: dir.path().join("data").to_string_lossy().to_string(),
                ..FileConfig::default()
            },
            retry(),
        )
        .await
        .unwrap();
        let sqlite = SqliteBackend::connect(
            &RelationalConfig {
                url: format!("sqlite://{}", dir.path().join("h.db").display()),
                ..RelationalConfig::default()
            },
            retry(),
        )
        .await
        .unwrap();
        (file, sqlite)
    }

    #[tokio::test]
    async fn test_file_to_relational() {
        let dir = TempDir::new().unwrap();
        let (file, sqlite) = backends(&dir).await;
        let source = file.repository::<MetaRecord>("meta");
        let target = sqlite.repository::<MetaRecord>("meta");
        for id in ["a", "b", "c"] {
            source.save(&MetaRecord::new(id, "1")).await.unwrap();
        }

        let report = transfer::<MetaRecord>(&source, &target, TransferOptions::default())
            .await
            .unwrap();

        assert_eq!(report.migrated, 3);
        assert_eq!(target.count().await.unwrap(), 3);
        assert_eq!(
            target.load("b").await.unwrap(),
            Some(MetaRecord::new("b", "1"))
        );
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let (file, sqlite) = backends(&dir).await;
        let source = file.repository::<MetaRecord>("meta");
        let target = sqlite.repository::<MetaRecord>("meta");
        source.save(&MetaRecord::new("a", "1")).await.unwrap();

        let options = TransferOptions {
            dry_run: true,
            ..TransferOptions::default()
        };
        let report = transfer::<MetaRecord>(&source, &target, options).await.unwrap();

        assert_eq!(report.migrated, 1);
        assert_eq!(target.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_skip_existing_and_max_records() {
        let dir = TempDir::new().unwrap();
        let (file, sqlite) = backends(&dir).await;
        let source = file.repository::<MetaRecord>("meta");
        let target = sqlite.repository::<MetaRecord>("meta");
        for id in ["a", "b", "c"] {
            source.save(&MetaRecord::new(id, "new")).await.unwrap();
        }
        target.save(&MetaRecord::new("a", "old")).await.unwrap();

        let options = TransferOptions {
            skip_existing: true,
            ..TransferOptions::default()
        };
        let report = transfer::<MetaRecord>(&source, &target, options).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.migrated, 2);
        assert_eq!(target.load("a").await.unwrap().unwrap().value, "old");

        let limited = TransferOptions {
            max_records: 1,
            dry_run: true,
            ..TransferOptions::default()
        };
        let report = transfer::<MetaRecord>(&target, &source, limited).await.unwrap();
        assert_eq!(report.migrated, 1);
    }
}
