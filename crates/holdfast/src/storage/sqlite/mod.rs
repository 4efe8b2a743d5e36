//! SQLite relational backend.
//!
//! All repositories share one pooled database and one `records` table; the
//! schema is brought up to date by the [`MigrationRunner`] before the backend
//! reports ready.

mod error;
mod migration;
mod repository;
mod schema;

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use holdfast_core::config::RelationalConfig;
use holdfast_core::record::Record;
use holdfast_core::storage::{
    BackendKind, PoolMetrics, PoolStats, Result, StorageBackend,
};

use crate::retry::RetryExecutor;

pub use error::{map_sqlx_error, InitError, MigrationError};
pub use migration::{builtin_migrations, Migration, MigrationReport, MigrationRunner, SqlMigration};
pub use repository::SqliteRepository;

/// SQLite backend over a connection pool.
pub struct SqliteBackend {
    pool: SqlitePool,
    retry: RetryExecutor,
    ready: AtomicBool,
    migrations: MigrationReport,
}

impl SqliteBackend {
    /// Connects and runs the built-in migrations.
    pub async fn connect(config: &RelationalConfig, retry: RetryExecutor) -> std::result::Result<Self, InitError> {
        Self::connect_with(config, retry, MigrationRunner::default()).await
    }

    /// Connects and runs the given migrations.
    ///
    /// A migration failure leaves the backend unusable and is returned as an
    /// error.
    pub async fn connect_with(
        config: &RelationalConfig,
        retry: RetryExecutor,
        runner: MigrationRunner,
    ) -> std::result::Result<Self, InitError> {
        let pool = open_pool(config).await?;
        let migrations = runner.run(&pool).await?;
        tracing::info!(
            url = %redact(&config.url),
            schema_version = migrations.to_version,
            applied = migrations.applied.len(),
            "Relational backend ready"
        );
        Ok(Self {
            pool,
            retry,
            ready: AtomicBool::new(true),
            migrations,
        })
    }

    /// Builds a repository whose rows use `name` as their namespace.
    pub fn repository<T: Record>(&self, name: &str) -> SqliteRepository<T> {
        SqliteRepository::new(name, self.pool.clone(), self.retry.clone())
    }

    /// What the startup migration run did.
    pub fn migrations(&self) -> &MigrationReport {
        &self.migrations
    }
}

async fn open_pool(config: &RelationalConfig) -> std::result::Result<SqlitePool, InitError> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| InitError::Connect(e.to_string()))?
        .create_if_missing(true);

    // Every connection to `:memory:` is a separate database.
    let in_memory = config.url.contains(":memory:");
    let pool = &config.pool;
    let (max, min) = if in_memory {
        (1, 1)
    } else {
        (pool.max_size.max(1), pool.min_idle.min(pool.max_size.max(1)))
    };

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(max)
        .min_connections(min)
        .acquire_timeout(Duration::from_millis(pool.connection_timeout_ms));
    pool_options = if in_memory {
        pool_options.idle_timeout(None).max_lifetime(None)
    } else {
        pool_options.idle_timeout(Some(Duration::from_millis(pool.idle_timeout_ms)))
    };

    pool_options
        .connect_with(options)
        .await
        .map_err(|e| InitError::Connect(e.to_string()))
}

/// Strips credentials from a connection URL for logging.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => format!("{}://***{}", &url[..scheme], &url[at..]),
        _ => url.to_string(),
    }
}

impl PoolMetrics for SqliteBackend {
    fn pool_stats(&self) -> PoolStats {
        let total = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        PoolStats {
            active: total.saturating_sub(idle),
            idle,
            total,
        }
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.pool.is_closed()
    }

    fn pool_metrics(&self) -> Option<&dyn PoolMetrics> {
        Some(self)
    }

    async fn probe(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>(schema::PING)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn close(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_core::record::MetaRecord;
    use holdfast_core::retry::RetryPolicy;
    use holdfast_core::storage::Repository;

    async fn backend(dir: &tempfile::TempDir) -> SqliteBackend {
        let config = RelationalConfig {
            url: format!("sqlite://{}", dir.path().join("holdfast.db").display()),
            ..RelationalConfig::default()
        };
        SqliteBackend::connect(&config, RetryExecutor::new(RetryPolicy::disabled()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir).await;
        let repo = backend.repository::<MetaRecord>("meta");

        repo.save(&MetaRecord::new("motd", "hello")).await.unwrap();
        repo.save(&MetaRecord::new("motd", "goodbye")).await.unwrap();

        assert_eq!(
            repo.load("motd").await.unwrap(),
            Some(MetaRecord::new("motd", "goodbye"))
        );
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir).await;
        let meta = backend.repository::<MetaRecord>("meta");
        let other = backend.repository::<MetaRecord>("other");

        meta.save(&MetaRecord::new("a", "1")).await.unwrap();

        assert!(meta.exists("a").await.unwrap());
        assert!(!other.exists("a").await.unwrap());
        assert_eq!(other.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_and_load_all() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir).await;
        let repo = backend.repository::<MetaRecord>("meta");
        for key in ["a", "b", "c"] {
            repo.save(&MetaRecord::new(key, "x")).await.unwrap();
        }

        repo.delete("b").await.unwrap();

        let keys: Vec<_> = repo
            .load_all(None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(repo.load_all(Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_quoted_ids_are_bound_not_interpolated() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir).await;
        let repo = backend.repository::<MetaRecord>("meta");
        let record = MetaRecord::new("x'); DROP TABLE records; --", "v");

        repo.save(&record).await.unwrap();

        assert_eq!(repo.load(&record.key).await.unwrap(), Some(record));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir).await;
        let repo = backend.repository::<MetaRecord>("meta");
        repo.save(&MetaRecord::new("good", "1")).await.unwrap();
        sqlx::query("INSERT INTO records (namespace, key, value) VALUES ('meta', 'bad', '{oops')")
            .execute(&backend.pool)
            .await
            .unwrap();

        assert_eq!(repo.load("bad").await.unwrap(), None);
        assert_eq!(repo.load_all(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_probe_pool_metrics_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir).await;

        backend.probe().await.unwrap();
        let stats = backend.pool_metrics().unwrap().pool_stats();
        assert!(stats.total >= 1);
        assert_eq!(stats.active + stats.idle, stats.total);
        assert_eq!(backend.migrations().to_version, 2);

        backend.close().await;
        assert!(!backend.is_ready());
        assert!(backend.probe().await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_database_keeps_schema() {
        let config = RelationalConfig {
            url: "sqlite::memory:".to_string(),
            ..RelationalConfig::default()
        };
        let backend = SqliteBackend::connect(&config, RetryExecutor::new(RetryPolicy::disabled()))
            .await
            .unwrap();
        let repo = backend.repository::<MetaRecord>("meta");

        repo.save(&MetaRecord::new("a", "1")).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[test]
    fn test_redact_hides_credentials() {
        assert_eq!(redact("postgres://user:pw@db:5432/x"), "postgres://***@db:5432/x");
        assert_eq!(redact("sqlite://data/holdfast.db"), "sqlite://data/holdfast.db");
    }
}
