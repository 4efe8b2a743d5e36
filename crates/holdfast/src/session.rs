//! Storage session: one backend, one write queue, one cache manager.
//!
//! The session is the unit of configuration. [`SessionHandle::reconfigure`]
//! swaps in a new session and keeps the running queue when its settings did
//! not change.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, RwLock};

use holdfast_core::cache::policy_name;
use holdfast_core::config::{ConfigIssue, StorageConfig};
use holdfast_core::record::{MetaRecord, Record};
use holdfast_core::storage::{BackendKind, Repository, RepositoryError, StorageBackend};

use crate::cache::CacheManager;
use crate::maintenance::{self, META_REPOSITORY};
use crate::queue::WriteQueue;
use crate::retry::RetryExecutor;
use crate::storage::cached::CachedRepository;
use crate::storage::file::FileBackend;
use crate::storage::sqlite::{InitError, SqliteBackend};

const QUEUE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to open file backend: {0}")]
    File(#[from] RepositoryError),

    #[error("Failed to open relational backend: {0}")]
    Relational(#[from] InitError),
}

/// The backend a session runs on.
pub enum ActiveBackend {
    File(Arc<FileBackend>),
    Relational(Arc<SqliteBackend>),
}

impl ActiveBackend {
    /// Opens exactly the requested backend kind, without fallback.
    pub async fn open(
        kind: BackendKind,
        config: &StorageConfig,
        retry: RetryExecutor,
    ) -> Result<Self, SessionError> {
        match kind {
            BackendKind::File => {
                let backend = FileBackend::open(&config.file, retry).await?;
                Ok(Self::File(Arc::new(backend)))
            }
            BackendKind::Relational => {
                let backend = SqliteBackend::connect(&config.relational, retry).await?;
                Ok(Self::Relational(Arc::new(backend)))
            }
        }
    }

    pub fn as_storage(&self) -> &dyn StorageBackend {
        match self {
            Self::File(backend) => backend.as_ref(),
            Self::Relational(backend) => backend.as_ref(),
        }
    }

    /// Builds an uncached repository for `name`.
    pub fn repository<T: Record>(&self, name: &str) -> Arc<dyn Repository<T>> {
        match self {
            Self::File(backend) => Arc::new(backend.repository::<T>(name)),
            Self::Relational(backend) => Arc::new(backend.repository::<T>(name)),
        }
    }

    pub fn file(&self) -> Option<&FileBackend> {
        match self {
            Self::File(backend) => Some(backend.as_ref()),
            Self::Relational(_) => None,
        }
    }
}

pub struct StorageSession {
    config: StorageConfig,
    issues: Vec<ConfigIssue>,
    backend: ActiveBackend,
    queue: Arc<WriteQueue>,
    manager: Arc<CacheManager>,
    repositories: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    interrupt: watch::Sender<bool>,
    queue_handed_off: AtomicBool,
    closed: AtomicBool,
}

impl StorageSession {
    /// Validates `config`, opens the backend, and starts the queue and the
    /// cache manager.
    ///
    /// A relational backend that cannot connect or migrate is replaced by the
    /// file backend.
    pub async fn open(config: StorageConfig) -> Result<Self, SessionError> {
        Self::open_with_queue(config, None).await
    }

    async fn open_with_queue(
        config: StorageConfig,
        queue: Option<Arc<WriteQueue>>,
    ) -> Result<Self, SessionError> {
        let (config, issues) = config.validate();
        for issue in &issues {
            tracing::warn!(setting = %issue.path, issue = %issue.message, "Invalid storage setting replaced");
        }

        let (interrupt, interrupt_rx) = watch::channel(false);
        let retry = RetryExecutor::new(config.retry).with_interrupt(interrupt_rx);

        let backend = match config.backend {
            BackendKind::File => ActiveBackend::open(BackendKind::File, &config, retry).await?,
            BackendKind::Relational => {
                match ActiveBackend::open(BackendKind::Relational, &config, retry.clone()).await {
                    Ok(backend) => backend,
                    Err(err) => {
                        tracing::warn!(error = %err, "Relational backend unavailable, using file backend");
                        ActiveBackend::open(BackendKind::File, &config, retry).await?
                    }
                }
            }
        };

        let queue = match queue {
            Some(queue) if queue.config() == &config.queue && queue.is_started() => {
                tracing::debug!("Reusing running write queue");
                queue
            }
            _ => {
                let queue = Arc::new(WriteQueue::new(config.queue));
                queue.start();
                queue
            }
        };

        let manager = Arc::new(CacheManager::new(config.cache.clone()));
        manager.start();

        tracing::info!(
            backend = %backend.as_storage().kind(),
            cache = config.cache.enabled,
            issues = issues.len(),
            "Storage session opened"
        );

        let session = Self {
            config,
            issues,
            backend,
            queue,
            manager,
            repositories: Mutex::new(HashMap::new()),
            interrupt,
            queue_handed_off: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        session.seed_meta().await;
        Ok(session)
    }

    /// Writes the configured seed records that are still missing. Failures
    /// are logged only.
    async fn seed_meta(&self) {
        if !self.config.seed.enabled {
            return;
        }
        let meta = self.repository::<MetaRecord>(META_REPOSITORY);
        if let Err(err) = maintenance::seed(meta.as_ref(), &self.config.seed).await {
            tracing::warn!(repository = META_REPOSITORY, error = %err, "Seeding meta records failed");
        }
    }

    /// Returns the cached repository for `name`, creating it on first use.
    ///
    /// Names are matched case-insensitively.
    pub fn repository<T: Record>(&self, name: &str) -> Arc<CachedRepository<T>> {
        let key = policy_name(name);
        let mut repositories = self
            .repositories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = repositories.get(&key) {
            match Arc::clone(existing).downcast::<CachedRepository<T>>() {
                Ok(repository) => return repository,
                Err(_) => {
                    tracing::warn!(repository = %key, "Repository reopened with another record type");
                }
            }
        }

        let backend = self.backend.repository::<T>(name.trim());
        let cached = Arc::new(CachedRepository::new(
            backend,
            &self.config.cache,
            Arc::clone(&self.queue),
        ));
        self.manager.register(cached.clone());
        repositories.insert(key, cached.clone());
        cached
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Settings replaced by defaults during validation.
    pub fn issues(&self) -> &[ConfigIssue] {
        &self.issues
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_storage()
    }

    pub fn active_backend(&self) -> &ActiveBackend {
        &self.backend
    }

    pub fn queue(&self) -> &Arc<WriteQueue> {
        &self.queue
    }

    pub fn cache_manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flushes every cache, drains the queue and closes the backend.
    ///
    /// A queue handed to a successor session is left running; only this
    /// session's writes are waited for.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let flushed = self.manager.shutdown().await;
        if self.queue_handed_off.load(Ordering::SeqCst) {
            if !self.queue.wait_idle(QUEUE_SHUTDOWN_TIMEOUT).await {
                tracing::warn!(depth = self.queue.depth(), "Shared write queue still busy at close");
            }
        } else {
            self.queue.shutdown(QUEUE_SHUTDOWN_TIMEOUT).await;
        }

        self.interrupt.send_replace(true);
        self.backend.as_storage().close().await;
        tracing::info!(
            backend = %self.backend.as_storage().kind(),
            flushed = flushed.queued,
            "Storage session closed"
        );
    }
}

/// Shared, swappable access to the current session.
///
/// Repositories handed out by a replaced session keep working until that
/// session closes; fetch them again after [`SessionHandle::reconfigure`].
pub struct SessionHandle {
    current: RwLock<Arc<StorageSession>>,
}

impl SessionHandle {
    pub async fn open(config: StorageConfig) -> Result<Self, SessionError> {
        let session = StorageSession::open(config).await?;
        Ok(Self {
            current: RwLock::new(Arc::new(session)),
        })
    }

    pub async fn current(&self) -> Arc<StorageSession> {
        Arc::clone(&*self.current.read().await)
    }

    /// Opens a session for `config`, swaps it in, then closes the old one.
    pub async fn reconfigure(&self, config: StorageConfig) -> Result<(), SessionError> {
        let mut current = self.current.write().await;
        let next = StorageSession::open_with_queue(config, Some(Arc::clone(&current.queue))).await?;
        if Arc::ptr_eq(&next.queue, &current.queue) {
            current.queue_handed_off.store(true, Ordering::SeqCst);
        }

        let previous = std::mem::replace(&mut *current, Arc::new(next));
        drop(current);
        previous.close().await;
        tracing::info!("Storage session reconfigured");
        Ok(())
    }

    pub async fn close(&self) {
        self.current().await.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_core::config::QueueFullPolicy;
    use tempfile::TempDir;

    fn file_config(dir: &TempDir) -> StorageConfig {
        let mut config = StorageConfig::default();
        config.file.path = dir.path().join("data").to_string_lossy().to_string();
        config
    }

    #[tokio::test]
    async fn test_close_flushes_writes_to_disk() {
        let dir = TempDir::new().unwrap();
        let session = StorageSession::open(file_config(&dir)).await.unwrap();
        let meta = session.repository::<MetaRecord>("meta");

        meta.save(&MetaRecord::new("motd", "hello")).await.unwrap();
        session.close().await;

        assert!(dir.path().join("data/meta/motd.json").exists());
        assert!(!session.backend().is_ready());
        assert!(!session.queue().is_started());
    }

    #[tokio::test]
    async fn test_open_seeds_missing_meta_records_once() {
        let dir = TempDir::new().unwrap();
        let mut config = file_config(&dir);
        config.seed.enabled = true;
        config.seed.owner = "alice".to_string();

        let session = StorageSession::open(config.clone()).await.unwrap();
        let meta = session.repository::<MetaRecord>(META_REPOSITORY);
        meta.save(&MetaRecord::new(maintenance::META_OWNER, "bob"))
            .await
            .unwrap();
        session.close().await;

        let reopened = StorageSession::open(config).await.unwrap();
        let meta = reopened.repository::<MetaRecord>(META_REPOSITORY);
        let owner = meta.load(maintenance::META_OWNER).await.unwrap().unwrap();
        assert_eq!(owner.value, "bob");
        assert!(meta.exists(maintenance::META_CREATED_AT).await.unwrap());
        assert_eq!(meta.count().await.unwrap(), 3);
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_repository_is_shared_by_name() {
        let dir = TempDir::new().unwrap();
        let session = StorageSession::open(file_config(&dir)).await.unwrap();

        let first = session.repository::<MetaRecord>("meta");
        let second = session.repository::<MetaRecord>("META");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(session.cache_manager().repository_names().len(), 1);
        session.close().await;
    }

    #[tokio::test]
    async fn test_unreachable_relational_falls_back_to_file() {
        let dir = TempDir::new().unwrap();
        let mut config = file_config(&dir);
        config.backend = BackendKind::Relational;
        config.relational.url = format!(
            "sqlite://{}",
            dir.path().join("missing/nested/holdfast.db").display()
        );

        let session = StorageSession::open(config).await.unwrap();

        assert_eq!(session.backend().kind(), BackendKind::File);
        session.close().await;
    }

    #[tokio::test]
    async fn test_failed_migration_falls_back_to_file() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("holdfast.db");
        {
            // A pre-existing `records` table without the namespace column
            // makes the index migration fail.
            let options = sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&db)
                .create_if_missing(true);
            let pool = sqlx::SqlitePool::connect_with(options).await.unwrap();
            sqlx::query("CREATE TABLE records (key TEXT PRIMARY KEY)")
                .execute(&pool)
                .await
                .unwrap();
            pool.close().await;
        }
        let mut config = file_config(&dir);
        config.backend = BackendKind::Relational;
        config.relational.url = format!("sqlite://{}", db.display());

        let session = StorageSession::open(config).await.unwrap();

        assert_eq!(session.backend().kind(), BackendKind::File);
        session
            .repository::<MetaRecord>("meta")
            .save(&MetaRecord::new("motd", "fallback"))
            .await
            .unwrap();
        session.close().await;
        assert!(dir.path().join("data/meta/motd.json").exists());
    }

    #[tokio::test]
    async fn test_relational_session_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let mut config = file_config(&dir);
        config.backend = BackendKind::Relational;
        config.relational.url = format!("sqlite://{}", dir.path().join("holdfast.db").display());

        let session = StorageSession::open(config.clone()).await.unwrap();
        assert_eq!(session.backend().kind(), BackendKind::Relational);
        session
            .repository::<MetaRecord>("meta")
            .save(&MetaRecord::new("motd", "kept"))
            .await
            .unwrap();
        session.close().await;

        let reopened = StorageSession::open(config).await.unwrap();
        let loaded = reopened
            .repository::<MetaRecord>("meta")
            .load("motd")
            .await
            .unwrap();
        assert_eq!(loaded, Some(MetaRecord::new("motd", "kept")));
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_invalid_settings_are_reported() {
        let dir = TempDir::new().unwrap();
        let mut config = file_config(&dir);
        config.file.shard.depth = 9;

        let session = StorageSession::open(config).await.unwrap();

        assert_eq!(session.config().file.shard.depth, 2);
        assert!(session
            .issues()
            .iter()
            .any(|issue| issue.path == "file.shard.depth"));
        session.close().await;
    }

    #[tokio::test]
    async fn test_reconfigure_keeps_unchanged_queue() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir);
        let handle = SessionHandle::open(config.clone()).await.unwrap();
        let before = handle.current().await;

        let mut next = config.clone();
        next.cache.ttl_seconds = 60;
        handle.reconfigure(next).await.unwrap();
        let after = handle.current().await;

        assert!(before.is_closed());
        assert!(Arc::ptr_eq(before.queue(), after.queue()));
        assert!(after.queue().is_started());
        handle.close().await;
    }

    #[tokio::test]
    async fn test_reconfigure_restarts_changed_queue() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir);
        let handle = SessionHandle::open(config.clone()).await.unwrap();
        let before = handle.current().await;
        before
            .repository::<MetaRecord>("meta")
            .save(&MetaRecord::new("motd", "before"))
            .await
            .unwrap();

        let mut next = config.clone();
        next.queue.full_policy = QueueFullPolicy::Sync;
        handle.reconfigure(next).await.unwrap();
        let after = handle.current().await;

        assert!(!Arc::ptr_eq(before.queue(), after.queue()));
        assert!(!before.queue().is_started());
        assert!(after.queue().is_started());
        assert!(dir.path().join("data/meta/motd.json").exists());
        handle.close().await;
    }
}
