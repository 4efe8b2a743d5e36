//! Sharded JSON file backend.
//!
//! Layout: `<root>/<repository>/[<shard-segments>/]<sanitized-id>.json`.

mod atomic;
mod layout;
mod locks;
mod repository;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use holdfast_core::config::FileConfig;
use holdfast_core::record::Record;
use holdfast_core::shard::{sanitize, ShardConfig};
use holdfast_core::storage::{BackendKind, RepositoryError, Result, StorageBackend};

use crate::retry::RetryExecutor;

pub use repository::FileRepository;

use layout::RepositoryLayout;
use locks::LockStripes;

/// File backend shared by every repository under one root directory.
pub struct FileBackend {
    root: PathBuf,
    shard: ShardConfig,
    retry: RetryExecutor,
    stripes: Arc<LockStripes>,
    ready: AtomicBool,
}

impl FileBackend {
    /// Opens the backend, creating the root directory if needed.
    pub async fn open(config: &FileConfig, retry: RetryExecutor) -> Result<Self> {
        let root = PathBuf::from(&config.path);
        tokio::fs::create_dir_all(&root).await?;
        tracing::info!(
            root = %root.display(),
            sharded = config.shard.enabled,
            strategy = ?config.shard.strategy,
            "File backend ready"
        );
        Ok(Self {
            root,
            shard: config.shard.clone(),
            retry,
            stripes: Arc::new(LockStripes::default()),
            ready: AtomicBool::new(true),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shard(&self) -> &ShardConfig {
        &self.shard
    }

    /// Builds a repository stored under `<root>/<name>`.
    pub fn repository<T: Record>(&self, name: &str) -> FileRepository<T> {
        let layout = RepositoryLayout {
            name: name.to_string(),
            dir: self.root.join(sanitize(name)),
            shard: self.shard.clone(),
            stripes: Arc::clone(&self.stripes),
        };
        FileRepository::new(layout, self.retry.clone())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Writes, reads back and deletes a uniquely named temp file under the root.
    async fn probe(&self) -> Result<()> {
        let probe = self
            .root
            .join(format!(".holdfast-probe-{}.tmp", uuid::Uuid::new_v4()));
        let expected = b"probe".to_vec();

        let written = async {
            tokio::fs::write(&probe, &expected).await?;
            let read = tokio::fs::read(&probe).await?;
            Ok::<_, std::io::Error>(read)
        }
        .await;
        let _ = tokio::fs::remove_file(&probe).await;

        match written {
            Ok(read) if read == expected => Ok(()),
            Ok(_) => Err(RepositoryError::Io("probe file content mismatch".to_string())),
            Err(err) => Err(err.into()),
        }
    }

    async fn close(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }
}
