use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use holdfast_core::record::{encode_record, normalize_id, Record};
use holdfast_core::storage::{RepositoryError, Repository, Result};

use crate::retry::RetryExecutor;

use super::layout::{ReadResult, RepositoryLayout};

/// Repository storing one JSON file per record.
pub struct FileRepository<T> {
    layout: Arc<RepositoryLayout>,
    retry: RetryExecutor,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> FileRepository<T> {
    pub(crate) fn new(layout: RepositoryLayout, retry: RetryExecutor) -> Self {
        Self {
            layout: Arc::new(layout),
            retry,
            _record: PhantomData,
        }
    }

    /// Runs a blocking layout operation on the blocking pool.
    async fn blocking<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&RepositoryLayout) -> std::io::Result<R> + Send + 'static,
    {
        let layout = Arc::clone(&self.layout);
        tokio::task::spawn_blocking(move || f(&layout))
            .await
            .map_err(|e| RepositoryError::Io(e.to_string()))?
            .map_err(RepositoryError::from)
    }

    fn operation(&self, verb: &str, id: &str) -> String {
        format!("{} {}/{}", verb, self.layout.name, id)
    }
}

#[async_trait]
impl<T: Record> Repository<T> for FileRepository<T> {
    fn name(&self) -> &str {
        &self.layout.name
    }

    async fn load(&self, id: &str) -> Result<Option<T>> {
        let id = normalize_id(id)?.to_string();
        let operation = self.operation("load", &id);
        let outcome = self
            .retry
            .run(&operation, || {
                let id = id.clone();
                self.blocking(move |layout| layout.read::<T>(&id))
            })
            .await;

        match outcome.into_result() {
            Ok(ReadResult::Found(record)) => Ok(Some(record)),
            Ok(ReadResult::Missing | ReadResult::Corrupt) => Ok(None),
            Err(err) => {
                tracing::error!(repository = %self.layout.name, id = %id, error = %err, "Load failed");
                Ok(None)
            }
        }
    }

    async fn save(&self, record: &T) -> Result<()> {
        let id = normalize_id(record.id())?.to_string();
        let bytes = Arc::new(encode_record(record)?.into_bytes());
        let operation = self.operation("save", &id);
        let outcome = self
            .retry
            .run(&operation, || {
                let (id, bytes) = (id.clone(), Arc::clone(&bytes));
                self.blocking(move |layout| layout.write(&id, &bytes))
            })
            .await;

        if !outcome.success {
            tracing::error!(
                repository = %self.layout.name,
                id = %id,
                attempts = outcome.attempts,
                error = ?outcome.last_error,
                "Save failed"
            );
        }
        outcome.into_result()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = normalize_id(id)?.to_string();
        let operation = self.operation("delete", &id);
        let outcome = self
            .retry
            .run(&operation, || {
                let id = id.clone();
                self.blocking(move |layout| layout.remove(&id))
            })
            .await;

        if !outcome.success {
            tracing::error!(
                repository = %self.layout.name,
                id = %id,
                attempts = outcome.attempts,
                error = ?outcome.last_error,
                "Delete failed"
            );
        }
        outcome.into_result()
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let id = normalize_id(id)?.to_string();
        self.blocking(move |layout| Ok(layout.exists(&id))).await
    }

    async fn load_all(&self, limit: Option<usize>) -> Result<Vec<T>> {
        let outcome = self
            .retry
            .run(&self.operation("load_all", "*"), || {
                self.blocking(move |layout| layout.read_all::<T>(limit))
            })
            .await;

        match outcome.into_result() {
            Ok(records) => Ok(records),
            Err(err) => {
                tracing::error!(repository = %self.layout.name, error = %err, "Scan failed");
                Ok(Vec::new())
            }
        }
    }

    async fn count(&self) -> Result<u64> {
        let outcome = self
            .retry
            .run(&self.operation("count", "*"), || {
                self.blocking(|layout| layout.count_ids())
            })
            .await;

        match outcome.into_result() {
            Ok(count) => Ok(count),
            Err(err) => {
                tracing::error!(repository = %self.layout.name, error = %err, "Count failed");
                Ok(0)
            }
        }
    }
}
