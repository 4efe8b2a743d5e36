use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::SqlitePool;

use holdfast_core::record::{decode_record, encode_record, normalize_id, Record};
use holdfast_core::storage::{Repository, Result};

use crate::retry::RetryExecutor;

use super::error::map_sqlx_error;
use super::schema;

/// Repository storing records as JSON text in the shared `records` table.
///
/// The repository name is the row namespace.
pub struct SqliteRepository<T> {
    name: String,
    pool: SqlitePool,
    retry: RetryExecutor,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> SqliteRepository<T> {
    pub(crate) fn new(name: &str, pool: SqlitePool, retry: RetryExecutor) -> Self {
        Self {
            name: name.to_string(),
            pool,
            retry,
            _record: PhantomData,
        }
    }

    fn decode_row(&self, id: &str, value: &str) -> Option<T> {
        match decode_record::<T>(value.as_bytes()) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(repository = %self.name, id = %id, error = %err, "Unreadable record row");
                None
            }
        }
    }

    // ========================================================================
    // Single statements (retried by the trait methods)
    // ========================================================================

    async fn select_value(&self, id: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(schema::SELECT_RECORD)
            .bind(&self.name)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn upsert(&self, id: &str, value: &str) -> Result<()> {
        sqlx::query(schema::UPSERT_RECORD)
            .bind(&self.name)
            .bind(id)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        sqlx::query(schema::DELETE_RECORD)
            .bind(&self.name)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn select_exists(&self, id: &str) -> Result<bool> {
        let row = sqlx::query_scalar::<_, i64>(schema::RECORD_EXISTS)
            .bind(&self.name)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.is_some())
    }

    async fn select_all(&self, limit: i64) -> Result<Vec<(String, String)>> {
        sqlx::query_as::<_, (String, String)>(schema::SELECT_RECORDS)
            .bind(&self.name)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn select_count(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(schema::COUNT_RECORDS)
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl<T: Record> Repository<T> for SqliteRepository<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, id: &str) -> Result<Option<T>> {
        let id = normalize_id(id)?;
        let operation = format!("load {}/{}", self.name, id);
        match self.retry.run(&operation, || self.select_value(id)).await.into_result() {
            Ok(Some(value)) => Ok(self.decode_row(id, &value)),
            Ok(None) => Ok(None),
            Err(err) => {
                tracing::error!(repository = %self.name, id = %id, error = %err, "Load failed");
                Ok(None)
            }
        }
    }

    async fn save(&self, record: &T) -> Result<()> {
        let id = normalize_id(record.id())?;
        let value = encode_record(record)?;
        let operation = format!("save {}/{}", self.name, id);
        let outcome = self.retry.run(&operation, || self.upsert(id, &value)).await;
        if !outcome.success {
            tracing::error!(
                repository = %self.name,
                id = %id,
                attempts = outcome.attempts,
                error = ?outcome.last_error,
                "Save failed"
            );
        }
        outcome.into_result()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = normalize_id(id)?;
        let operation = format!("delete {}/{}", self.name, id);
        let outcome = self.retry.run(&operation, || self.remove(id)).await;
        if !outcome.success {
            tracing::error!(
                repository = %self.name,
                id = %id,
                attempts = outcome.attempts,
                error = ?outcome.last_error,
                "Delete failed"
            );
        }
        outcome.into_result()
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let id = normalize_id(id)?;
        let operation = format!("exists {}/{}", self.name, id);
        match self.retry.run(&operation, || self.select_exists(id)).await.into_result() {
            Ok(found) => Ok(found),
            Err(err) => {
                tracing::error!(repository = %self.name, id = %id, error = %err, "Exists check failed");
                Ok(false)
            }
        }
    }

    async fn load_all(&self, limit: Option<usize>) -> Result<Vec<T>> {
        let limit = limit.map_or(-1, |limit| limit as i64);
        let operation = format!("load_all {}", self.name);
        match self.retry.run(&operation, || self.select_all(limit)).await.into_result() {
            Ok(rows) => Ok(rows
                .iter()
                .filter_map(|(id, value)| self.decode_row(id, value))
                .collect()),
            Err(err) => {
                tracing::error!(repository = %self.name, error = %err, "Scan failed");
                Ok(Vec::new())
            }
        }
    }

    async fn count(&self) -> Result<u64> {
        let operation = format!("count {}", self.name);
        match self.retry.run(&operation, || self.select_count()).await.into_result() {
            Ok(count) => Ok(count.max(0) as u64),
            Err(err) => {
                tracing::error!(repository = %self.name, error = %err, "Count failed");
                Ok(0)
            }
        }
    }
}
