//! SQLite error mapping.
//!
//! Maps `sqlx::Error` to `RepositoryError` from `holdfast_core::storage` so
//! driver types never cross the repository boundary.

use thiserror::Error;

use holdfast_core::storage::RepositoryError;

/// Maps a sqlx error to a RepositoryError.
///
/// # Error Mapping
///
/// - Pool and transport errors → `RepositoryError::ConnectionFailed`
/// - `RowNotFound` → `RepositoryError::NotFound`
/// - Decode errors → `RepositoryError::Serialization`
/// - All other errors → `RepositoryError::QueryFailed`
pub fn map_sqlx_error(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => RepositoryError::ConnectionFailed(err.to_string()),
        sqlx::Error::RowNotFound => RepositoryError::NotFound {
            entity_type: "Record",
            id: "unknown".to_string(),
        },
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => {
            RepositoryError::Serialization(err.to_string())
        }
        _ => RepositoryError::QueryFailed(err.to_string()),
    }
}

/// Errors raised while bringing the schema up to date.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to prepare schema version table: {0}")]
    VersionTable(String),
    #[error("Migration {version} ({description}) failed: {message}")]
    Failed {
        version: i64,
        description: String,
        message: String,
    },
}

/// Errors raised while opening the SQLite backend.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("Failed to connect: {0}")]
    Connect(String),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}
