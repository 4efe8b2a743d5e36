//! Schema migration runner.
//!
//! Migrations carry a version number and are applied in ascending order, each
//! in its own transaction together with its `schema_version` row. A failed
//! migration rolls back and stops the run; later restarts resume from the last
//! committed version.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};

use super::error::MigrationError;
use super::schema;

/// A versioned schema change.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Version recorded once the migration commits. Must be positive.
    fn version(&self) -> i64;

    fn description(&self) -> &str;

    /// Applies the change inside the runner's transaction.
    async fn apply(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error>;
}

/// Migration made of plain SQL statements.
pub struct SqlMigration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

impl SqlMigration {
    pub const fn new(
        version: i64,
        description: &'static str,
        statements: &'static [&'static str],
    ) -> Self {
        Self {
            version,
            description,
            statements,
        }
    }
}

#[async_trait]
impl Migration for SqlMigration {
    fn version(&self) -> i64 {
        self.version
    }

    fn description(&self) -> &str {
        self.description
    }

    async fn apply(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        for statement in self.statements {
            sqlx::query(*statement).execute(&mut *conn).await?;
        }
        Ok(())
    }
}

/// Migrations every relational backend runs.
pub fn builtin_migrations() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(SqlMigration::new(
            1,
            "create records table",
            &[schema::CREATE_RECORDS_TABLE],
        )),
        Box::new(SqlMigration::new(
            2,
            "index records by namespace and updated_at",
            &[schema::CREATE_UPDATED_AT_INDEX],
        )),
    ]
}

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from_version: i64,
    pub to_version: i64,
    pub applied: Vec<i64>,
}

/// Applies registered migrations to a pool.
pub struct MigrationRunner {
    migrations: Vec<Box<dyn Migration>>,
}

impl Default for MigrationRunner {
    fn default() -> Self {
        Self::new(builtin_migrations())
    }
}

impl MigrationRunner {
    pub fn new(migrations: Vec<Box<dyn Migration>>) -> Self {
        Self { migrations }
    }

    pub fn register(&mut self, migration: Box<dyn Migration>) {
        self.migrations.push(migration);
    }

    /// Reads the current schema version, 0 when none was recorded.
    pub async fn current_version(pool: &SqlitePool) -> Result<i64, MigrationError> {
        sqlx::query_scalar::<_, i64>(schema::SELECT_CURRENT_VERSION)
            .fetch_one(pool)
            .await
            .map_err(|e| MigrationError::VersionTable(e.to_string()))
    }

    /// Brings the schema up to the highest registered version.
    pub async fn run(&self, pool: &SqlitePool) -> Result<MigrationReport, MigrationError> {
        ensure_version_table(pool).await?;

        let from_version = Self::current_version(pool).await?;
        let mut current = from_version;
        let mut applied = Vec::new();

        let mut pending: Vec<&dyn Migration> = self
            .migrations
            .iter()
            .map(|m| m.as_ref())
            .filter(|m| m.version() > from_version)
            .collect();
        pending.sort_by_key(|m| m.version());

        for migration in pending {
            if migration.version() <= current {
                tracing::warn!(
                    version = migration.version(),
                    description = migration.description(),
                    "Skipping duplicate migration version"
                );
                continue;
            }
            apply_one(pool, migration).await?;
            tracing::info!(
                version = migration.version(),
                description = migration.description(),
                "Applied migration"
            );
            current = migration.version();
            applied.push(current);
        }

        Ok(MigrationReport {
            from_version,
            to_version: current,
            applied,
        })
    }
}

async fn ensure_version_table(pool: &SqlitePool) -> Result<(), MigrationError> {
    let table_err = |e: sqlx::Error| MigrationError::VersionTable(e.to_string());

    sqlx::query(schema::CREATE_VERSION_TABLE)
        .execute(pool)
        .await
        .map_err(table_err)?;

    let rows = sqlx::query_scalar::<_, i64>(schema::COUNT_VERSION_ROWS)
        .fetch_one(pool)
        .await
        .map_err(table_err)?;
    if rows == 0 {
        sqlx::query(schema::INSERT_VERSION)
            .bind(0_i64)
            .execute(pool)
            .await
            .map_err(table_err)?;
    }
    Ok(())
}

async fn apply_one(pool: &SqlitePool, migration: &dyn Migration) -> Result<(), MigrationError> {
    let failed = |e: sqlx::Error| MigrationError::Failed {
        version: migration.version(),
        description: migration.description().to_string(),
        message: e.to_string(),
    };

    let mut tx = pool.begin().await.map_err(failed)?;

    let result = async {
        migration.apply(&mut *tx).await?;
        sqlx::query(schema::INSERT_VERSION)
            .bind(migration.version())
            .execute(&mut *tx)
            .await?;
        Ok::<_, sqlx::Error>(())
    }
    .await;

    match result {
        Ok(()) => tx.commit().await.map_err(failed),
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback after failed migration also failed");
            }
            tracing::error!(
                version = migration.version(),
                description = migration.description(),
                error = %err,
                "Migration failed"
            );
            Err(failed(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn pool(dir: &tempfile::TempDir) -> SqlitePool {
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("test.db"))
            .create_if_missing(true);
        SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .unwrap()
    }

    async fn table_exists(pool: &SqlitePool, name: &str) -> bool {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .unwrap()
            == 1
    }

    #[tokio::test]
    async fn test_fresh_database_reaches_latest_version() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir).await;

        let report = MigrationRunner::default().run(&pool).await.unwrap();

        assert_eq!(report.from_version, 0);
        assert_eq!(report.to_version, 2);
        assert_eq!(report.applied, vec![1, 2]);
        assert!(table_exists(&pool, "records").await);
    }

    #[tokio::test]
    async fn test_second_run_applies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir).await;
        MigrationRunner::default().run(&pool).await.unwrap();

        let report = MigrationRunner::default().run(&pool).await.unwrap();

        assert!(report.applied.is_empty());
        assert_eq!(report.from_version, 2);
        assert_eq!(report.to_version, 2);
        assert_eq!(MigrationRunner::current_version(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_migrations_apply_in_version_order() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir).await;
        let runner = MigrationRunner::new(vec![
            Box::new(SqlMigration::new(
                2,
                "add extra",
                &["ALTER TABLE things ADD COLUMN extra TEXT"],
            )),
            Box::new(SqlMigration::new(
                1,
                "create things",
                &["CREATE TABLE things (id TEXT PRIMARY KEY)"],
            )),
        ]);

        let report = runner.run(&pool).await.unwrap();

        assert_eq!(report.applied, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failed_migration_rolls_back_and_keeps_version() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir).await;
        let mut runner = MigrationRunner::default();
        runner.register(Box::new(SqlMigration::new(
            3,
            "broken",
            &["CREATE TABLE partial (id TEXT)", "NOT VALID SQL"],
        )));

        let err = runner.run(&pool).await.unwrap_err();

        assert!(matches!(err, MigrationError::Failed { version: 3, .. }));
        assert_eq!(MigrationRunner::current_version(&pool).await.unwrap(), 2);
        assert!(!table_exists(&pool, "partial").await);
    }
}
