//! SQLite schema definitions and SQL query constants.
//!
//! This module contains all SQL statements used by the SQLite backend,
//! following the Functional Core pattern - pure data, no I/O.

/// Version tracking table for the migration runner.
pub const CREATE_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

pub const COUNT_VERSION_ROWS: &str = "SELECT COUNT(*) FROM schema_version";

pub const SELECT_CURRENT_VERSION: &str = "SELECT COALESCE(MAX(version), 0) FROM schema_version";

pub const INSERT_VERSION: &str = "INSERT INTO schema_version (version) VALUES (?1)";

// Built-in migrations

/// v1: one table shared by every repository, keyed by (namespace, key).
pub const CREATE_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (namespace, key)
)
"#;

/// v2: supports recency scans per namespace.
pub const CREATE_UPDATED_AT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_records_namespace_updated_at
ON records(namespace, updated_at)
"#;

// Record queries

pub const SELECT_RECORD: &str = r#"
SELECT value
FROM records
WHERE namespace = ?1 AND key = ?2
"#;

pub const UPSERT_RECORD: &str = r#"
INSERT INTO records (namespace, key, value, updated_at)
VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
ON CONFLICT (namespace, key) DO UPDATE SET
    value = excluded.value,
    updated_at = excluded.updated_at
"#;

pub const DELETE_RECORD: &str = r#"
DELETE FROM records
WHERE namespace = ?1 AND key = ?2
"#;

pub const RECORD_EXISTS: &str = r#"
SELECT 1
FROM records
WHERE namespace = ?1 AND key = ?2
"#;

/// A negative limit means no limit in SQLite.
pub const SELECT_RECORDS: &str = r#"
SELECT key, value
FROM records
WHERE namespace = ?1
ORDER BY key
LIMIT ?2
"#;

pub const COUNT_RECORDS: &str = r#"
SELECT COUNT(*)
FROM records
WHERE namespace = ?1
"#;

pub const PING: &str = "SELECT 1";
