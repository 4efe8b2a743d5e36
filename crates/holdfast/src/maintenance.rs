//! Startup seeding of well-known `meta` records.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use holdfast_core::config::SeedConfig;
use holdfast_core::record::MetaRecord;
use holdfast_core::storage::{Repository, Result};

/// Repository the seeded records live in.
pub const META_REPOSITORY: &str = "meta";

pub const META_OWNER: &str = "owner";
pub const META_SERVER_NAME: &str = "server-name";
pub const META_CREATED_AT: &str = "created-at";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub seeded: usize,
    /// Keys that already existed and were left untouched.
    pub skipped: usize,
}

/// Writes each enabled seed key that does not exist yet.
///
/// Existing values are never overwritten, so running it again is a no-op.
pub async fn seed(meta: &dyn Repository<MetaRecord>, config: &SeedConfig) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    if !config.enabled {
        return Ok(report);
    }

    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let candidates = [
        (config.seed_owner, META_OWNER, config.owner.as_str()),
        (config.seed_server_name, META_SERVER_NAME, config.server_name.as_str()),
        (config.seed_created_at, META_CREATED_AT, created_at.as_str()),
    ];

    for (wanted, key, value) in candidates {
        if !wanted {
            continue;
        }
        if meta.exists(key).await? {
            report.skipped += 1;
            continue;
        }
        meta.save(&MetaRecord::new(key, value)).await?;
        report.seeded += 1;
    }

    tracing::info!(
        repository = %meta.name(),
        seeded = report.seeded,
        skipped = report.skipped,
        "Seed complete"
    );
    Ok(report)
}
