use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use holdfast::config;
use holdfast::maintenance::{self, META_REPOSITORY};
use holdfast::transfer::DEFAULT_MAX_RECORDS;
use holdfast::{transfer, ActiveBackend, HealthReport, RetryExecutor, StorageSession, TransferOptions};
use holdfast_core::config::StorageConfig;
use holdfast_core::record::MetaRecord;
use holdfast_core::storage::{BackendKind, Repository};

/// holdfast - Write-behind record storage over sharded JSON files or SQLite
#[derive(Parser, Debug)]
#[command(name = "holdfast")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON config file; HOLDFAST_* environment variables are used when omitted
    #[arg(long, short, global = true, env = "HOLDFAST_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a health report as JSON
    Health,

    /// Print one record
    Get { repository: String, id: String },

    /// Store a key/value record
    Put {
        repository: String,
        id: String,
        value: String,
    },

    /// Delete one record
    Delete { repository: String, id: String },

    /// Print records of a repository
    List {
        repository: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Write the configured meta records that do not exist yet
    Seed,

    /// Copy records from one backend to another
    Migrate {
        #[arg(long)]
        from: BackendKind,

        #[arg(long)]
        to: BackendKind,

        /// Repository to copy
        #[arg(long, default_value = "meta")]
        repository: String,

        /// Count records without writing them
        #[arg(long)]
        dry_run: bool,

        /// Leave records already present in the target untouched
        #[arg(long)]
        skip_existing: bool,

        #[arg(long, default_value_t = DEFAULT_MAX_RECORDS)]
        max_records: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "holdfast=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    let config = match &cli.config {
        Some(path) => config::from_json_file(path)?,
        None => config::from_env(),
    };

    match cli.command {
        Command::Migrate {
            from,
            to,
            repository,
            dry_run,
            skip_existing,
            max_records,
        } => {
            let options = TransferOptions {
                dry_run,
                max_records,
                skip_existing,
            };
            migrate(config, from, to, &repository, options).await
        }
        command => run_session_command(config, command).await,
    }
}

async fn run_session_command(config: StorageConfig, command: Command) -> Result<()> {
    let session = StorageSession::open(config)
        .await
        .context("Failed to open storage session")?;
    let result = run_in_session(&session, command).await;
    // Closing flushes every pending write.
    session.close().await;
    result
}

async fn run_in_session(session: &StorageSession, command: Command) -> Result<()> {
    match command {
        Command::Health => {
            let report = HealthReport::collect(session).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Get { repository, id } => {
            let repo = session.repository::<MetaRecord>(&repository);
            match repo.load(&id).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => bail!("Record {}/{} not found", repository, id),
            }
        }
        Command::Put {
            repository,
            id,
            value,
        } => {
            let repo = session.repository::<MetaRecord>(&repository);
            repo.save(&MetaRecord::new(id, value)).await?;
        }
        Command::Delete { repository, id } => {
            let repo = session.repository::<MetaRecord>(&repository);
            repo.delete(&id).await?;
        }
        Command::List { repository, limit } => {
            let repo = session.repository::<MetaRecord>(&repository);
            let records = repo.load_all(limit).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::Seed => {
            let mut seed = session.config().seed.clone();
            seed.enabled = true;
            let meta = session.repository::<MetaRecord>(META_REPOSITORY);
            let report = maintenance::seed(meta.as_ref(), &seed).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Migrate { .. } => bail!("migrate runs without a storage session"),
    }
    Ok(())
}

/// Copies one repository between two backends opened from the same config.
async fn migrate(
    config: StorageConfig,
    from: BackendKind,
    to: BackendKind,
    repository: &str,
    options: TransferOptions,
) -> Result<()> {
    if from == to {
        bail!("Source and target backends are both {}", from);
    }

    let (config, issues) = config.validate();
    for issue in &issues {
        tracing::warn!(setting = %issue.path, issue = %issue.message, "Invalid storage setting replaced");
    }

    let retry = RetryExecutor::new(config.retry);
    let source = ActiveBackend::open(from, &config, retry.clone())
        .await
        .with_context(|| format!("Failed to open {} backend", from))?;
    let target = ActiveBackend::open(to, &config, retry)
        .await
        .with_context(|| format!("Failed to open {} backend", to))?;

    let result = transfer::<MetaRecord>(
        source.repository::<MetaRecord>(repository).as_ref(),
        target.repository::<MetaRecord>(repository).as_ref(),
        options,
    )
    .await;

    source.as_storage().close().await;
    target.as_storage().close().await;

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
