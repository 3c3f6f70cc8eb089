use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use livelink_ingest::config::Config;
use livelink_ingest::jobs::{JobScheduler, RetentionPruner};
use livelink_ingest::rollup::DailyAggregator;
use livelink_ingest::store::{migrate, sqlite::SqliteStore};

/// Maintenance entry point for the LiveLink telemetry engine.
///
/// Ingestion itself is a library concern of the transport endpoint; this
/// binary only drives schema migrations and the batch jobs.
#[derive(Parser)]
#[command(name = "livelink-ingest", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    /// Overrides the configured level.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage schema migrations.
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Roll one day of history into daily summaries.
    Aggregate {
        /// Day to aggregate (YYYY-MM-DD). Default: today.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Restrict aggregation to one vehicle.
        #[arg(long)]
        vin: Option<String>,
    },

    /// Delete history older than the configured retention horizon.
    Prune,

    /// Run the periodic aggregation/prune scheduler until interrupted.
    Run,

    /// Print version information and exit.
    Version,
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending forward migrations.
    Up,
    /// Roll back the last applied migration.
    Down,
    /// Show the current migration version and dirty flag.
    Status,
}

/// Build-time version info.
mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    pub fn full() -> String {
        format!(
            "{} ({}/{})",
            RELEASE,
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Command::Version = &cli.command {
        println!("livelink-ingest {}", version::full());
        return Ok(());
    }

    let cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let log_level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter =
        EnvFilter::try_new(log_level).with_context(|| format!("invalid log level: {log_level}"))?;
    fmt().with_env_filter(filter).with_target(true).init();

    match cli.command {
        Command::Version => unreachable!("handled above"),

        Command::Migrate { action } => {
            // Raw connection: the store wrapper auto-migrates on open, which
            // would defeat `down` and `status`.
            let conn = rusqlite::Connection::open(&cfg.database.path).with_context(|| {
                format!("opening database {}", cfg.database.path.display())
            })?;

            match action {
                MigrateAction::Up => {
                    let applied = migrate::up(&conn).context("applying migrations")?;
                    println!("applied {applied} migration(s)");
                }
                MigrateAction::Down => {
                    migrate::down(&conn).context("rolling back migration")?;
                    println!("rolled back one migration");
                }
                MigrateAction::Status => {
                    let (ver, dirty) = migrate::status(&conn).context("reading status")?;
                    println!("version: {ver}, dirty: {dirty}");
                }
            }
        }

        Command::Aggregate { date, vin } => {
            let store = open_store(&cfg)?;
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let rows = DailyAggregator::new(&store)
                .aggregate(date, vin.as_deref())
                .with_context(|| format!("aggregating {date}"))?;
            println!("upserted {rows} summary row(s) for {date}");
        }

        Command::Prune => {
            let store = open_store(&cfg)?;
            let deleted = RetentionPruner::new(&store)
                .prune(cfg.retention.days)
                .context("pruning history")?;
            println!(
                "deleted {deleted} point(s) older than {} day(s)",
                cfg.retention.days
            );
        }

        Command::Run => {
            let store = Arc::new(open_store(&cfg)?);
            tracing::info!(
                database = %cfg.database.path.display(),
                distance_unit = cfg.units.distance.as_str(),
                "store opened",
            );
            let scheduler = JobScheduler::new(
                Arc::clone(&store),
                cfg.rollup.aggregation_interval,
                cfg.retention.prune_interval,
                cfg.retention.days,
            );

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;

            runtime.block_on(async {
                let cancel = CancellationToken::new();
                let job = tokio::spawn(scheduler.run(cancel.clone()));

                tokio::signal::ctrl_c()
                    .await
                    .context("waiting for shutdown signal")?;
                tracing::info!("shutdown signal received");

                cancel.cancel();
                job.await.context("joining scheduler task")
            })?;
        }
    }

    Ok(())
}

fn open_store(cfg: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&cfg.database.path)
        .with_context(|| format!("opening database {}", cfg.database.path.display()))
}
