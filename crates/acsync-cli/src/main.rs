//! acsync command line entry point.
//!
//! `acsync run` keeps every active terminal in sync until interrupted; the
//! remaining subcommands are one-shot administrative operations against a
//! single terminal. Configuration comes from `ACSYNC_*` environment
//! variables, optionally loaded from a `.env` file.

#![forbid(unsafe_code)]

use acsync_core::TerminalId;
use acsync_storage::Database;
use acsync_sync::config::database_config_from_env;
use acsync_sync::{SyncConfig, SyncManager};
use anyhow::{Context, bail};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "acsync", version, about = "Access-control terminal attendance sync")]
struct Cli {
    /// SQLite database path, overrides ACSYNC_DATABASE_PATH
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sync every active terminal until interrupted (default)
    Run,
    /// Apply pending database migrations and exit
    Migrate,
    /// Fetch the recent window of one terminal
    Sync {
        /// Terminal id
        terminal: i64,
    },
    /// Fetch an explicit time range of one terminal
    SyncHistorical {
        /// Terminal id
        terminal: i64,
        /// Range start, RFC 3339 or a local date/time in the organization offset
        #[arg(long)]
        from: String,
        /// Range end, defaults to now
        #[arg(long)]
        to: Option<String>,
    },
    /// Check connectivity and print the device identity
    Test {
        /// Terminal id
        terminal: i64,
    },
    /// Create placeholder employees for users enrolled on a terminal
    ImportUsers {
        /// Terminal id
        terminal: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let mut db_config = database_config_from_env().context("invalid database configuration")?;
    if let Some(path) = cli.database {
        db_config.database_path = path;
    }
    let database_path = db_config.database_path.clone();
    let database = Database::new(db_config)
        .await
        .with_context(|| format!("failed to open database at {database_path}"))?;

    let result = execute(cli.command.unwrap_or(Command::Run), &database).await;
    database.close().await;
    result
}

async fn execute(command: Command, database: &Database) -> anyhow::Result<()> {
    if let Command::Migrate = command {
        let journal_mode = database.journal_mode().await?;
        info!(%journal_mode, "Database migrations applied");
        return Ok(());
    }

    let config = SyncConfig::from_env().context("invalid sync configuration")?;
    let offset = config.utc_offset;
    let manager = SyncManager::new(database.pool().clone(), config);

    match command {
        Command::Run => run(&manager).await,
        Command::Sync { terminal } => {
            let report = manager
                .manual_sync(TerminalId::new(terminal))
                .await
                .with_context(|| format!("sync of terminal {terminal} failed"))?;
            println!("{report}");
            Ok(())
        }
        Command::SyncHistorical { terminal, from, to } => {
            let from = parse_instant(&from, offset)?;
            let to = match to {
                Some(to) => parse_instant(&to, offset)?,
                None => Utc::now(),
            };
            let report = manager
                .manual_sync_historical(TerminalId::new(terminal), from, to)
                .await
                .with_context(|| format!("historical sync of terminal {terminal} failed"))?;
            println!("{report}");
            Ok(())
        }
        Command::Test { terminal } => {
            let result = manager
                .test_terminal(TerminalId::new(terminal))
                .await
                .with_context(|| format!("cannot test terminal {terminal}"))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if let Some(error) = result.error {
                bail!("terminal {terminal} test failed: {error}");
            }
            Ok(())
        }
        Command::ImportUsers { terminal } => {
            let report = manager
                .import_device_users(TerminalId::new(terminal))
                .await
                .with_context(|| format!("user import from terminal {terminal} failed"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Migrate => Ok(()),
    }
}

async fn run(manager: &SyncManager) -> anyhow::Result<()> {
    let active = manager
        .start_all()
        .await
        .context("failed to start terminal sync")?;
    info!(active, "acsync running, press Ctrl+C to stop");

    let signal = tokio::signal::ctrl_c().await;
    info!("Shutting down");
    manager.stop_all().await;
    signal.context("failed to listen for shutdown signal")
}

/// Parse a range bound.
///
/// Bounds with an explicit offset are taken as is; local date/times and
/// bare dates (midnight) are read in the organization offset.
fn parse_instant(value: &str, offset: FixedOffset) -> anyhow::Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }

    let local = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d").map(|date| date.and_time(NaiveTime::MIN))
        })
        .with_context(|| format!("invalid time '{value}', expected RFC 3339 or YYYY-MM-DD"))?;

    offset
        .from_local_datetime(&local)
        .single()
        .map(|instant| instant.with_timezone(&Utc))
        .with_context(|| format!("ambiguous local time '{value}'"))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
