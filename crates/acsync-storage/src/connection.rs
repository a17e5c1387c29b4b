//! SQLite pool for the attendance ledger.
//!
//! Every terminal's stream and polling task writes through the same pool,
//! but SQLite admits one writer at a time. Connections therefore run in WAL
//! mode so readers never block, and carry a busy timeout long enough to
//! queue behind another task's `BEGIN IMMEDIATE` ledger transaction.

use crate::error::{StorageError, StorageResult};
use sqlx::ConnectOptions;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Ledger database settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite file; parent directories are created on open
    pub database_path: String,

    pub max_connections: u32,

    /// Connections kept open while the engine is idle
    pub idle_connections: u32,

    /// How long a task waits for a free pooled connection
    pub acquire_timeout: Duration,

    /// How long a writer waits for the database lock
    pub busy_timeout: Duration,

    pub create_if_missing: bool,

    /// Apply pending migrations on open
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: "acsync.db".to_string(),
            max_connections: 10,
            idle_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(10),
            create_if_missing: true,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Default::default()
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn idle_connections(mut self, idle: u32) -> Self {
        self.idle_connections = idle;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn auto_migrate(mut self, migrate: bool) -> Self {
        self.auto_migrate = migrate;
        self
    }

    /// Reject pool settings that could never serve a ledger write.
    ///
    /// # Errors
    /// `StorageError::Configuration` naming the offending setting.
    pub fn validate(&self) -> StorageResult<()> {
        if self.database_path.trim().is_empty() {
            return Err(StorageError::Configuration(
                "database path is empty".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(StorageError::Configuration(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.idle_connections > self.max_connections {
            return Err(StorageError::Configuration(format!(
                "idle_connections ({}) exceeds max_connections ({})",
                self.idle_connections, self.max_connections
            )));
        }
        if self.busy_timeout.is_zero() {
            return Err(StorageError::Configuration(
                "busy_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.database_path)
            .create_if_missing(self.create_if_missing)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.busy_timeout)
            .pragma("temp_store", "memory")
            .disable_statement_logging()
    }
}

/// Ledger connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the ledger described by `config`, migrating it unless disabled.
    ///
    /// # Errors
    /// Invalid settings, an unwritable directory, connection or migration
    /// failures.
    pub async fn new(config: DatabaseConfig) -> StorageResult<Self> {
        config.validate()?;

        if let Some(parent) = Path::new(&config.database_path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.idle_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(config.connect_options())
            .await?;

        let db = Self { pool };
        if config.auto_migrate {
            db.migrate().await?;
        }

        info!(
            path = %config.database_path,
            max_connections = config.max_connections,
            "Ledger database opened"
        );
        Ok(db)
    }

    /// Migrated in-memory ledger for tests.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Every connection would get its own memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply the workspace `migrations/`. Already applied ones are skipped.
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Journal mode in effect, `wal` for file databases.
    pub async fn journal_mode(&self) -> StorageResult<String> {
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.to_ascii_lowercase())
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
