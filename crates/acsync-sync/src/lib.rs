//! Terminal sync orchestration for acsync
//!
//! Ties the device client and the attendance ledger together: each active
//! terminal on a routable address is backfilled, streamed and polled, and
//! every event it reports ends up in the ledger exactly once.
//!
//! # Components
//!
//! - **SyncManager**: root lifecycle and administrative operations
//! - **TerminalSyncOrchestrator**: backfill, stream and polling of one terminal
//! - **ClientRegistry**: per-terminal device clients, also the picture source
//! - **SyncConfig**: defaults and `ACSYNC_*` environment overrides
//!
//! # Example
//!
//! ```no_run
//! use acsync_storage::{Database, DatabaseConfig};
//! use acsync_sync::{SyncConfig, SyncManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DatabaseConfig::new("acsync.db")).await?;
//! let manager = SyncManager::new(db.pool().clone(), SyncConfig::from_env()?);
//!
//! let active = manager.start_all().await?;
//! println!("syncing {active} terminals");
//!
//! tokio::signal::ctrl_c().await?;
//! manager.stop_all().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod orchestrator;
pub mod reachability;
pub mod registry;
pub mod report;
pub mod state;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use manager::{SyncManager, TerminalTestResult, UserImportReport};
pub use orchestrator::{StreamEnd, StreamOutcome, TerminalSyncOrchestrator};
pub use reachability::Reachability;
pub use registry::ClientRegistry;
pub use report::SyncReport;
pub use state::{StateTransition, SyncState, SyncStateMachine};
