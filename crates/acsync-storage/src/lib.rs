//! Storage layer for the attendance sync engine.
//!
//! SQLite persistence for the terminal/employee directory and the
//! attendance ledger, plus the three pieces that sit on the write path:
//!
//! - [`EmployeeResolver`] - maps device subject identifiers to employees
//! - [`AttendanceLedgerWriter`] - exactly-once, transactional event recording
//! - [`ImageArchiver`] - downloads face pictures and enforces retention
//!
//! # Example
//!
//! ```no_run
//! use acsync_storage::{AttendanceLedgerWriter, Database, DatabaseConfig};
//! use acsync_core::{Direction, NormalizedEvent, SerialNumber, TerminalId, VerificationMethod};
//! use chrono::Utc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DatabaseConfig::new("acsync.db")).await?;
//! let writer = AttendanceLedgerWriter::new(db.pool().clone());
//!
//! let event = NormalizedEvent {
//!     serial_number: SerialNumber::new("42")?,
//!     subject_identifier: Some("7".to_string()),
//!     timestamp: Utc::now(),
//!     direction: Direction::Entry,
//!     verification_method: VerificationMethod::Face,
//!     image_path: None,
//! };
//!
//! let outcome = writer.record(TerminalId::new(1), &event).await?;
//! println!("written: {}", outcome.is_written());
//! # Ok(())
//! # }
//! ```

pub mod archiver;
pub mod connection;
pub mod error;
pub mod ledger;
pub mod models;
pub mod repositories;
pub mod resolver;
pub mod transaction;

pub use archiver::{ArchiveConfig, ArchiveJob, ArchiveQueue, ImageArchiver, ImageFetcher};
pub use connection::{Database, DatabaseConfig};
pub use error::{StorageError, StorageResult};
pub use ledger::{AttendanceLedgerWriter, DuplicateMatch, RecordOutcome, SkipReason};
pub use models::{Account, AttendanceLogEntry, Employee, EmployeeMapping, Terminal};
pub use repositories::{
    AttendanceLogRepository, EmployeeRepository, SqliteAttendanceLogRepository,
    SqliteEmployeeRepository, SqliteTerminalRepository, TerminalRepository,
};
pub use resolver::{EmployeeResolver, Resolution, ResolutionStep};
