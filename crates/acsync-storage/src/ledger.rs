//! Exactly-once attendance ledger writes.
//!
//! Each [`AttendanceLedgerWriter::record`] call is one `BEGIN IMMEDIATE`
//! transaction:
//!
//! ```text
//! terminal ──> declared role ──> resolve subject ──> duplicate probes ──> insert
//!   missing?     forces direction   (may add mapping)   (a) serial         ON CONFLICT
//!   skip                                               (b) employee        DO NOTHING
//!                                                      (c) display name
//! ```
//!
//! Probes (a) to (c) look for a row within the duplicate window; the unique
//! key on `(serial_number, terminal_name, organization_id)` catches writers
//! that race past the probes. Stream and polling for the same terminal share
//! one writer and rely on this alone.

use crate::archiver::{ArchiveJob, ArchiveQueue};
use crate::error::StorageResult;
use crate::models::NewAttendanceLogEntry;
use crate::resolver::{EmployeeResolver, Resolution};
use crate::transaction;
use acsync_core::constants::DUPLICATE_WINDOW_MS;
use acsync_core::{Direction, NormalizedEvent, TerminalId};
use sqlx::{SqliteConnection, SqlitePool};
use std::fmt;
use tracing::{debug, info, warn};

/// Which check identified a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateMatch {
    /// Same serial, terminal and organization within the window
    Serial,
    /// Same employee, terminal, organization and direction within the window
    Employee,
    /// Same displayed name, terminal, organization and direction within the window
    EmployeeName,
    /// Lost an insert race on the unique key
    UniqueKey,
}

/// Why an event was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Duplicate(DuplicateMatch),
    TerminalNotFound,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Duplicate(_) => f.write_str("duplicate"),
            SkipReason::TerminalNotFound => f.write_str("terminal_not_found"),
        }
    }
}

/// Result of recording one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Written {
        entry_id: i64,
        employee_id: Option<i64>,
        /// Direction as persisted, after the declared-role override
        direction: Direction,
    },
    Skipped(SkipReason),
}

impl RecordOutcome {
    #[must_use]
    pub fn is_written(&self) -> bool {
        matches!(self, RecordOutcome::Written { .. })
    }

    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, RecordOutcome::Skipped(SkipReason::Duplicate(_)))
    }

    #[must_use]
    pub fn reason(&self) -> Option<SkipReason> {
        match self {
            RecordOutcome::Written { .. } => None,
            RecordOutcome::Skipped(reason) => Some(*reason),
        }
    }
}

/// Transactional writer for the attendance ledger.
#[derive(Debug, Clone)]
pub struct AttendanceLedgerWriter {
    pool: SqlitePool,
    resolver: EmployeeResolver,
    duplicate_window_ms: i64,
    archive: Option<ArchiveQueue>,
}

impl AttendanceLedgerWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            resolver: EmployeeResolver,
            duplicate_window_ms: DUPLICATE_WINDOW_MS,
            archive: None,
        }
    }

    /// Hand picture references of written rows to an archiver.
    pub fn with_archive_queue(mut self, queue: ArchiveQueue) -> Self {
        self.archive = Some(queue);
        self
    }

    /// Override the duplicate window (inclusive, milliseconds).
    pub fn with_duplicate_window(mut self, window_ms: i64) -> Self {
        self.duplicate_window_ms = window_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record one normalized event from `terminal_id`.
    ///
    /// Duplicates and unknown terminals are outcomes, not errors.
    ///
    /// # Errors
    /// Database failures; the transaction is rolled back.
    pub async fn record(
        &self,
        terminal_id: TerminalId,
        event: &NormalizedEvent,
    ) -> StorageResult<RecordOutcome> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let Some(terminal) = transaction::find_terminal(&mut tx, terminal_id.get()).await? else {
            tx.rollback().await?;
            warn!(terminal_id = %terminal_id, "Event for unknown terminal dropped");
            return Ok(RecordOutcome::Skipped(SkipReason::TerminalNotFound));
        };

        let direction = terminal.role()?.resolve(event.direction);
        if direction != event.direction {
            debug!(
                terminal_id = %terminal_id,
                serial = %event.serial_number,
                reported = %event.direction,
                persisted = %direction,
                "Declared role overrides event direction"
            );
        }

        let resolution = self
            .resolver
            .resolve(&mut tx, &terminal, event.subject_identifier.as_deref())
            .await?;
        if let Some(employee_org) = resolution.employee_organization_id
            && employee_org != terminal.organization_id
        {
            warn!(
                terminal_id = %terminal_id,
                employee_id = ?resolution.employee_id,
                employee_organization_id = employee_org,
                terminal_organization_id = terminal.organization_id,
                "Employee organization differs from terminal, keeping terminal's"
            );
        }

        let probe = Probe {
            terminal_name: &terminal.name,
            organization_id: terminal.organization_id,
            direction,
            epoch_ms: event.epoch_millis(),
            window_ms: self.duplicate_window_ms,
        };
        if let Some(matched) = probe.find(&mut tx, event, &resolution).await? {
            tx.rollback().await?;
            debug!(
                terminal_id = %terminal_id,
                serial = %event.serial_number,
                matched = ?matched,
                "Duplicate event skipped"
            );
            return Ok(RecordOutcome::Skipped(SkipReason::Duplicate(matched)));
        }

        let entry = NewAttendanceLogEntry {
            employee_id: resolution.employee_id,
            employee_name: &resolution.employee_name,
            terminal_name: &terminal.name,
            event_time: event.timestamp,
            direction,
            verification_method: event.verification_method,
            serial_number: event.serial_number.as_str(),
            image_path: event.image_path.as_deref(),
            organization_id: terminal.organization_id,
        };
        let inserted = match transaction::insert_entry(&mut tx, &entry).await {
            Ok(id) => id,
            Err(e) if e.is_unique_violation() => None,
            Err(e) => return Err(e),
        };
        // Commit even when the key was taken so a lazily created mapping sticks.
        tx.commit().await?;

        let Some(entry_id) = inserted else {
            debug!(
                terminal_id = %terminal_id,
                serial = %event.serial_number,
                "Duplicate event skipped at insert"
            );
            return Ok(RecordOutcome::Skipped(SkipReason::Duplicate(
                DuplicateMatch::UniqueKey,
            )));
        };

        info!(
            terminal_id = %terminal_id,
            serial = %event.serial_number,
            entry_id,
            employee = %resolution.employee_name,
            direction = %direction,
            "Attendance event saved"
        );

        if let (Some(queue), Some(reference)) = (&self.archive, &event.image_path) {
            queue.submit(ArchiveJob {
                terminal_id,
                entry_id,
                employee_id: resolution.employee_id,
                serial_number: event.serial_number.to_string(),
                event_time: event.timestamp,
                reference: reference.clone(),
            });
        }

        Ok(RecordOutcome::Written {
            entry_id,
            employee_id: resolution.employee_id,
            direction,
        })
    }
}

/// Duplicate window probes for one event.
struct Probe<'a> {
    terminal_name: &'a str,
    organization_id: i64,
    direction: Direction,
    epoch_ms: i64,
    window_ms: i64,
}

impl Probe<'_> {
    async fn find(
        &self,
        conn: &mut SqliteConnection,
        event: &NormalizedEvent,
        resolution: &Resolution,
    ) -> StorageResult<Option<DuplicateMatch>> {
        let by_serial = transaction::find_serial_duplicate(
            conn,
            event.serial_number.as_str(),
            self.terminal_name,
            self.organization_id,
            self.epoch_ms,
            self.window_ms,
        )
        .await?;
        if by_serial.is_some() {
            return Ok(Some(DuplicateMatch::Serial));
        }

        if let Some(employee_id) = resolution.employee_id {
            let by_employee = transaction::find_employee_duplicate(
                conn,
                employee_id,
                self.terminal_name,
                self.organization_id,
                self.direction,
                self.epoch_ms,
                self.window_ms,
            )
            .await?;
            if by_employee.is_some() {
                return Ok(Some(DuplicateMatch::Employee));
            }
        }

        let by_name = transaction::find_name_duplicate(
            conn,
            &resolution.employee_name,
            self.terminal_name,
            self.organization_id,
            self.direction,
            self.epoch_ms,
            self.window_ms,
        )
        .await?;
        Ok(by_name.map(|_| DuplicateMatch::EmployeeName))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_helpers() {
        let written = RecordOutcome::Written {
            entry_id: 1,
            employee_id: None,
            direction: Direction::Entry,
        };
        assert!(written.is_written());
        assert_eq!(written.reason(), None);

        let duplicate = RecordOutcome::Skipped(SkipReason::Duplicate(DuplicateMatch::Serial));
        assert!(duplicate.is_duplicate());
        assert_eq!(duplicate.reason().unwrap().to_string(), "duplicate");

        let missing = RecordOutcome::Skipped(SkipReason::TerminalNotFound);
        assert!(!missing.is_duplicate());
        assert_eq!(missing.reason().unwrap().to_string(), "terminal_not_found");
    }
}
