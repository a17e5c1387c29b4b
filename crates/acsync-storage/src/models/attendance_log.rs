use acsync_core::{Direction, VerificationMethod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ledger row: one recorded passage through a terminal.
///
/// Rows are append-only. The only updates are clearing `employee_id` when
/// an employee is removed (done by the foreign key) and clearing
/// `image_path` when retention evicts the picture.
///
/// # Database Schema
///
/// Maps to `attendance_logs`:
/// - `UNIQUE (serial_number, terminal_name, organization_id)` is the
///   backstop against concurrent writers recording the same event
/// - `event_epoch_ms` mirrors `event_time` for duplicate windows
/// - `organization_id` is always the terminal's organization
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttendanceLogEntry {
    pub id: i64,
    pub employee_id: Option<i64>,
    pub employee_name: String,
    pub terminal_name: String,
    pub event_time: DateTime<Utc>,
    pub event_epoch_ms: i64,
    /// `entry` or `exit`
    pub direction: String,
    pub verification_method: String,
    pub serial_number: String,
    /// Public path of the archived picture, or the device reference when
    /// the download failed
    pub image_path: Option<String>,
    pub organization_id: i64,
    pub created_at: DateTime<Utc>,
}

impl AttendanceLogEntry {
    /// Parsed direction.
    ///
    /// # Errors
    /// Returns an error if the stored value is not `entry` or `exit`.
    pub fn get_direction(&self) -> acsync_core::Result<Direction> {
        self.direction.parse()
    }

    pub fn get_verification_method(&self) -> VerificationMethod {
        self.verification_method.parse().unwrap_or_default()
    }
}

/// Values of a ledger row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewAttendanceLogEntry<'a> {
    pub employee_id: Option<i64>,
    pub employee_name: &'a str,
    pub terminal_name: &'a str,
    pub event_time: DateTime<Utc>,
    pub direction: Direction,
    pub verification_method: VerificationMethod,
    pub serial_number: &'a str,
    pub image_path: Option<&'a str>,
    pub organization_id: i64,
}
