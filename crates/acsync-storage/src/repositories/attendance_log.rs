#![allow(async_fn_in_trait)]

use crate::error::StorageResult;
use crate::models::AttendanceLogEntry;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Read and maintenance access to the attendance ledger.
///
/// Inserts go through [`AttendanceLedgerWriter`](crate::AttendanceLedgerWriter)
/// only, so that every row passes duplicate suppression.
pub trait AttendanceLogRepository: Send + Sync {
    /// Find a ledger row by ID
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<AttendanceLogEntry>>;

    /// Rows recorded for one terminal, newest first
    async fn find_by_terminal(
        &self,
        terminal_name: &str,
        organization_id: i64,
        limit: i64,
    ) -> StorageResult<Vec<AttendanceLogEntry>>;

    /// Rows of one employee, newest first
    async fn find_by_employee(
        &self,
        employee_id: i64,
        limit: i64,
    ) -> StorageResult<Vec<AttendanceLogEntry>>;

    /// Number of rows for a serial on one terminal
    async fn count_by_serial(
        &self,
        serial_number: &str,
        terminal_name: &str,
        organization_id: i64,
    ) -> StorageResult<i64>;

    /// Highest purely numeric serial stored for a terminal
    async fn max_numeric_serial(
        &self,
        terminal_name: &str,
        organization_id: i64,
    ) -> StorageResult<Option<i64>>;

    /// Event time of the newest row for a terminal
    async fn latest_event_time(
        &self,
        terminal_name: &str,
        organization_id: i64,
    ) -> StorageResult<Option<DateTime<Utc>>>;

    /// `(id, image_path)` of an employee's rows whose picture lives under
    /// `public_prefix`, newest first
    async fn find_archived_images(
        &self,
        employee_id: i64,
        public_prefix: &str,
    ) -> StorageResult<Vec<(i64, String)>>;

    /// Replace or clear a row's picture reference
    async fn set_image_path(&self, id: i64, image_path: Option<&str>) -> StorageResult<()>;
}

/// SQLite implementation of AttendanceLogRepository
#[derive(Debug, Clone)]
pub struct SqliteAttendanceLogRepository {
    pool: SqlitePool,
}

impl SqliteAttendanceLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl AttendanceLogRepository for SqliteAttendanceLogRepository {
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<AttendanceLogEntry>> {
        let entry = sqlx::query_as::<_, AttendanceLogEntry>(
            r#"
            SELECT id, employee_id, employee_name, terminal_name, event_time,
                   event_epoch_ms, direction, verification_method, serial_number,
                   image_path, organization_id, created_at
            FROM attendance_logs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn find_by_terminal(
        &self,
        terminal_name: &str,
        organization_id: i64,
        limit: i64,
    ) -> StorageResult<Vec<AttendanceLogEntry>> {
        let entries = sqlx::query_as::<_, AttendanceLogEntry>(
            r#"
            SELECT id, employee_id, employee_name, terminal_name, event_time,
                   event_epoch_ms, direction, verification_method, serial_number,
                   image_path, organization_id, created_at
            FROM attendance_logs
            WHERE terminal_name = ? AND organization_id = ?
            ORDER BY event_epoch_ms DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(terminal_name)
        .bind(organization_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn find_by_employee(
        &self,
        employee_id: i64,
        limit: i64,
    ) -> StorageResult<Vec<AttendanceLogEntry>> {
        let entries = sqlx::query_as::<_, AttendanceLogEntry>(
            r#"
            SELECT id, employee_id, employee_name, terminal_name, event_time,
                   event_epoch_ms, direction, verification_method, serial_number,
                   image_path, organization_id, created_at
            FROM attendance_logs
            WHERE employee_id = ?
            ORDER BY event_epoch_ms DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(employee_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn count_by_serial(
        &self,
        serial_number: &str,
        terminal_name: &str,
        organization_id: i64,
    ) -> StorageResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM attendance_logs
            WHERE serial_number = ? AND terminal_name = ? AND organization_id = ?
            "#,
        )
        .bind(serial_number)
        .bind(terminal_name)
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn max_numeric_serial(
        &self,
        terminal_name: &str,
        organization_id: i64,
    ) -> StorageResult<Option<i64>> {
        // Synthesized serials contain a dash and are skipped by the GLOB.
        let max: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(CAST(serial_number AS INTEGER))
            FROM attendance_logs
            WHERE terminal_name = ? AND organization_id = ?
              AND serial_number <> ''
              AND serial_number NOT GLOB '*[^0-9]*'
            "#,
        )
        .bind(terminal_name)
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(max)
    }

    async fn latest_event_time(
        &self,
        terminal_name: &str,
        organization_id: i64,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let millis: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(event_epoch_ms) FROM attendance_logs
            WHERE terminal_name = ? AND organization_id = ?
            "#,
        )
        .bind(terminal_name)
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(millis.and_then(DateTime::from_timestamp_millis))
    }

    async fn find_archived_images(
        &self,
        employee_id: i64,
        public_prefix: &str,
    ) -> StorageResult<Vec<(i64, String)>> {
        let pattern = format!("{}/%", public_prefix.trim_end_matches('/'));
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT id, image_path FROM attendance_logs
            WHERE employee_id = ?
              AND image_path IS NOT NULL
              AND image_path LIKE ?
            ORDER BY event_epoch_ms DESC, id DESC
            "#,
        )
        .bind(employee_id)
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn set_image_path(&self, id: i64, image_path: Option<&str>) -> StorageResult<()> {
        sqlx::query("UPDATE attendance_logs SET image_path = ? WHERE id = ?")
            .bind(image_path)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
