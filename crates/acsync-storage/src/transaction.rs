//! Ledger operations that run on a caller-owned connection.
//!
//! The writer records one event per transaction: terminal lookup, identity
//! resolution, duplicate probes and the insert all see the same snapshot.
//! These functions take `&mut SqliteConnection` so they can be called with
//! `&mut *tx` on an open transaction.
//!
//! ```no_run
//! use acsync_storage::{Database, transaction};
//!
//! # async fn example(db: Database) -> Result<(), Box<dyn std::error::Error>> {
//! let mut tx = db.pool().begin().await?;
//! if let Some(terminal) = transaction::find_terminal(&mut tx, 1).await? {
//!     let employee_id = transaction::create_placeholder_employee(
//!         &mut tx, terminal.organization_id, "device-1-42", "Jane Roe",
//!     ).await?;
//!     transaction::upsert_mapping(&mut tx, employee_id, terminal.id, "42", terminal.organization_id).await?;
//! }
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::StorageResult;
use crate::models::{NewAttendanceLogEntry, Terminal};
use acsync_core::Direction;
use sqlx::SqliteConnection;

/// Load a terminal inside the transaction
pub async fn find_terminal(
    conn: &mut SqliteConnection,
    terminal_id: i64,
) -> StorageResult<Option<Terminal>> {
    let terminal = sqlx::query_as::<_, Terminal>(
        r#"
        SELECT id, name, address, username, password, declared_role,
               organization_id, is_active, created_at, updated_at
        FROM terminals
        WHERE id = ?
        "#,
    )
    .bind(terminal_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(terminal)
}

/// Row with the same serial on the same terminal within `window_ms`
pub async fn find_serial_duplicate(
    conn: &mut SqliteConnection,
    serial_number: &str,
    terminal_name: &str,
    organization_id: i64,
    epoch_ms: i64,
    window_ms: i64,
) -> StorageResult<Option<i64>> {
    let id = sqlx::query_scalar(
        r#"
        SELECT id FROM attendance_logs
        WHERE serial_number = ? AND terminal_name = ? AND organization_id = ?
          AND ABS(event_epoch_ms - ?) <= ?
        LIMIT 1
        "#,
    )
    .bind(serial_number)
    .bind(terminal_name)
    .bind(organization_id)
    .bind(epoch_ms)
    .bind(window_ms)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(id)
}

/// Row for the same employee, terminal and direction within `window_ms`
pub async fn find_employee_duplicate(
    conn: &mut SqliteConnection,
    employee_id: i64,
    terminal_name: &str,
    organization_id: i64,
    direction: Direction,
    epoch_ms: i64,
    window_ms: i64,
) -> StorageResult<Option<i64>> {
    let id = sqlx::query_scalar(
        r#"
        SELECT id FROM attendance_logs
        WHERE employee_id = ? AND terminal_name = ? AND organization_id = ?
          AND direction = ?
          AND ABS(event_epoch_ms - ?) <= ?
        LIMIT 1
        "#,
    )
    .bind(employee_id)
    .bind(terminal_name)
    .bind(organization_id)
    .bind(direction.as_str())
    .bind(epoch_ms)
    .bind(window_ms)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(id)
}

/// Row for the same displayed name, terminal and direction within `window_ms`
pub async fn find_name_duplicate(
    conn: &mut SqliteConnection,
    employee_name: &str,
    terminal_name: &str,
    organization_id: i64,
    direction: Direction,
    epoch_ms: i64,
    window_ms: i64,
) -> StorageResult<Option<i64>> {
    let id = sqlx::query_scalar(
        r#"
        SELECT id FROM attendance_logs
        WHERE employee_name = ? AND terminal_name = ? AND organization_id = ?
          AND direction = ?
          AND ABS(event_epoch_ms - ?) <= ?
        LIMIT 1
        "#,
    )
    .bind(employee_name)
    .bind(terminal_name)
    .bind(organization_id)
    .bind(direction.as_str())
    .bind(epoch_ms)
    .bind(window_ms)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(id)
}

/// Insert a ledger row unless its `(serial, terminal, organization)` key exists.
///
/// Returns the new row ID, or `None` when the key was already taken.
pub async fn insert_entry(
    conn: &mut SqliteConnection,
    entry: &NewAttendanceLogEntry<'_>,
) -> StorageResult<Option<i64>> {
    let id = sqlx::query_scalar(
        r#"
        INSERT INTO attendance_logs (
            employee_id, employee_name, terminal_name, event_time, event_epoch_ms,
            direction, verification_method, serial_number, image_path, organization_id
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (serial_number, terminal_name, organization_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(entry.employee_id)
    .bind(entry.employee_name)
    .bind(entry.terminal_name)
    .bind(entry.event_time)
    .bind(entry.event_time.timestamp_millis())
    .bind(entry.direction.as_str())
    .bind(entry.verification_method.as_str())
    .bind(entry.serial_number)
    .bind(entry.image_path)
    .bind(entry.organization_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(id)
}

/// Point `(terminal, subject)` at `employee_id`, replacing a stale mapping
pub async fn upsert_mapping(
    conn: &mut SqliteConnection,
    employee_id: i64,
    terminal_id: i64,
    subject_identifier: &str,
    organization_id: i64,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO employee_terminal_mappings (
            employee_id, terminal_id, subject_identifier, organization_id
        )
        VALUES (?, ?, ?, ?)
        ON CONFLICT (terminal_id, subject_identifier)
        DO UPDATE SET employee_id = excluded.employee_id,
                      organization_id = excluded.organization_id
        "#,
    )
    .bind(employee_id)
    .bind(terminal_id)
    .bind(subject_identifier)
    .bind(organization_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Create an account plus employee for a device-origin subject.
///
/// Returns the employee ID.
pub async fn create_placeholder_employee(
    conn: &mut SqliteConnection,
    organization_id: i64,
    username: &str,
    full_name: &str,
) -> StorageResult<i64> {
    let account_id = sqlx::query("INSERT INTO accounts (username, organization_id) VALUES (?, ?)")
        .bind(username)
        .bind(organization_id)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    let employee_id = sqlx::query(
        "INSERT INTO employees (account_id, full_name, organization_id) VALUES (?, ?, ?)",
    )
    .bind(account_id)
    .bind(full_name)
    .bind(organization_id)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(employee_id)
}
