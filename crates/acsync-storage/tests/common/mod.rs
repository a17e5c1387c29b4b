//! Shared fixtures for storage integration tests.

#![allow(dead_code)]

use acsync_core::{Direction, NormalizedEvent, SerialNumber, VerificationMethod};
use acsync_storage::connection::Database;
use acsync_storage::models::Terminal;
use acsync_storage::repositories::{SqliteTerminalRepository, TerminalRepository};
use chrono::{DateTime, Duration, TimeZone, Utc};

pub const ORG: i64 = 1;

/// 2024-05-01T08:00:00+05:00
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap()
}

pub async fn terminal(db: &Database, name: &str, role: Option<&str>, org: i64) -> Terminal {
    let mut terminal = Terminal {
        id: 0,
        name: name.to_string(),
        address: "203.0.113.20".to_string(),
        username: "admin".to_string(),
        password: "pw".to_string(),
        declared_role: role.map(str::to_string),
        organization_id: org,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let repo = SqliteTerminalRepository::new(db.pool().clone());
    terminal.id = repo.create(&terminal).await.unwrap();
    terminal
}

/// Insert an employee with an explicit id and a linked account with an explicit id.
pub async fn employee_with_account(
    db: &Database,
    employee_id: i64,
    account_id: i64,
    name: &str,
    org: i64,
) {
    sqlx::query("INSERT INTO accounts (id, username, organization_id) VALUES (?, ?, ?)")
        .bind(account_id)
        .bind(format!("user{account_id}"))
        .bind(org)
        .execute(db.pool())
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO employees (id, account_id, full_name, organization_id) VALUES (?, ?, ?, ?)",
    )
    .bind(employee_id)
    .bind(account_id)
    .bind(name)
    .bind(org)
    .execute(db.pool())
    .await
    .unwrap();
}

pub fn event(serial: &str, subject: Option<&str>, offset_ms: i64, direction: Direction) -> NormalizedEvent {
    NormalizedEvent {
        serial_number: SerialNumber::new(serial).unwrap(),
        subject_identifier: subject.map(str::to_string),
        timestamp: base_time() + Duration::milliseconds(offset_ms),
        direction,
        verification_method: VerificationMethod::Face,
        image_path: None,
    }
}

pub async fn row_count(db: &Database) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM attendance_logs")
        .fetch_one(db.pool())
        .await
        .unwrap()
}
