//! Shared fixtures for sync integration tests.

#![allow(dead_code)]

#[path = "../../../acsync-network/tests/common/mod.rs"]
pub mod device;

use acsync_network::ReconnectPolicy;
use acsync_storage::Database;
use acsync_storage::models::Terminal;
use acsync_storage::repositories::{SqliteTerminalRepository, TerminalRepository};
use acsync_sync::SyncConfig;
use chrono::Utc;
use device::MockResponse;
use serde_json::{Value, json};
use std::time::{Duration, Instant};

pub const ORG: i64 = 1;
pub const SEARCH_JSON: &str = "/ISAPI/AccessControl/AcsEvent?format=json";
pub const ALERT_STREAM: &str = "/ISAPI/Event/notification/alertStream";
pub const DEVICE_INFO: &str = "/ISAPI/System/deviceInfo?format=json";
pub const USER_SEARCH: &str = "/ISAPI/AccessControl/UserInfo/Search?format=json";

/// Fast timings for tests against a loopback mock.
pub fn config() -> SyncConfig {
    SyncConfig {
        request_timeout: Duration::from_secs(5),
        page_delay: Duration::from_millis(1),
        initial_poll_delay: Duration::from_millis(10),
        polling_interval: Duration::from_millis(100),
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(10),
            max_attempts: 2,
        },
        sync_private_addresses: true,
        ..SyncConfig::default()
    }
}

pub async fn terminal(db: &Database, address: &str, role: Option<&str>, active: bool) -> Terminal {
    let mut terminal = Terminal {
        id: 0,
        name: "Lobby".to_string(),
        address: address.to_string(),
        username: device::USERNAME.to_string(),
        password: device::PASSWORD.to_string(),
        declared_role: role.map(str::to_string),
        organization_id: ORG,
        is_active: active,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    terminal.id = SqliteTerminalRepository::new(db.pool().clone())
        .create(&terminal)
        .await
        .unwrap();
    terminal
}

/// Employee `id` with a linked account of the same id.
pub async fn employee(db: &Database, id: i64, name: &str) {
    sqlx::query("INSERT INTO accounts (id, username, organization_id) VALUES (?, ?, ?)")
        .bind(id)
        .bind(format!("user{id}"))
        .bind(ORG)
        .execute(db.pool())
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO employees (id, account_id, full_name, organization_id) VALUES (?, ?, ?, ?)",
    )
    .bind(id)
    .bind(id)
    .bind(name)
    .bind(ORG)
    .execute(db.pool())
    .await
    .unwrap();
}

pub fn record(serial: u64, subject: &str, time: &str) -> Value {
    json!({"serialNo": serial, "employeeNoString": subject, "time": time})
}

/// Final JSON search page holding `records`.
pub fn search_page(records: Vec<Value>) -> MockResponse {
    MockResponse::json(json!({"AcsEvent": {
        "responseStatusStrg": "OK",
        "numOfMatches": records.len(),
        "InfoList": records,
    }}))
}

/// Minor code a JSON search request asks for.
pub fn requested_minor(request: &device::MockRequest) -> i64 {
    request.body_json()["AcsEventCond"]["minor"]
        .as_i64()
        .unwrap_or_default()
}

pub fn stream_event(serial: u64, minor: i64, subject: &str) -> String {
    format!(
        "--MIME_boundary\r\nContent-Type: application/json\r\n\r\n{}\r\n",
        json!({
            "eventType": "AccessControllerEvent",
            "dateTime": "2024-05-01T08:00:00+05:00",
            "AccessControllerEvent": {
                "majorEventType": 5,
                "subEventType": minor,
                "serialNo": serial,
                "employeeNoString": subject,
            }
        })
    )
}

pub async fn row_count(db: &Database) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM attendance_logs")
        .fetch_one(db.pool())
        .await
        .unwrap()
}

/// Wait until the ledger holds at least `rows` rows.
pub async fn wait_for_rows(db: &Database, rows: i64, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if row_count(db).await >= rows {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
