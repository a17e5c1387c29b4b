//! Integration tests for SyncManager
//!
//! Lifecycle, administrative operations and picture archival against a
//! mock terminal on loopback.

mod common;

use acsync_core::TerminalId;
use acsync_storage::{ArchiveConfig, Database};
use acsync_sync::{SyncConfig, SyncError, SyncManager, SyncState};
use chrono::{Duration as TimeDelta, Utc};
use common::device::{MockDevice, MockRequest, MockResponse};
use common::{record, requested_minor, search_page};
use serde_json::json;
use std::time::Duration;

fn entry_history(request: &MockRequest) -> MockResponse {
    match (request.target.as_str(), requested_minor(request)) {
        (common::SEARCH_JSON, 75) => search_page(vec![
            record(1, "7", "2024-05-01T08:00:00+05:00"),
            record(2, "7", "2024-05-01T12:00:00+05:00"),
        ]),
        (common::SEARCH_JSON, _) => search_page(vec![]),
        _ => MockResponse::new(404),
    }
}

/// Test that loopback terminals are left to pushed events by default
#[tokio::test]
async fn test_start_all_skips_private_terminals() {
    let device = MockDevice::digest(entry_history).await;
    let db = Database::in_memory().await.unwrap();
    common::terminal(&db, &device.address(), None, true).await;
    let config = SyncConfig {
        sync_private_addresses: false,
        ..common::config()
    };
    let manager = SyncManager::new(db.pool().clone(), config);

    let active = manager.start_all().await.unwrap();

    assert_eq!(active, 0);
    assert!(manager.is_running().await);
    assert!(manager.terminal_states().await.is_empty());

    manager.stop_all().await;
    assert!(!manager.is_running().await);
    assert_eq!(device.request_count(), 0);
}

/// Test the full start, sync and stop cycle with polling only
#[tokio::test]
async fn test_start_and_stop_all() {
    let device = MockDevice::digest(entry_history).await;
    let db = Database::in_memory().await.unwrap();
    let terminal = common::terminal(&db, &device.address(), Some("entry"), true).await;
    common::terminal(&db, "203.0.113.99", None, false).await;
    let config = SyncConfig {
        stream_enabled: false,
        ..common::config()
    };
    let manager = SyncManager::new(db.pool().clone(), config);

    let active = manager.start_all().await.unwrap();
    assert_eq!(active, 1, "inactive terminals are not synced");
    assert_eq!(manager.start_all().await.unwrap(), 1, "second start is a no-op");

    assert!(common::wait_for_rows(&db, 2, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        manager.terminal_states().await,
        vec![(terminal.terminal_id(), SyncState::Polling)]
    );

    manager.stop_all().await;
    assert!(!manager.is_running().await);
    assert!(manager.registry().is_empty().await);
    assert_eq!(common::row_count(&db).await, 2);

    // Stopping twice is harmless.
    manager.stop_all().await;
}

/// Test that manual sync reports and that repeat runs are duplicates only
#[tokio::test]
async fn test_manual_sync() {
    let device = MockDevice::digest(entry_history).await;
    let db = Database::in_memory().await.unwrap();
    common::employee(&db, 7, "Ann Lee").await;
    let terminal = common::terminal(&db, &device.address(), None, true).await;
    let manager = SyncManager::new(db.pool().clone(), common::config());

    let report = manager.manual_sync(terminal.terminal_id()).await.unwrap();
    assert_eq!(report.saved, 2);
    assert_eq!(report.entries, 2);

    let report = manager
        .manual_sync_historical(
            terminal.terminal_id(),
            Utc::now() - TimeDelta::days(1000),
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(report.total_found, 2);
    assert_eq!(report.duplicates, 2);
    assert_eq!(common::row_count(&db).await, 2);
}

/// Test that manual operations reject unknown and inactive terminals
#[tokio::test]
async fn test_manual_sync_rejects_unknown_and_inactive() {
    let db = Database::in_memory().await.unwrap();
    let inactive = common::terminal(&db, "203.0.113.50", None, false).await;
    let manager = SyncManager::new(db.pool().clone(), common::config());

    let unknown = manager.manual_sync(TerminalId::new(42)).await;
    assert!(matches!(unknown, Err(SyncError::TerminalNotFound(_))));

    let inactive = manager.manual_sync(inactive.terminal_id()).await;
    assert!(matches!(inactive, Err(SyncError::TerminalInactive(_))));
}

/// Test that manual operations leave private terminals to pushed events
#[tokio::test]
async fn test_manual_sync_rejects_private_terminal() {
    let device = MockDevice::digest(entry_history).await;
    let db = Database::in_memory().await.unwrap();
    let terminal = common::terminal(&db, &device.address(), None, true).await;
    let config = SyncConfig {
        sync_private_addresses: false,
        ..common::config()
    };
    let manager = SyncManager::new(db.pool().clone(), config);

    let latest = manager.manual_sync(terminal.terminal_id()).await;
    assert!(matches!(latest, Err(SyncError::TerminalNotRoutable(_))));

    let historical = manager
        .manual_sync_historical(
            terminal.terminal_id(),
            Utc::now() - TimeDelta::days(1000),
            Utc::now(),
        )
        .await;
    assert!(matches!(historical, Err(SyncError::TerminalNotRoutable(_))));

    assert_eq!(device.request_count(), 0);
    assert_eq!(common::row_count(&db).await, 0);

    // Connectivity tests still reach it and report the classification.
    let tested = manager.test_terminal(terminal.terminal_id()).await.unwrap();
    assert!(!tested.routable);
}

/// Test that manual sync archives captured pictures before returning
#[tokio::test]
async fn test_manual_sync_archives_pictures() {
    let device = MockDevice::digest(|request| match request.target.as_str() {
        common::SEARCH_JSON if requested_minor(request) == 75 => {
            search_page(vec![json!({
                "serialNo": 5,
                "employeeNoString": "7",
                "time": "2024-05-01T08:00:00+05:00",
                "pictureURL": "http://203.0.113.10/LOCALS/pic/enrlFace/0/0000000005.jpg@WEB000000000005",
            })])
        }
        common::SEARCH_JSON => search_page(vec![]),
        "/LOCALS/pic/enrlFace/0/0000000005.jpg" => MockResponse::new(200)
            .header("Content-Type", "image/jpeg")
            .body(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]),
        _ => MockResponse::new(404),
    })
    .await;
    let db = Database::in_memory().await.unwrap();
    common::employee(&db, 7, "Ann Lee").await;
    let terminal = common::terminal(&db, &device.address(), None, true).await;
    let images = tempfile::tempdir().unwrap();
    let config = SyncConfig {
        archive: ArchiveConfig {
            directory: images.path().to_path_buf(),
            ..ArchiveConfig::default()
        },
        ..common::config()
    };
    let manager = SyncManager::new(db.pool().clone(), config);

    let report = manager.manual_sync(terminal.terminal_id()).await.unwrap();
    assert_eq!(report.saved, 1);

    let image_path: Option<String> =
        sqlx::query_scalar("SELECT image_path FROM attendance_logs WHERE serial_number = '5'")
            .fetch_one(db.pool())
            .await
            .unwrap();
    let image_path = image_path.unwrap();
    assert!(image_path.starts_with("/uploads/faces/face_"), "{image_path}");
    let file_name = image_path.rsplit('/').next().unwrap();
    assert!(images.path().join(file_name).exists());
}

/// Test the connectivity check on a live and a dead terminal
#[tokio::test]
async fn test_terminal_connectivity() {
    let device = MockDevice::digest(|request| {
        if request.target == common::DEVICE_INFO {
            MockResponse::json(json!({"DeviceInfo": {
                "deviceName": "Lobby", "model": "DS-K1T671MF", "firmwareVersion": "V3.2.30"
            }}))
        } else {
            MockResponse::new(404)
        }
    })
    .await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let db = Database::in_memory().await.unwrap();
    let live = common::terminal(&db, &device.address(), None, true).await;
    let dead = common::terminal(&db, &dead_address, None, true).await;
    let manager = SyncManager::new(db.pool().clone(), common::config());

    let ok = manager.test_terminal(live.terminal_id()).await.unwrap();
    assert!(ok.reachable);
    assert!(!ok.routable);
    assert_eq!(ok.device_info.unwrap().model.as_deref(), Some("DS-K1T671MF"));
    assert!(ok.error.is_none());

    let failed = manager.test_terminal(dead.terminal_id()).await.unwrap();
    assert!(!failed.reachable);
    assert!(failed.device_info.is_none());
    assert!(failed.error.is_some());
}

/// Test that enrolled users become placeholder employees with mappings
#[tokio::test]
async fn test_import_device_users() {
    let device = MockDevice::digest(|request| {
        if request.target == common::USER_SEARCH {
            MockResponse::json(json!({"UserInfoSearch": {
                "responseStatusStrg": "OK",
                "UserInfo": [
                    {"employeeNo": "7", "name": "Ann Lee"},
                    {"employeeNo": "501", "name": "Visitor One"},
                    {"employeeNo": "502"},
                    {"employeeNo": "  "}
                ]
            }}))
        } else {
            MockResponse::new(404)
        }
    })
    .await;
    let db = Database::in_memory().await.unwrap();
    common::employee(&db, 7, "Ann Lee").await;
    let terminal = common::terminal(&db, &device.address(), None, true).await;
    let manager = SyncManager::new(db.pool().clone(), common::config());

    let report = manager.import_device_users(terminal.terminal_id()).await.unwrap();
    assert_eq!(report.found, 4);
    assert_eq!(report.existing, 1);
    assert_eq!(report.created, 2);
    assert_eq!(report.skipped, 1);

    let placeholder: (String, String) = sqlx::query_as(
        r#"
        SELECT a.username, e.full_name
        FROM employee_terminal_mappings m
        JOIN employees e ON e.id = m.employee_id
        JOIN accounts a ON a.id = e.account_id
        WHERE m.terminal_id = ? AND m.subject_identifier = '501'
        "#,
    )
    .bind(terminal.id)
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(
        placeholder,
        (format!("device-{}-501", terminal.id), "Visitor One".to_string())
    );

    let again = manager.import_device_users(terminal.terminal_id()).await.unwrap();
    assert_eq!(again.existing, 3);
    assert_eq!(again.created, 0);
}
