//! Integration tests for DeviceProtocolClient
//!
//! These tests run the client against a mock terminal on a loopback socket
//! and exercise real HTTP I/O: digest retry, lockout suppression, paginated
//! searches, picture downloads and the reconnecting alert stream.

mod common;

use acsync_network::{
    DeviceClientConfig, DeviceError, DeviceProtocolClient, ReconnectPolicy, SearchQuery,
    SearchVariant, StreamNotification,
};
use common::{MockDevice, MockResponse};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn client_for(address: &str) -> DeviceProtocolClient {
    let mut config = DeviceClientConfig::new(address, common::credentials());
    config.request_timeout = Duration::from_secs(5);
    config.page_delay = Duration::from_millis(1);
    DeviceProtocolClient::new(config).unwrap()
}

fn query() -> SearchQuery {
    SearchQuery {
        window: None,
        max_results: u32::MAX,
    }
}

fn json_record(serial: u64) -> serde_json::Value {
    json!({"serialNo": serial, "employeeNoString": "7", "time": "2024-05-01T08:00:00+05:00"})
}

const LOCKED_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<userCheck><statusValue>401</statusValue><lockStatus>lock</lockStatus><unlockTime>600</unlockTime></userCheck>"#;

/// Test that a digest challenge is answered once and the retry succeeds
#[tokio::test]
async fn test_digest_retry_succeeds() {
    let device = MockDevice::digest(|_| {
        MockResponse::json(json!({"DeviceInfo": {"deviceName": "Lobby", "model": "DS-K1T671"}}))
    })
    .await;
    let client = client_for(&device.address());

    let info = client.device_info().await.unwrap();

    assert_eq!(info.device_name.as_deref(), Some("Lobby"));
    assert_eq!(device.request_count(), 2);
    let requests = device.requests();
    assert!(requests[0].header("authorization").is_none());
    assert!(requests[1].header("authorization").unwrap().starts_with("Digest "));
}

/// Test that rejected credentials are reported after exactly one retry
#[tokio::test]
async fn test_wrong_password_is_unauthorized() {
    let device = MockDevice::digest(|_| MockResponse::new(200)).await;
    let mut config = DeviceClientConfig::new(device.address(), common::credentials());
    config.credentials.password = "wrong".to_string();
    let client = DeviceProtocolClient::new(config).unwrap();

    let result = client.device_info().await;

    assert!(matches!(result, Err(DeviceError::Unauthorized)));
    assert_eq!(device.request_count(), 2);
}

/// Test that a 401 without a challenge fails the request only
#[tokio::test]
async fn test_missing_challenge_is_auth_challenge_error() {
    let device = MockDevice::start(|_| MockResponse::new(401)).await;
    let client = client_for(&device.address());

    let result = client.device_info().await;

    assert!(matches!(result, Err(DeviceError::AuthChallenge(_))));
    assert_eq!(device.request_count(), 1);
}

/// Test that a lockout suppresses further requests until it elapses
#[tokio::test]
async fn test_lockout_suppresses_requests() {
    let device = MockDevice::start(|_| MockResponse::xml(401, LOCKED_BODY)).await;
    let client = client_for(&device.address());

    let first = client.device_info().await;
    match first {
        Err(DeviceError::AccountLocked { remaining }) => {
            assert_eq!(remaining, Duration::from_secs(600));
        }
        other => panic!("expected lockout, got {other:?}"),
    }
    assert_eq!(device.request_count(), 1);

    let second = client.search(SearchVariant::Json, query()).await;
    assert!(matches!(second, Err(DeviceError::AccountLocked { .. })));
    assert_eq!(device.request_count(), 1, "no request while locked");
    assert!(client.lockout_remaining().is_some());
}

/// Test that JSON search runs one loop per minor code and follows MORE
#[tokio::test]
async fn test_json_search_merges_minor_code_loops() {
    let device = MockDevice::digest(|request| {
        let cond = &request.body_json()["AcsEventCond"];
        let minor = cond["minor"].as_i64().unwrap_or_default();
        let position = cond["searchResultPosition"].as_u64().unwrap_or_default();
        match (minor, position) {
            (75, 0) => MockResponse::json(json!({"AcsEvent": {
                "searchID": cond["searchID"], "responseStatusStrg": "MORE", "totalMatches": 3,
                "InfoList": [json_record(1), json_record(2)]}})),
            (75, 2) => MockResponse::json(json!({"AcsEvent": {
                "responseStatusStrg": "OK", "totalMatches": 3, "InfoList": [json_record(3)]}})),
            (76, 0) => MockResponse::json(json!({"AcsEvent": {
                "responseStatusStrg": "OK", "InfoList": [json_record(10)]}})),
            _ => MockResponse::json(json!({"AcsEvent": {"responseStatusStrg": "NO MATCH"}})),
        }
    })
    .await;
    let client = client_for(&device.address());

    let events = client.search_variant(SearchVariant::Json, query()).await.unwrap();

    assert_eq!(events.len(), 4);
    let minors: Vec<_> = events.iter().map(|e| e.integer(&["minor"])).collect();
    assert_eq!(minors, vec![Some(75), Some(75), Some(75), Some(76)]);
    assert!(events.iter().all(|e| e.integer(&["major"]) == Some(5)));
}

/// Test that a device reporting MORE forever is bounded by the page cap
#[tokio::test]
async fn test_pagination_is_capped() {
    let device = MockDevice::digest(|_| {
        MockResponse::json(json!({"AcsEvent": {
            "responseStatusStrg": "MORE", "InfoList": [json_record(1)]}}))
    })
    .await;
    let mut config = DeviceClientConfig::new(device.address(), common::credentials());
    config.max_search_pages = 3;
    config.page_delay = Duration::from_millis(1);
    let client = DeviceProtocolClient::new(config).unwrap();

    let events = client.search_variant(SearchVariant::Json, query()).await.unwrap();

    // Three pages for each of the two minor codes.
    assert_eq!(events.len(), 6);
}

/// Test that the result cap shrinks the last page request
#[tokio::test]
async fn test_max_results_limits_page_size() {
    let device = MockDevice::digest(|request| {
        let cond = &request.body_json()["AcsEventCond"];
        let count = cond["maxResults"].as_u64().unwrap_or_default();
        let records: Vec<_> = (0..count).map(json_record).collect();
        MockResponse::json(json!({"AcsEvent": {"responseStatusStrg": "MORE", "InfoList": records}}))
    })
    .await;
    let client = client_for(&device.address());

    let events = client
        .search_variant(SearchVariant::Json, query().with_max_results(150))
        .await
        .unwrap();

    // 100 + 50 per minor code.
    assert_eq!(events.len(), 300);
}

/// Test that a failing JSON endpoint falls back to the XML variant
#[tokio::test]
async fn test_json_failure_falls_back_to_xml() {
    let device = MockDevice::digest(|request| {
        if request.target.contains("format=json") {
            MockResponse::xml(
                400,
                "<ResponseStatus><statusCode>4</statusCode><statusString>Invalid Operation</statusString><subStatusCode>notSupport</subStatusCode></ResponseStatus>",
            )
        } else {
            assert!(request.body_text().contains("<major>5</major>"));
            MockResponse::xml(
                200,
                r#"<AcsEvent><responseStatusStrg>OK</responseStatusStrg><InfoList>
<Info><serialNo>42</serialNo><major>5</major><minor>75</minor></Info>
</InfoList></AcsEvent>"#,
            )
        }
    })
    .await;
    let client = client_for(&device.address());

    let events = client.search(SearchVariant::Json, query()).await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].text(&["serialNo"]), Some("42".to_string()));
}

/// Test that transport failures do not trigger variant fallback
#[tokio::test]
async fn test_transport_failure_does_not_fall_back() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    let client = client_for(&address);

    let result = client.search(SearchVariant::Json, query()).await;

    assert!(result.unwrap_err().is_transport());
}

/// Test that client-side serial filtering keeps only newer records
#[tokio::test]
async fn test_search_newer_than_filters_serials() {
    let device = MockDevice::digest(|request| {
        let minor = request.body_json()["AcsEventCond"]["minor"].as_i64().unwrap_or_default();
        let records = if minor == 75 {
            vec![json_record(8), json_record(9), json_record(12)]
        } else {
            vec![json_record(10), json!({"serialNo": "", "employeeNoString": "3"})]
        };
        MockResponse::json(json!({"AcsEvent": {"responseStatusStrg": "OK", "InfoList": records}}))
    })
    .await;
    let client = client_for(&device.address());

    let events = client
        .search_newer_than(SearchVariant::Json, query(), Some(9))
        .await
        .unwrap();

    let serials: Vec<_> = events.iter().map(|e| e.integer(&["serialNo"])).collect();
    assert_eq!(serials, vec![Some(12), Some(10), None]);
}

/// Test picture download and rejection of XML error payloads
#[tokio::test]
async fn test_fetch_image() {
    let device = MockDevice::digest(|request| match request.target.as_str() {
        "/LOCALS/pic/ok.jpeg" => MockResponse::new(200)
            .header("Content-Type", "image/jpeg")
            .body(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]),
        "/LOCALS/pic/xml.jpeg" => MockResponse::new(200)
            .header("Content-Type", "image/jpeg")
            .body(b"<?xml version=\"1.0\"?><ResponseStatus><statusString>No Picture</statusString></ResponseStatus>".to_vec()),
        "/LOCALS/pic/empty.jpeg" => MockResponse::new(200).header("Content-Type", "image/jpeg"),
        _ => MockResponse::new(404),
    })
    .await;
    let client = client_for(&device.address());
    let base = format!("http://{}", device.address());

    let bytes = client
        .fetch_image(&format!("{base}/LOCALS/pic/ok.jpeg@WEB000000000123"))
        .await
        .unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

    let xml = client.fetch_image("/LOCALS/pic/xml.jpeg").await;
    assert!(matches!(xml, Err(DeviceError::ImageRejected(ref m)) if m.contains("No Picture")));

    let empty = client.fetch_image("/LOCALS/pic/empty.jpeg").await;
    assert!(matches!(empty, Err(DeviceError::ImageRejected(_))));
}

/// Test that stream records are delivered and a device close is a failure
#[tokio::test]
async fn test_stream_delivers_records_then_reports_close() {
    let device = MockDevice::digest(|_| {
        MockResponse::new(200)
            .header("Content-Type", "multipart/mixed; boundary=MIME_boundary")
            .streamed(vec![
                "--MIME_boundary\r\nContent-Type: application/json\r\n\r\n",
                "{\n\t\"eventType\":\t\"AccessControllerEvent\",\n\t\"AccessControllerEvent\":\t{\n\t\t\"subEventType\":\t75,\n\t\t\"serialNo\":\t1\n\t}\n}\r\n",
                "--MIME_boundary\r\nContent-Type: application/xml\r\n\r\n<EventNotificationAlert/>\r\n",
                "--MIME_boundary\r\nContent-Type: application/json\r\n\r\n{\"eventType\":\"AccessControllerEvent\",\"AccessControllerEvent\":{\"subEventType\":76,\"serialNo\":2}}\r\n",
            ])
    })
    .await;
    let client = client_for(&device.address());
    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let policy = ReconnectPolicy {
        base_delay: Duration::from_secs(60),
        max_attempts: 5,
    };

    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move { client.run_event_stream(policy, tx, task_cancel).await });

    assert!(matches!(rx.recv().await, Some(StreamNotification::Connected)));
    let mut serials = Vec::new();
    for _ in 0..2 {
        match rx.recv().await {
            Some(StreamNotification::Event(raw)) => serials.push(raw.integer(&["serialNo"])),
            other => panic!("expected event, got {other:?}"),
        }
    }
    assert_eq!(serials, vec![Some(1), Some(2)]);
    assert!(matches!(rx.recv().await, Some(StreamNotification::Error(_))));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

/// Test that heartbeats and other event categories never reach the owner
#[tokio::test]
async fn test_stream_drops_heartbeats_and_other_categories() {
    let device = MockDevice::digest(|_| {
        MockResponse::new(200)
            .header("Content-Type", "multipart/mixed; boundary=MIME_boundary")
            .streamed(vec![
                "--MIME_boundary\r\nContent-Type: application/json\r\n\r\n{\"eventType\":\"heartBeat\",\"eventState\":\"active\"}\r\n",
                "--MIME_boundary\r\nContent-Type: application/json\r\n\r\n{\"eventType\":\"AccessControllerEvent\",\"AccessControllerEvent\":{\"majorEventType\":3,\"subEventType\":1024,\"serialNo\":9}}\r\n",
                "--MIME_boundary\r\nContent-Type: application/json\r\n\r\n{\"eventType\":\"AccessControllerEvent\",\"AccessControllerEvent\":{\"majorEventType\":5,\"subEventType\":75,\"serialNo\":3}}\r\n",
            ])
    })
    .await;
    let client = client_for(&device.address());
    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let policy = ReconnectPolicy {
        base_delay: Duration::from_secs(60),
        max_attempts: 5,
    };

    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move { client.run_event_stream(policy, tx, task_cancel).await });

    assert!(matches!(rx.recv().await, Some(StreamNotification::Connected)));
    match rx.recv().await {
        Some(StreamNotification::Event(raw)) => assert_eq!(raw.integer(&["serialNo"]), Some(3)),
        other => panic!("expected the access event, got {other:?}"),
    }
    assert!(matches!(rx.recv().await, Some(StreamNotification::Error(_))));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

/// Test that five failures reconnect and the sixth gives up permanently
#[tokio::test]
async fn test_stream_gives_up_after_max_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = client_for(&address);
    let (tx, mut rx) = mpsc::channel(32);
    let policy = ReconnectPolicy {
        base_delay: Duration::from_millis(5),
        max_attempts: 5,
    };

    let task = tokio::spawn(async move {
        client
            .run_event_stream(policy, tx, CancellationToken::new())
            .await
    });

    let mut errors = 0;
    let failed_after = loop {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await.unwrap() {
            Some(StreamNotification::Error(e)) => {
                assert!(e.is_transport());
                errors += 1;
            }
            Some(StreamNotification::StreamFailed { attempts }) => break attempts,
            other => panic!("unexpected notification {other:?}"),
        }
    };

    assert_eq!(errors, 6);
    assert_eq!(failed_after, 6);
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(rx.recv().await.is_none(), "task dropped its sender");
}
