//! Vendor and synchronization constants.
//!
//! The access-control terminals speak the ISAPI dialect: event records are
//! classified by a `major` category and a `minor` sub-code, and every
//! endpoint lives under a fixed path. Everything the protocol, network,
//! storage and sync crates agree on is collected here.
//!
//! # Event classification
//!
//! | major | minor | Meaning                               |
//! |-------|-------|---------------------------------------|
//! | 5     | 75    | Access granted, subject entered       |
//! | 5     | 76    | Access granted, subject exited        |
//!
//! Other major categories (alarms, exceptions, operations) are ignored.

use std::time::Duration;

// ===== Event Classification =====

/// Major category for access-control events.
pub const MAJOR_ACCESS_CONTROL: i64 = 5;

/// Minor code reported for an entry passage.
pub const MINOR_ENTRY: i64 = 75;

/// Minor code reported for an exit passage.
pub const MINOR_EXIT: i64 = 76;

/// Minor codes queried by the JSON search variant, one pagination loop each.
pub const SEARCH_MINOR_CODES: [i64; 2] = [MINOR_ENTRY, MINOR_EXIT];

/// Local hour from which the time-of-day fallback reports an exit.
///
/// Last-resort heuristic only, used when no vendor signal decides direction.
pub const EXIT_FALLBACK_HOUR: u32 = 14;

/// Organization UTC offset assumed for device timestamps without one (+05:00).
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 5 * 3600;

// ===== ISAPI Endpoints =====

/// Historical event search (XML envelope).
pub const PATH_EVENT_SEARCH: &str = "/ISAPI/AccessControl/AcsEvent";

/// Historical event search (JSON envelope).
pub const PATH_EVENT_SEARCH_JSON: &str = "/ISAPI/AccessControl/AcsEvent?format=json";

/// Long-lived event notification stream.
pub const PATH_ALERT_STREAM: &str = "/ISAPI/Event/notification/alertStream";

/// Device identity and firmware information.
pub const PATH_DEVICE_INFO: &str = "/ISAPI/System/deviceInfo?format=json";

/// Enrolled user search (JSON envelope).
pub const PATH_USER_SEARCH: &str = "/ISAPI/AccessControl/UserInfo/Search?format=json";

/// XML namespace of ISAPI request envelopes.
pub const ISAPI_XML_NAMESPACE: &str = "http://www.isapi.org/ver20/XMLSchema";

/// Status string a search response carries while more pages remain.
pub const SEARCH_STATUS_MORE: &str = "MORE";

// ===== Authentication =====

/// Nonce count sent with every digest response (one request per nonce).
pub const DIGEST_NONCE_COUNT: &str = "00000001";

/// Number of hex characters in a client nonce.
pub const DIGEST_CNONCE_LEN: usize = 16;

// ===== Synchronization Defaults =====

/// Lookback of the startup backfill.
pub const DEFAULT_INITIAL_SYNC_DAYS: i64 = 30;

/// Interval between scheduled incremental polls.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(30);

/// Delay before the one-shot startup poll.
pub const DEFAULT_INITIAL_POLL_DELAY: Duration = Duration::from_secs(5);

/// Minimum window covered by an incremental poll.
pub const DEFAULT_INCREMENTAL_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Per-request timeout for search, image and info requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle read timeout on the live stream.
pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Consecutive stream failures tolerated before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base of the attempt-scaled reconnect delay.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Records requested per search page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Hard cap on pages fetched by one pagination loop.
pub const DEFAULT_MAX_SEARCH_PAGES: u32 = 100;

/// Cap on records collected by one incremental poll.
pub const DEFAULT_MAX_POLL_RESULTS: u32 = 5000;

/// Pause between consecutive search pages.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(100);

// ===== Ledger =====

/// Two events closer than this (inclusive) on the same key are duplicates.
pub const DUPLICATE_WINDOW_MS: i64 = 1000;

/// Captured images retained per employee.
pub const IMAGE_RETENTION_PER_EMPLOYEE: usize = 10;

/// Display name used when an event carries no subject identifier at all.
pub const UNKNOWN_SUBJECT_NAME: &str = "Unknown";

/// Directory captured face images are written to.
pub const DEFAULT_IMAGE_DIR: &str = "uploads/faces";

/// Public path prefix stored in the ledger for archived images.
pub const DEFAULT_IMAGE_PUBLIC_PREFIX: &str = "/uploads/faces";
