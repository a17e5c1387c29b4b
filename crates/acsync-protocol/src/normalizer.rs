//! Raw device record to canonical event.
//!
//! Normalization is a pure function of the record, the organization's UTC
//! offset and the time the record was received. Every heuristic is an
//! ordered chain of guards, each one a small function that either decides
//! or passes to the next:
//!
//! ```text
//! direction:     minor code ─> direction field ─> type field ─> time of day
//! verification:  verify-mode fields ─> side evidence ─> unknown
//! subject:       employeeNoString ─> cardNo ─> employeeNo ─> none
//! timestamp:     time ─> timeLocal ─> dateTime ─> receipt time
//! ```
//!
//! The time-of-day rule (before 14:00 local means entry) is a last-resort
//! heuristic and only applies when the record carries no direction signal.

use crate::raw::RawDeviceEvent;
use acsync_core::constants::{EXIT_FALLBACK_HOUR, MAJOR_ACCESS_CONTROL, MINOR_ENTRY, MINOR_EXIT};
use acsync_core::{Direction, NormalizedEvent, SerialNumber, VerificationMethod, default_utc_offset};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Timelike, Utc};
use serde_json::Value;

const MAJOR_FIELDS: [&str; 3] = ["major", "Major", "majorEventType"];
const MINOR_FIELDS: [&str; 3] = ["minor", "Minor", "subEventType"];
const DIRECTION_FIELDS: [&str; 1] = ["direction"];
const TYPE_FIELDS: [&str; 2] = ["type", "attendanceStatus"];
const EVENT_TYPE_FIELDS: [&str; 1] = ["eventType"];
const SUBJECT_FIELDS: [&str; 3] = ["employeeNoString", "cardNo", "employeeNo"];
const TIME_FIELDS: [&str; 3] = ["time", "timeLocal", "dateTime"];
const SERIAL_FIELDS: [&str; 2] = ["serialNo", "serialNumber"];
const PICTURE_FIELDS: [&str; 3] = ["pictureURL", "pictureUrl", "picture_url"];
const CARD_FIELDS: [&str; 1] = ["cardNo"];
const FACE_LIBRARY_FIELDS: [&str; 1] = ["faceLibType"];
const VERIFY_FIELDS: [&str; 6] = [
    "verifyMode",
    "currentVerifyMode",
    "cardReaderKind",
    "verifyModeDesc",
    "verifyType",
    "verificationMode",
];

/// Stream notification type carrying access events.
const ACCESS_EVENT_TYPE: &str = "AccessControllerEvent";

/// Keywords recognized in textual verify modes, per method.
const VERIFY_KEYWORDS: [(VerificationMethod, &[&str]); 4] = [
    (VerificationMethod::Face, &["face"]),
    (VerificationMethod::Card, &["card", "rfid", "nfc"]),
    (VerificationMethod::Fingerprint, &["finger", "fp"]),
    (VerificationMethod::Password, &["password", "pwd"]),
];

/// Rule that decided an event's direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionRule {
    MinorCode,
    DirectionField,
    TypeField,
    TimeOfDay,
}

type DirectionGuard = fn(&RawDeviceEvent) -> Option<Direction>;

const DIRECTION_GUARDS: [(DirectionRule, DirectionGuard); 3] = [
    (DirectionRule::MinorCode, direction_by_minor_code),
    (DirectionRule::DirectionField, direction_by_field),
    (DirectionRule::TypeField, direction_by_type),
];

/// Converts raw device records into [`NormalizedEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventNormalizer {
    utc_offset: FixedOffset,
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self::new(default_utc_offset())
    }
}

impl EventNormalizer {
    /// Create a normalizer assuming `utc_offset` for timestamps without one.
    #[must_use]
    pub fn new(utc_offset: FixedOffset) -> Self {
        Self { utc_offset }
    }

    #[must_use]
    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    /// Normalize one record.
    ///
    /// Returns `None` for records outside the access-control category.
    /// `received_at` stands in for a missing or unreadable timestamp.
    #[must_use]
    pub fn normalize(
        &self,
        raw: &RawDeviceEvent,
        received_at: DateTime<Utc>,
    ) -> Option<NormalizedEvent> {
        if !is_access_event(raw) {
            return None;
        }

        let timestamp = raw
            .text(&TIME_FIELDS)
            .and_then(|text| parse_timestamp(&text, self.utc_offset))
            .unwrap_or(received_at);
        let subject_identifier = subject_identifier(raw);
        let serial_number = serial_number(raw, timestamp, subject_identifier.as_deref())?;
        let (direction, _) = self.direction(raw, timestamp);

        Some(NormalizedEvent {
            serial_number,
            subject_identifier,
            timestamp,
            direction,
            verification_method: verification_method(raw),
            image_path: raw.text(&PICTURE_FIELDS),
        })
    }

    /// Decide the direction and report which rule decided it.
    #[must_use]
    pub fn direction(
        &self,
        raw: &RawDeviceEvent,
        timestamp: DateTime<Utc>,
    ) -> (Direction, DirectionRule) {
        DIRECTION_GUARDS
            .iter()
            .find_map(|(rule, guard)| guard(raw).map(|d| (d, *rule)))
            .unwrap_or_else(|| (self.direction_by_time_of_day(timestamp), DirectionRule::TimeOfDay))
    }

    fn direction_by_time_of_day(&self, timestamp: DateTime<Utc>) -> Direction {
        if timestamp.with_timezone(&self.utc_offset).hour() < EXIT_FALLBACK_HOUR {
            Direction::Entry
        } else {
            Direction::Exit
        }
    }
}

/// Returns `true` if the record belongs to the access-control category.
///
/// Records without a major code qualify when they are access-controller
/// stream notifications or carry an entry/exit minor code.
#[must_use]
pub fn is_access_event(raw: &RawDeviceEvent) -> bool {
    match raw.integer(&MAJOR_FIELDS) {
        Some(major) => major == MAJOR_ACCESS_CONTROL,
        None => {
            raw.text(&EVENT_TYPE_FIELDS)
                .is_some_and(|t| t.eq_ignore_ascii_case(ACCESS_EVENT_TYPE))
                || direction_by_minor_code(raw).is_some()
        }
    }
}

/// Device-local person identifier.
#[must_use]
pub fn subject_identifier(raw: &RawDeviceEvent) -> Option<String> {
    raw.text(&SUBJECT_FIELDS)
}

fn serial_number(
    raw: &RawDeviceEvent,
    timestamp: DateTime<Utc>,
    subject: Option<&str>,
) -> Option<SerialNumber> {
    raw.text(&SERIAL_FIELDS)
        .and_then(|s| SerialNumber::new(&s).ok())
        .or_else(|| {
            // Deterministic so that a redelivered record still collides.
            let synthesized = format!("{}-{}", timestamp.timestamp(), subject.unwrap_or("anonymous"));
            SerialNumber::new(&synthesized).ok()
        })
}

fn direction_by_minor_code(raw: &RawDeviceEvent) -> Option<Direction> {
    match raw.integer(&MINOR_FIELDS)? {
        MINOR_ENTRY => Some(Direction::Entry),
        MINOR_EXIT => Some(Direction::Exit),
        _ => None,
    }
}

fn direction_by_field(raw: &RawDeviceEvent) -> Option<Direction> {
    match raw.get(DIRECTION_FIELDS[0])? {
        Value::Number(n) => match n.as_i64()? {
            1 => Some(Direction::Entry),
            0 => Some(Direction::Exit),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "in" | "entry" | "enter" => Some(Direction::Entry),
            "0" | "out" | "exit" => Some(Direction::Exit),
            _ => None,
        },
        _ => None,
    }
}

fn direction_by_type(raw: &RawDeviceEvent) -> Option<Direction> {
    let text = raw.text(&TYPE_FIELDS)?.to_ascii_lowercase();
    match (text.contains("in"), text.contains("out")) {
        (true, false) => Some(Direction::Entry),
        (false, true) => Some(Direction::Exit),
        _ => None,
    }
}

/// Decide how the subject verified.
#[must_use]
pub fn verification_method(raw: &RawDeviceEvent) -> VerificationMethod {
    VERIFY_FIELDS
        .iter()
        .find_map(|field| match raw.get(field)? {
            Value::Number(n) => VerificationMethod::from_code(n.as_i64()?),
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(code) => VerificationMethod::from_code(code),
                Err(_) => verification_by_keyword(s),
            },
            _ => None,
        })
        .or_else(|| verification_by_side_evidence(raw))
        .unwrap_or_default()
}

fn verification_by_keyword(text: &str) -> Option<VerificationMethod> {
    let lower = text.to_ascii_lowercase();
    let matched: Vec<VerificationMethod> = VERIFY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(method, _)| *method)
        .collect();

    match matched.as_slice() {
        [] => None,
        [only] => Some(*only),
        _ => Some(VerificationMethod::Combined),
    }
}

fn verification_by_side_evidence(raw: &RawDeviceEvent) -> Option<VerificationMethod> {
    if raw.has_any(&CARD_FIELDS) {
        Some(VerificationMethod::Card)
    } else if raw.has_any(&FACE_LIBRARY_FIELDS) || raw.has_any(&PICTURE_FIELDS) {
        Some(VerificationMethod::Face)
    } else {
        None
    }
}

/// Parse a device timestamp into an absolute instant.
///
/// Timestamps without an offset are read in `assumed_offset`.
#[must_use]
pub fn parse_timestamp(text: &str, assumed_offset: FixedOffset) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return assumed_offset
                .from_local_datetime(&naive)
                .single()
                .map(|ts| ts.with_timezone(&Utc));
        }
    }
    None
}
