//! Canonical access event.

use crate::types::{Direction, SerialNumber, VerificationMethod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Vendor-agnostic representation of one access event.
///
/// Created once per raw device record and never mutated afterwards; the
/// ledger writer decides the persisted direction and display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub serial_number: SerialNumber,
    /// Device-local person identifier, if the record carried one.
    pub subject_identifier: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub verification_method: VerificationMethod,
    /// Device-local picture reference, if a capture exists.
    pub image_path: Option<String>,
}

impl NormalizedEvent {
    /// Event time as milliseconds since the Unix epoch.
    #[must_use]
    pub fn epoch_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Subject identifier, or `fallback` when the record had none.
    #[must_use]
    pub fn subject_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.subject_identifier.as_deref().unwrap_or(fallback)
    }
}
