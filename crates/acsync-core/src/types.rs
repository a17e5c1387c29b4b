use crate::{Result, constants::DEFAULT_UTC_OFFSET_SECS, error::Error};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed UTC offset from seconds east, falling back to UTC when out of range.
#[must_use]
pub fn utc_offset(seconds_east: i32) -> FixedOffset {
    FixedOffset::east_opt(seconds_east).unwrap_or(Utc.fix())
}

/// Organization offset assumed when none is configured.
#[must_use]
pub fn default_utc_offset() -> FixedOffset {
    utc_offset(DEFAULT_UTC_OFFSET_SECS)
}

/// Terminal identifier, as assigned by the terminal directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TerminalId(i64);

impl TerminalId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        TerminalId(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for TerminalId {
    fn from(id: i64) -> Self {
        TerminalId(id)
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vendor-assigned event serial number.
///
/// Serials are unique per terminal only. Devices report them as strings or
/// integers; the numeric value drives incremental polling when available.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerialNumber(String);

impl SerialNumber {
    /// Create a serial number, trimming surrounding whitespace.
    ///
    /// # Errors
    /// Returns `Error::InvalidSerialNumber` if the value is empty.
    pub fn new(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::InvalidSerialNumber("empty".to_string()));
        }
        Ok(SerialNumber(value.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the serial, if it is a plain integer.
    #[must_use]
    pub fn numeric(&self) -> Option<i64> {
        self.0.parse().ok()
    }

    /// Returns `true` if this serial is numerically greater than `floor`.
    ///
    /// Non-numeric serials cannot be ordered and are always considered newer.
    #[must_use]
    pub fn is_after(&self, floor: i64) -> bool {
        self.numeric().is_none_or(|n| n > floor)
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Passage direction of an access event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Entry,
    Exit,
}

impl Direction {
    /// Ledger representation.
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Entry => "entry",
            Direction::Exit => "exit",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_entry(self) -> bool {
        matches!(self, Direction::Entry)
    }

    #[inline]
    #[must_use]
    pub fn is_exit(self) -> bool {
        matches!(self, Direction::Exit)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entry" | "in" => Ok(Direction::Entry),
            "exit" | "out" => Ok(Direction::Exit),
            other => Err(Error::InvalidDirection(other.to_string())),
        }
    }
}

/// Direction a terminal is wired for, set by an administrator.
///
/// A declared role is treated as ground truth over the event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredRole {
    Entry,
    Exit,
    #[default]
    Unspecified,
}

impl DeclaredRole {
    /// Parse the optional role column of the terminal directory.
    ///
    /// Missing or blank values mean `Unspecified`.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeclaredRole` for any other unrecognized value.
    pub fn from_column(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") => Ok(DeclaredRole::Unspecified),
            Some(v) => v.parse(),
        }
    }

    /// Direction forced onto every event recorded for this terminal.
    #[must_use]
    pub fn forced_direction(self) -> Option<Direction> {
        match self {
            DeclaredRole::Entry => Some(Direction::Entry),
            DeclaredRole::Exit => Some(Direction::Exit),
            DeclaredRole::Unspecified => None,
        }
    }

    /// Apply the role to a normalized direction.
    #[must_use]
    pub fn resolve(self, normalized: Direction) -> Direction {
        self.forced_direction().unwrap_or(normalized)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeclaredRole::Entry => "entry",
            DeclaredRole::Exit => "exit",
            DeclaredRole::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for DeclaredRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeclaredRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entry" | "in" => Ok(DeclaredRole::Entry),
            "exit" | "out" => Ok(DeclaredRole::Exit),
            "unspecified" | "both" | "" => Ok(DeclaredRole::Unspecified),
            other => Err(Error::InvalidDeclaredRole(other.to_string())),
        }
    }
}

/// How the subject proved identity at the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    Face,
    Card,
    Fingerprint,
    Password,
    /// More than one factor, e.g. card followed by face.
    Combined,
    #[default]
    Unknown,
}

impl VerificationMethod {
    /// Map the numeric verify-mode codes reported by the terminals.
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(VerificationMethod::Face),
            2 => Some(VerificationMethod::Card),
            3 => Some(VerificationMethod::Fingerprint),
            4 => Some(VerificationMethod::Password),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationMethod::Face => "face",
            VerificationMethod::Card => "card",
            VerificationMethod::Fingerprint => "fingerprint",
            VerificationMethod::Password => "password",
            VerificationMethod::Combined => "combined",
            VerificationMethod::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VerificationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "face" => Ok(VerificationMethod::Face),
            "card" => Ok(VerificationMethod::Card),
            "fingerprint" => Ok(VerificationMethod::Fingerprint),
            "password" => Ok(VerificationMethod::Password),
            "combined" => Ok(VerificationMethod::Combined),
            "unknown" => Ok(VerificationMethod::Unknown),
            other => Err(Error::InvalidVerificationMethod(other.to_string())),
        }
    }
}

/// Device login credentials.
///
/// `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}
