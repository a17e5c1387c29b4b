use acsync_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to a terminal
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Terminal unreachable, connection refused or dropped
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request did not complete in time
    #[error("Request timed out")]
    Timeout,

    /// 401 without a usable digest challenge
    #[error("Digest challenge error: {0}")]
    AuthChallenge(String),

    /// Account locked by the terminal after failed logins
    #[error("Account locked, retry in {}s", remaining.as_secs())]
    AccountLocked { remaining: Duration },

    /// Credentials rejected after answering the challenge
    #[error("Credentials rejected by terminal")]
    Unauthorized,

    /// Non-success status with the terminal's explanation, if any
    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Image body was an error payload or empty
    #[error("Image rejected: {0}")]
    ImageRejected(String),
}

impl DeviceError {
    /// Returns `true` for failures of the network path itself.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, DeviceError::Transport(_) | DeviceError::Timeout)
    }

    /// Remaining lockout, if this is a lockout.
    #[must_use]
    pub fn lockout_remaining(&self) -> Option<Duration> {
        match self {
            DeviceError::AccountLocked { remaining } => Some(*remaining),
            _ => None,
        }
    }

    /// Returns `true` when the other search variant may still succeed.
    #[must_use]
    pub fn allows_variant_fallback(&self) -> bool {
        matches!(self, DeviceError::HttpStatus { .. } | DeviceError::Decode(_))
    }
}

impl From<ProtocolError> for DeviceError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::MalformedChallenge(_) | ProtocolError::UnsupportedChallenge(_) => {
                DeviceError::AuthChallenge(err.to_string())
            }
            other => DeviceError::Decode(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for DeviceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeviceError::Timeout
        } else if err.is_decode() {
            DeviceError::Decode(err.to_string())
        } else {
            DeviceError::Transport(err.to_string())
        }
    }
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;
