use acsync_core::TerminalId;
use acsync_network::DeviceError;
use acsync_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by sync cycles and administrative operations.
///
/// Per-event failures never end a cycle; they are counted in the
/// [`SyncReport`](crate::SyncReport) instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Terminal unreachable, locked out or answering with errors
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Ledger or directory access failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration or lifecycle transition
    #[error(transparent)]
    Core(#[from] acsync_core::Error),

    #[error("Terminal {0} not found")]
    TerminalNotFound(TerminalId),

    #[error("Terminal {0} is inactive")]
    TerminalInactive(TerminalId),

    /// Terminal on a private or local address, expected to push its events
    #[error("Terminal {0} is on a non-routable address")]
    TerminalNotRoutable(TerminalId),

    /// Time range with its end before its start
    #[error("Invalid time range: {0}")]
    InvalidRange(String),
}

impl SyncError {
    /// Remaining lockout when the terminal locked the account.
    #[must_use]
    pub fn lockout_remaining(&self) -> Option<std::time::Duration> {
        match self {
            SyncError::Device(e) => e.lockout_remaining(),
            _ => None,
        }
    }

    /// Returns `true` if the terminal could not be reached at all.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Device(e) if e.is_transport())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Storage(StorageError::Database(err))
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
