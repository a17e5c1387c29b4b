use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Domain value errors
    #[error("Invalid direction: {0}")]
    InvalidDirection(String),

    #[error("Invalid declared role: {0}")]
    InvalidDeclaredRole(String),

    #[error("Invalid verification method: {0}")]
    InvalidVerificationMethod(String),

    #[error("Invalid serial number: {0}")]
    InvalidSerialNumber(String),

    #[error("Invalid {field}: {message}")]
    InvalidValue { field: String, message: String },

    // Lifecycle errors
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
