use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    // Authentication
    #[error("Malformed digest challenge: {0}")]
    MalformedChallenge(String),

    #[error("Unsupported digest challenge: {0}")]
    UnsupportedChallenge(String),

    // Payload decoding
    #[error("XML error: {0}")]
    Xml(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),
}

impl From<quick_xml::Error> for ProtocolError {
    fn from(err: quick_xml::Error) -> Self {
        ProtocolError::Xml(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
