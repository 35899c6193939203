//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering malformed wire input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The sort parameter names an unknown field.
    #[error("invalid sort specification: {0}")]
    InvalidSort(String),

    /// Failed to deserialize a message body.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Failed to serialize a message body.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}
