//! Protocol error types.

use thiserror::Error;

/// Errors produced while decoding or encoding wire messages.
///
/// All of these describe a single bad message. None of them is fatal for the
/// connection that produced it: the relay logs and drops the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload is not valid JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Payload is valid JSON but not an object
    #[error("message is not a JSON object")]
    NotAnObject,

    /// Object has no string `type` field
    #[error("message has no string `type` field")]
    MissingType,

    /// Client tried to send a type only the relay may emit
    #[error("message type `{0}` is reserved for the relay")]
    ReservedType(String),

    /// First frame on a connection was not a usable join request
    #[error("invalid join handshake: {0}")]
    InvalidHandshake(String),

    /// Frame payload exceeds the configured limit
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size claimed or supplied
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Input ended before a complete frame was read
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Serialization failed
    #[error("encode failed: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidJson(err.to_string())
    }
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
