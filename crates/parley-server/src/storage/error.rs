//! Storage error types.

use thiserror::Error;

/// Errors returned by a [`super::ChatStore`].
///
/// None of these is fatal to the relay: the chat router logs the error and
/// drops the message that caused it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Store cannot take writes right now
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
