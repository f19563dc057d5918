//! Server error types.

use std::fmt;

use parley_core::ConnectionError;
use parley_proto::ProtocolError;

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, unreadable TLS files, etc.).
    ///
    /// Fatal at startup. Fix configuration and restart.
    Config(String),

    /// Transport/network error (endpoint creation, stream I/O, etc.).
    ///
    /// Fatal for the endpoint when returned from [`crate::Server::bind`];
    /// scoped to one client otherwise.
    Transport(String),

    /// A client sent something that is not valid protocol.
    ///
    /// Fatal for that client only.
    Protocol(ProtocolError),

    /// The client did not complete the join handshake.
    ///
    /// Timed out, closed early, or sent no stream. Fatal for that client only.
    Handshake(String),

    /// Internal error (unexpected state, logic bug).
    ///
    /// Should never happen. Indicates a bug.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::Handshake(msg) => write!(f, "handshake failed: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<ConnectionError> for ServerError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Transport(err) => Self::Transport(err.to_string()),
            ConnectionError::Protocol(err) => Self::Protocol(err),
            err @ ConnectionError::InvalidTransition { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
