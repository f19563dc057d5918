//! Error types for the relay core.
//!
//! Three layers, matching how far a failure is allowed to reach:
//!
//! - [`TransportError`]: one connection's send or receive failed. The
//!   connection is torn down; nothing else is affected.
//! - [`InvariantViolation`]: a caller asked for something that no longer makes
//!   sense (unregistering a connection twice). Logged and ignored.
//! - [`ConnectionError`]: misuse of the connection state machine, or a failure
//!   during acceptance that the caller should hear about.

use std::{io, time::Duration};

use thiserror::Error;

use crate::{
    connection::ConnectionState,
    ids::{ConnectionId, RoomId},
};

/// A send or receive on a single channel failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Peer closed the channel
    #[error("channel closed")]
    Closed,

    /// Send did not complete within the configured bound
    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Returns true if the failure was the send timeout rather than an error
    /// reported by the transport.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Internal bookkeeping inconsistency.
///
/// Never propagated. Call sites log it at `warn` and carry on, since the state
/// the caller wanted is already the state the registry is in.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Connection is not registered in its room
    #[error("connection {conn} is not registered in room {room}")]
    UnknownConnection {
        /// Connection that was looked up
        conn: ConnectionId,
        /// Room it claims to belong to
        room: RoomId,
    },

    /// Lifecycle transition attempted from the wrong state
    #[error("connection {conn}: invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Connection being transitioned
        conn: ConnectionId,
        /// State found
        from: ConnectionState,
        /// State requested
        to: ConnectionState,
    },
}

/// Errors surfaced by connection acceptance and the state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Lifecycle transition attempted from the wrong state
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// State found
        from: ConnectionState,
        /// State requested
        to: ConnectionState,
    },

    /// Channel failed while the connection was being set up
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A relay-generated message could not be encoded
    #[error("protocol error: {0}")]
    Protocol(#[from] parley_proto::ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_timeouts() {
        assert!(TransportError::Timeout(Duration::from_secs(5)).is_timeout());
        assert!(!TransportError::Closed.is_timeout());
        assert!(!TransportError::Io("reset".to_string()).is_timeout());
    }

    #[test]
    fn disconnect_io_kinds_map_to_closed() {
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert_eq!(TransportError::from(err), TransportError::Closed);

        let err = io::Error::other("disk on fire");
        assert!(matches!(TransportError::from(err), TransportError::Io(_)));
    }
}
