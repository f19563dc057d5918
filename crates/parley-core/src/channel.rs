//! Transport seam.
//!
//! The relay never touches sockets. A transport hands it one [`Channel`] for
//! outbound messages and one [`ChannelReader`] for inbound messages per
//! accepted connection. Both carry whole messages: framing, if the transport
//! needs any, happens on the other side of these traits.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// Outbound half of a duplex connection.
///
/// Shared between the connection's owner and every broadcast that targets it,
/// hence `&self`. The relay serializes sends to one channel itself; an
/// implementation only has to be safe to call from several tasks, not to order
/// them.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send one complete message.
    ///
    /// # Errors
    ///
    /// Any error is final for this channel. The relay tears the connection
    /// down and never retries.
    async fn send(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Close the channel. Idempotent; must not block.
    fn close(&self, reason: &str);
}

/// Outcome of one receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// One complete inbound message
    Message(Bytes),
    /// Peer closed cleanly
    Closed,
    /// Receive failed
    Failed(TransportError),
}

/// Inbound half of a duplex connection.
///
/// Owned by the connection's read loop.
#[async_trait]
pub trait ChannelReader: Send {
    /// Wait for the next message.
    ///
    /// The read loop drops a pending receive when the connection is cancelled
    /// and never calls `recv` again afterwards, so a partially read message
    /// may be discarded.
    async fn recv(&mut self) -> Received;
}
