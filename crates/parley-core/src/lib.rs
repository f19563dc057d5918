//! Parley relay core.
//!
//! Tracks which connections belong to which room, enforces at most one active
//! connection per identity per room, fans messages out to room members and
//! cleans up when connections go away.
//!
//! # Architecture
//!
//! The core never touches sockets. A transport accepts a duplex connection,
//! completes whatever handshake it needs, and hands the relay a [`Channel`]
//! and a [`ChannelReader`] together with the room and identity the client
//! asked for. Everything from there on happens here:
//!
//! - [`Registry`]: room → connections and presence, one lock per room
//! - [`PresenceTracker`]: ordered distinct identities per room
//! - [`BroadcastEngine`]: concurrent fan-out over member snapshots
//! - [`Relay`]: the lifecycle controller and only writer of registry state
//! - [`MessageRouter`]: dispatch hook consulted for every inbound message
//!
//! All state is in memory. A restart discards every room.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcast;
pub mod channel;
pub mod connection;
pub mod env;
pub mod error;
pub mod ids;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod router;

pub use broadcast::{BroadcastEngine, BroadcastReport};
pub use channel::{Channel, ChannelReader, Received};
pub use connection::{Connection, ConnectionState, SendStatus};
pub use env::Environment;
pub use error::{ConnectionError, InvariantViolation, TransportError};
pub use ids::{ConnectionId, RoomId, UserId};
pub use presence::PresenceTracker;
pub use registry::{
    ConnectionSnapshot, Registration, Registry, RegistrySnapshot, RegistryStats, RoomSnapshot,
    Unregistration,
};
pub use relay::{Relay, RelayConfig};
pub use router::{DefaultRouter, Delivery, Dispatch, MessageRouter, RouteContext};
