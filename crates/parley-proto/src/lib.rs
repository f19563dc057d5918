//! Parley wire vocabulary.
//!
//! Everything a client and the relay exchange is a JSON object with a string
//! `type` discriminator. This crate defines:
//!
//! - [`Envelope`]: an inbound or outbound message, opaque apart from `type`
//!   and the identity fields the relay injects
//! - [`LifecycleEvent`]: the reserved `existing_users` / `user_joined` /
//!   `user_left` messages only the relay may emit
//! - [`JoinRequest`]: the first frame a client sends to enter a room
//! - [`FrameCodec`]: length-prefixed framing for stream transports
//!
//! The crate performs no I/O.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod errors;
pub mod event;
pub mod frame;
pub mod handshake;

pub use envelope::{Envelope, FROM_USER_FIELD, TO_USER_FIELD, TYPE_FIELD};
pub use errors::{ProtocolError, Result};
pub use event::{
    EXISTING_USERS, LifecycleEvent, RESERVED_TYPES, USER_JOINED, USER_LEFT, is_reserved,
};
pub use frame::{DEFAULT_MAX_FRAME_SIZE, FrameCodec, LENGTH_PREFIX_SIZE};
pub use handshake::{JOIN, JoinRequest};

/// ALPN protocol identifier for QUIC transports.
pub const ALPN_PROTOCOL: &[u8] = b"parley";
