//! Lifecycle events emitted by the relay itself.
//!
//! These three types describe room membership. Clients never send them; the
//! inbound decoder rejects them (see [`crate::Envelope::decode_inbound`]).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    envelope::Envelope,
    errors::{ProtocolError, Result},
};

/// Private snapshot of who was already present, sent to a new connection.
pub const EXISTING_USERS: &str = "existing_users";

/// An identity entered the room.
pub const USER_JOINED: &str = "user_joined";

/// An identity's last connection left the room.
pub const USER_LEFT: &str = "user_left";

/// All types reserved for the relay.
pub const RESERVED_TYPES: [&str; 3] = [EXISTING_USERS, USER_JOINED, USER_LEFT];

/// Whether `message_type` may only be emitted by the relay.
pub fn is_reserved(message_type: &str) -> bool {
    RESERVED_TYPES.contains(&message_type)
}

/// Membership notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Identities already present, in join order, excluding the recipient
    ExistingUsers {
        /// Present identities
        users: Vec<String>,
    },

    /// `user_id` is now present
    UserJoined {
        /// Identity that joined
        user_id: String,
    },

    /// `user_id` is no longer present
    UserLeft {
        /// Identity that left
        user_id: String,
    },
}

impl LifecycleEvent {
    /// Wire `type` of this event.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::ExistingUsers { .. } => EXISTING_USERS,
            Self::UserJoined { .. } => USER_JOINED,
            Self::UserLeft { .. } => USER_LEFT,
        }
    }

    /// Serialize to JSON bytes.
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self).map(Bytes::from).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a lifecycle event out of a generic envelope.
    ///
    /// Returns `None` if the envelope is not one of the reserved types or is
    /// missing its fields.
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        if !is_reserved(envelope.message_type()) {
            return None;
        }
        serde_json::from_value(envelope.clone().into_value()).ok()
    }
}
