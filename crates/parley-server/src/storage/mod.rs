//! Chat history storage.
//!
//! Trait-based abstraction for keeping recent chat messages per room. The
//! trait is synchronous (no async) so the chat router can call it from
//! [`parley_core::MessageRouter::route`] directly.

mod error;
mod memory;

pub use error::StorageError;
pub use memory::{DEFAULT_MAX_ROOMS, DEFAULT_RETENTION, MemoryChatStore};
use parley_core::{RoomId, UserId};
use serde::{Deserialize, Serialize};

/// One stored chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    /// Author identity
    pub user_id: UserId,
    /// Message text
    pub text: String,
    /// Unix timestamp (seconds) the relay accepted the message
    pub sent_at: u64,
}

/// Storage abstraction for chat history.
///
/// Must be Send + Sync (shared by every connection task). History is keyed by
/// room and is independent of whether the room currently has connections.
pub trait ChatStore: Send + Sync + 'static {
    /// Append `record` to the room's history.
    ///
    /// # Invariants
    ///
    /// - Post: `record` is the newest entry returned by [`ChatStore::recent`]
    ///   until another append
    fn append(&self, room: &RoomId, record: ChatRecord) -> Result<(), StorageError>;

    /// Up to `limit` most recent records for the room, oldest first.
    ///
    /// Returns an empty list for a room with no history.
    fn recent(&self, room: &RoomId, limit: usize) -> Result<Vec<ChatRecord>, StorageError>;

    /// Number of rooms with stored history.
    fn room_count(&self) -> Result<usize, StorageError>;
}
