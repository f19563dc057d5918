use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use parley_core::RoomId;

use super::{ChatRecord, ChatStore, StorageError};

/// Records kept per room when no limit is configured.
pub const DEFAULT_RETENTION: usize = 100;

/// Rooms with history kept at once when no limit is configured.
pub const DEFAULT_MAX_ROOMS: usize = 10_000;

/// History of every room, plus the order rooms were last written in.
#[derive(Debug, Default)]
struct Rooms {
    history: HashMap<RoomId, VecDeque<ChatRecord>>,
    /// Least recently written first
    order: VecDeque<RoomId>,
}

impl Rooms {
    /// Mark `room` as the most recently written.
    fn touch(&mut self, room: &RoomId) {
        if let Some(pos) = self.order.iter().position(|r| r == room) {
            self.order.remove(pos);
        }
        self.order.push_back(room.clone());
    }

    /// Drop least recently written rooms until a new one fits under `max`.
    fn make_room(&mut self, max: usize) {
        while self.history.len() >= max {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.history.remove(&oldest);
            tracing::debug!(room = %oldest, "evicted chat history");
        }
    }
}

/// In-memory chat history with bounded per-room retention and a bounded
/// number of rooms.
///
/// Clones share the same underlying history. Appending beyond the retention
/// limit drops the room's oldest record. Writing to a new room while at the
/// room limit drops the whole history of the least recently written room. A
/// retention or room limit of zero stores nothing. History is lost on
/// restart.
#[derive(Debug, Clone)]
pub struct MemoryChatStore {
    inner: Arc<Mutex<Rooms>>,
    retention: usize,
    max_rooms: usize,
}

impl MemoryChatStore {
    /// Create an empty store keeping at most `retention` records per room
    /// and [`DEFAULT_MAX_ROOMS`] rooms.
    pub fn new(retention: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Rooms::default())),
            retention,
            max_rooms: DEFAULT_MAX_ROOMS,
        }
    }

    /// Keep history for at most `max_rooms` rooms.
    #[must_use]
    pub fn with_max_rooms(mut self, max_rooms: usize) -> Self {
        self.max_rooms = max_rooms;
        self
    }

    /// Per-room retention limit.
    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Room limit.
    pub fn max_rooms(&self) -> usize {
        self.max_rooms
    }

    /// Total number of records across all rooms.
    pub fn total_records(&self) -> usize {
        self.lock().history.values().map(VecDeque::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, Rooms> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryChatStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl ChatStore for MemoryChatStore {
    fn append(&self, room: &RoomId, record: ChatRecord) -> Result<(), StorageError> {
        if self.retention == 0 || self.max_rooms == 0 {
            return Ok(());
        }

        let mut rooms = self.lock();
        if !rooms.history.contains_key(room) {
            rooms.make_room(self.max_rooms);
        }
        rooms.touch(room);

        let history = rooms.history.entry(room.clone()).or_default();
        if history.len() == self.retention {
            history.pop_front();
        }
        history.push_back(record);
        debug_assert!(history.len() <= self.retention);

        debug_assert!(rooms.history.len() <= self.max_rooms);
        debug_assert_eq!(rooms.history.len(), rooms.order.len());
        Ok(())
    }

    fn recent(&self, room: &RoomId, limit: usize) -> Result<Vec<ChatRecord>, StorageError> {
        let rooms = self.lock();
        let Some(history) = rooms.history.get(room) else {
            return Ok(Vec::new());
        };

        let skip = history.len().saturating_sub(limit);
        Ok(history.iter().skip(skip).cloned().collect())
    }

    fn room_count(&self) -> Result<usize, StorageError> {
        Ok(self.lock().history.len())
    }
}
