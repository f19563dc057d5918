//! Connection registry: room membership and presence.
//!
//! The registry is the single source of truth for "who can currently be sent
//! to". Rooms are looked up through a concurrent map so unrelated rooms never
//! contend; each room's member set and presence list sit behind one mutex and
//! are always mutated together.
//!
//! Rooms are created implicitly by the first registration and collected when
//! their last connection is unregistered.
//!
//! # Invariants
//!
//! At every quiescent point:
//!
//! - a room is in the map iff it has at least one connection
//! - at most one `Active` connection per (room, identity)
//! - presence equals the distinct identities of the room's `Active`
//!   connections
//!
//! # Lock order
//!
//! Map shard, then room. [`Registry::register`] releases the shard before
//! locking the room; collection takes the shard (inside `remove_if`) and then
//! the room. Nothing locks a room and then touches the map.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;

use crate::{
    connection::{Connection, ConnectionState},
    error::{ConnectionError, InvariantViolation},
    ids::{ConnectionId, RoomId, UserId},
    presence::PresenceTracker,
};

/// Outcome of [`Registry::register`], computed under one room lock.
#[derive(Debug)]
pub struct Registration {
    /// Previous `Active` connection for the same identity, already moved to
    /// `Draining` and removed. The caller finishes closing it.
    pub evicted: Option<Arc<Connection>>,
    /// Whether the identity was not present before this registration
    pub newly_present: bool,
    /// Other present identities, in join order
    pub existing_users: Vec<UserId>,
}

/// Outcome of [`Registry::unregister`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Unregistration {
    /// Whether the connection was registered at all
    pub was_present: bool,
    /// Whether the identity left presence
    pub identity_left: bool,
    /// Whether the room was removed
    pub room_collected: bool,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Successful registrations
    pub registered: u64,
    /// Successful unregistrations
    pub unregistered: u64,
    /// Connections displaced by a newer connection for the same identity
    pub evicted: u64,
}

/// Point-in-time view of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Connection handle
    pub id: ConnectionId,
    /// Identity carried
    pub user: UserId,
    /// Lifecycle state when the snapshot was taken
    pub state: ConnectionState,
}

/// Point-in-time view of one room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSnapshot {
    /// Registered connections, in acceptance order
    pub connections: Vec<ConnectionSnapshot>,
    /// Present identities, in join order
    pub presence: Vec<UserId>,
}

/// Point-in-time view of the whole registry.
///
/// Each room is captured under its own lock; rooms are not captured
/// atomically with respect to each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Rooms by key
    pub rooms: BTreeMap<RoomId, RoomSnapshot>,
}

impl RegistrySnapshot {
    /// Snapshot of `room`. `None` if the room did not exist.
    pub fn room(&self, room: &RoomId) -> Option<&RoomSnapshot> {
        self.rooms.get(room)
    }

    /// Total registered connections across rooms.
    pub fn connection_count(&self) -> usize {
        self.rooms.values().map(|r| r.connections.len()).sum()
    }
}

#[derive(Debug, Default)]
struct Room {
    state: Mutex<RoomState>,
}

#[derive(Debug, Default)]
struct RoomState {
    members: BTreeMap<ConnectionId, Arc<Connection>>,
    presence: PresenceTracker,
    /// Set when the room is removed from the map. A registration that finds
    /// a retired room retries against a fresh one.
    retired: bool,
}

impl Room {
    fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Room → connections and presence.
#[derive(Debug, Default)]
pub struct Registry {
    rooms: DashMap<RoomId, Arc<Room>>,
    registered: AtomicU64,
    unregistered: AtomicU64,
    evicted: AtomicU64,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` in its room and move it `Connecting -> Active`.
    ///
    /// If the identity already has an `Active` connection in the room, that
    /// connection is moved to `Draining`, removed, and returned in
    /// [`Registration::evicted`] for the caller to close.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidTransition` if `conn` is not `Connecting`.
    ///   The registry is left unchanged.
    pub fn register(&self, conn: &Arc<Connection>) -> Result<Registration, ConnectionError> {
        loop {
            let room = Arc::clone(self.rooms.entry(conn.room().clone()).or_default().value());
            let mut state = room.lock();
            if state.retired {
                continue;
            }

            if let Err(err) = conn.transition(ConnectionState::Active) {
                let abandoned = state.members.is_empty();
                drop(state);
                if abandoned {
                    self.collect(conn.room());
                }
                return Err(err);
            }

            let RoomState { members, presence, .. } = &mut *state;

            let stale =
                members.values().find(|c| c.user() == conn.user() && c.is_active()).cloned();
            let evicted = match stale {
                Some(stale) if stale.begin_drain() => members.remove(&stale.id()),
                _ => None,
            };

            members.insert(conn.id(), Arc::clone(conn));
            let newly_present = presence.join(conn.user());
            let existing_users = presence.snapshot(Some(conn.user()));
            drop(state);

            self.registered.fetch_add(1, Ordering::Relaxed);
            if let Some(stale) = &evicted {
                self.evicted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    room = %conn.room(),
                    user = %conn.user(),
                    conn = %conn.id(),
                    evicted = %stale.id(),
                    "evicted previous connection"
                );
            }

            return Ok(Registration { evicted, newly_present, existing_users });
        }
    }

    /// Remove `conn` from its room.
    ///
    /// Updates presence and collects the room if it is now empty. Removing a
    /// connection that is not registered is a logged no-op.
    pub fn unregister(&self, conn: &Connection) -> Unregistration {
        let unknown = || {
            let violation = InvariantViolation::UnknownConnection {
                conn: conn.id(),
                room: conn.room().clone(),
            };
            tracing::warn!(%violation, "ignoring unregister");
            Unregistration::default()
        };

        let Some(room) = self.room(conn.room()) else {
            return unknown();
        };

        let (identity_left, now_empty) = {
            let mut state = room.lock();
            let RoomState { members, presence, .. } = &mut *state;

            if members.remove(&conn.id()).is_none() {
                drop(state);
                return unknown();
            }

            let active = members.values().filter(|c| c.is_active()).map(|c| c.user());
            let identity_left = presence.leave(conn.user(), active);
            (identity_left, members.is_empty())
        };

        self.unregistered.fetch_add(1, Ordering::Relaxed);
        let room_collected = now_empty && self.collect(conn.room());

        Unregistration { was_present: true, identity_left, room_collected }
    }

    /// Snapshot of the room's connections. Empty if the room does not exist.
    ///
    /// The copy is taken under the room lock and returned without it, so
    /// callers can send to the members without blocking the room.
    pub fn members(&self, room: &RoomId) -> Vec<Arc<Connection>> {
        self.room(room).map(|r| r.lock().members.values().cloned().collect()).unwrap_or_default()
    }

    /// The identity's `Active` connection in `room`, if any.
    pub fn find_active(&self, room: &RoomId, user: &UserId) -> Option<Arc<Connection>> {
        let room = self.room(room)?;
        let state = room.lock();
        state.members.values().find(|c| c.user() == user && c.is_active()).cloned()
    }

    /// Present identities in `room`, in join order.
    pub fn presence(&self, room: &RoomId) -> Vec<UserId> {
        self.room(room).map(|r| r.lock().presence.snapshot(None)).unwrap_or_default()
    }

    /// Whether `room` currently exists.
    pub fn contains_room(&self, room: &RoomId) -> bool {
        self.rooms.contains_key(room)
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Copy of every room's connections and presence.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let rooms: Vec<(RoomId, Arc<Room>)> =
            self.rooms.iter().map(|e| (e.key().clone(), Arc::clone(e.value()))).collect();

        let mut snapshot = RegistrySnapshot::default();
        for (id, room) in rooms {
            let state = room.lock();
            if state.retired {
                continue;
            }

            let connections = state
                .members
                .values()
                .map(|c| ConnectionSnapshot {
                    id: c.id(),
                    user: c.user().clone(),
                    state: c.state(),
                })
                .collect();
            let presence = state.presence.snapshot(None);
            snapshot.rooms.insert(id, RoomSnapshot { connections, presence });
        }
        snapshot
    }

    /// Lifetime counters.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registered: self.registered.load(Ordering::Relaxed),
            unregistered: self.unregistered.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    fn room(&self, room: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(room).map(|r| Arc::clone(r.value()))
    }

    /// Remove `room` if it is still empty. Returns true if it was removed.
    fn collect(&self, room: &RoomId) -> bool {
        let removed = self
            .rooms
            .remove_if(room, |_, r| {
                let mut state = r.lock();
                if state.members.is_empty() {
                    state.retired = true;
                    true
                } else {
                    false
                }
            })
            .is_some();

        if removed {
            tracing::debug!(room = %room, "room collected");
        }
        removed
    }
}
