//! Model-based property tests for the connection registry
//!
//! Random sequences of register / drain / unregister operations are applied
//! to the real registry and to a plain reference model. After every step the
//! registry snapshot must match the model exactly, and whenever no teardown is
//! in flight the data-model invariants must hold.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use parley_core::{
    Channel, Connection, ConnectionId, ConnectionState, Registry, RoomId, TransportError, UserId,
};
use proptest::prelude::*;

struct NullChannel;

#[async_trait]
impl Channel for NullChannel {
    async fn send(&self, _payload: Bytes) -> Result<(), TransportError> {
        Ok(())
    }

    fn close(&self, _reason: &str) {}
}

#[derive(Debug, Clone)]
enum Op {
    Register { room: u8, user: u8 },
    BeginDrain(prop::sample::Index),
    Unregister(prop::sample::Index),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..3, 0u8..4).prop_map(|(room, user)| Op::Register { room, user }),
        1 => any::<prop::sample::Index>().prop_map(Op::BeginDrain),
        2 => any::<prop::sample::Index>().prop_map(Op::Unregister),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelState {
    Active,
    Draining,
}

#[derive(Debug, Default)]
struct ModelRoom {
    members: BTreeMap<u64, (String, ModelState)>,
    presence: Vec<String>,
}

#[derive(Debug, Default)]
struct Model {
    rooms: BTreeMap<String, ModelRoom>,
}

impl Model {
    /// Returns (evicted id, newly present, existing users)
    fn register(&mut self, id: u64, room: &str, user: &str) -> (Option<u64>, bool, Vec<String>) {
        let r = self.rooms.entry(room.to_string()).or_default();

        let evicted = r
            .members
            .iter()
            .find(|(_, (u, s))| u == user && *s == ModelState::Active)
            .map(|(id, _)| *id);
        if let Some(evicted) = evicted {
            r.members.remove(&evicted);
        }

        r.members.insert(id, (user.to_string(), ModelState::Active));
        let newly_present = !r.presence.iter().any(|u| u == user);
        if newly_present {
            r.presence.push(user.to_string());
        }
        let existing = r.presence.iter().filter(|u| *u != user).cloned().collect();
        (evicted, newly_present, existing)
    }

    fn begin_drain(&mut self, room: &str, id: u64) {
        if let Some((_, state)) = self.rooms.get_mut(room).and_then(|r| r.members.get_mut(&id)) {
            *state = ModelState::Draining;
        }
    }

    /// Returns (was present, identity left, room collected)
    fn unregister(&mut self, room: &str, id: u64) -> (bool, bool, bool) {
        let Some(r) = self.rooms.get_mut(room) else {
            return (false, false, false);
        };
        let Some((user, _)) = r.members.remove(&id) else {
            return (false, false, false);
        };

        let still_active =
            r.members.values().any(|(u, s)| *u == user && *s == ModelState::Active);
        let before = r.presence.len();
        if !still_active {
            r.presence.retain(|u| *u != user);
        }
        let identity_left = r.presence.len() != before;

        let collected = r.members.is_empty();
        if collected {
            self.rooms.remove(room);
        }
        (true, identity_left, collected)
    }

    fn quiescent(&self) -> bool {
        self.rooms.values().all(|r| r.members.values().all(|(_, s)| *s == ModelState::Active))
    }
}

fn connection(id: u64, room: &str, user: &str) -> Arc<Connection> {
    Arc::new(Connection::new(
        ConnectionId::new(id),
        RoomId::from(room),
        UserId::from(user),
        Arc::new(NullChannel),
    ))
}

fn assert_matches_model(registry: &Registry, model: &Model) -> Result<(), TestCaseError> {
    let snapshot = registry.snapshot();

    let rooms: Vec<_> = snapshot.rooms.keys().map(RoomId::as_str).collect();
    let expected: Vec<_> = model.rooms.keys().map(String::as_str).collect();
    prop_assert_eq!(rooms, expected);
    prop_assert_eq!(registry.room_count(), model.rooms.len());

    for (id, room) in &snapshot.rooms {
        let model_room = &model.rooms[id.as_str()];

        let actual: Vec<_> = room
            .connections
            .iter()
            .map(|c| {
                let state = match c.state {
                    ConnectionState::Active => Some(ModelState::Active),
                    ConnectionState::Draining => Some(ModelState::Draining),
                    _ => None,
                };
                (c.id.get(), c.user.as_str().to_string(), state)
            })
            .collect();
        let expected: Vec<_> = model_room
            .members
            .iter()
            .map(|(id, (user, state))| (*id, user.clone(), Some(*state)))
            .collect();
        prop_assert_eq!(actual, expected);

        let presence: Vec<_> = room.presence.iter().map(|u| u.as_str().to_string()).collect();
        prop_assert_eq!(&presence, &model_room.presence);
    }
    Ok(())
}

fn assert_invariants(registry: &Registry) -> Result<(), TestCaseError> {
    for (id, room) in &registry.snapshot().rooms {
        prop_assert!(!room.connections.is_empty(), "room {} is empty", id);

        let mut seen = BTreeSet::new();
        for conn in &room.connections {
            prop_assert_eq!(conn.state, ConnectionState::Active);
            prop_assert!(seen.insert(conn.user.clone()), "duplicate active {}", conn.user);
        }

        let present: BTreeSet<_> = room.presence.iter().cloned().collect();
        prop_assert_eq!(present, seen);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: the registry behaves exactly like the reference model
    #[test]
    fn prop_registry_matches_model(ops in prop::collection::vec(op(), 1..60)) {
        let registry = Registry::new();
        let mut model = Model::default();
        let mut created: Vec<Arc<Connection>> = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Register { room, user } => {
                    let id = step as u64 + 1;
                    let room = format!("room-{room}");
                    let user = format!("user-{user}");
                    let conn = connection(id, &room, &user);

                    let registration = registry.register(&conn)?;
                    let (evicted, newly_present, existing) = model.register(id, &room, &user);

                    prop_assert_eq!(registration.evicted.map(|c| c.id().get()), evicted);
                    prop_assert_eq!(registration.newly_present, newly_present);
                    let existing_users: Vec<_> = registration
                        .existing_users
                        .iter()
                        .map(|u| u.as_str().to_string())
                        .collect();
                    prop_assert_eq!(existing_users, existing);

                    created.push(conn);
                },
                Op::BeginDrain(pick) => {
                    if created.is_empty() {
                        continue;
                    }
                    let conn = &created[pick.index(created.len())];
                    if conn.begin_drain() {
                        model.begin_drain(conn.room().as_str(), conn.id().get());
                    }
                },
                Op::Unregister(pick) => {
                    if created.is_empty() {
                        continue;
                    }
                    let conn = &created[pick.index(created.len())];
                    let unreg = registry.unregister(conn);
                    let (was_present, identity_left, collected) =
                        model.unregister(conn.room().as_str(), conn.id().get());

                    prop_assert_eq!(unreg.was_present, was_present);
                    prop_assert_eq!(unreg.identity_left, identity_left);
                    prop_assert_eq!(unreg.room_collected, collected);
                },
            }

            assert_matches_model(&registry, &model)?;
            if model.quiescent() {
                assert_invariants(&registry)?;
            }
        }
    }

    /// Property: stats count every registration, removal and eviction
    #[test]
    fn prop_stats_balance(users in prop::collection::vec(0u8..3, 1..40)) {
        let registry = Registry::new();
        let mut live = Vec::new();

        for (i, user) in users.iter().enumerate() {
            let conn = connection(i as u64 + 1, "r", &format!("u{user}"));
            registry.register(&conn)?;
            live.push(conn);
        }

        let stats = registry.stats();
        prop_assert_eq!(stats.registered, users.len() as u64);

        let active: BTreeSet<_> = users.iter().collect();
        prop_assert_eq!(stats.evicted, (users.len() - active.len()) as u64);
        prop_assert_eq!(registry.members(&RoomId::from("r")).len(), active.len());

        for conn in &live {
            if conn.begin_drain() {
                registry.unregister(conn);
            }
        }
        prop_assert_eq!(registry.stats().unregistered, active.len() as u64);
        prop_assert_eq!(registry.room_count(), 0);
    }
}
