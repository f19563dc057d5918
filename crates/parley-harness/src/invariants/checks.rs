//! Standard invariant checks.

use std::collections::BTreeSet;

use parley_core::{ConnectionState, RegistrySnapshot};

use super::{Invariant, InvariantResult, Violation};

/// A room is listed iff it has at least one connection.
pub struct RoomsNonEmpty;

impl Invariant for RoomsNonEmpty {
    fn name(&self) -> &'static str {
        "rooms_non_empty"
    }

    fn check(&self, state: &RegistrySnapshot) -> InvariantResult {
        for (id, room) in &state.rooms {
            if room.connections.is_empty() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("room {id} has no connections"),
                });
            }
        }
        Ok(())
    }
}

/// At most one `Active` connection per (room, identity).
pub struct SingleActivePerIdentity;

impl Invariant for SingleActivePerIdentity {
    fn name(&self) -> &'static str {
        "single_active_per_identity"
    }

    fn check(&self, state: &RegistrySnapshot) -> InvariantResult {
        for (id, room) in &state.rooms {
            let mut seen = BTreeSet::new();
            for conn in room.connections.iter().filter(|c| c.state == ConnectionState::Active) {
                if !seen.insert(&conn.user) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "room {id}: user {} has several active connections",
                            conn.user
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Presence is exactly the set of identities with an `Active` connection,
/// without duplicates.
pub struct PresenceMatchesActive;

impl Invariant for PresenceMatchesActive {
    fn name(&self) -> &'static str {
        "presence_matches_active"
    }

    fn check(&self, state: &RegistrySnapshot) -> InvariantResult {
        for (id, room) in &state.rooms {
            let present: BTreeSet<_> = room.presence.iter().collect();
            if present.len() != room.presence.len() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("room {id}: duplicate presence entries {:?}", room.presence),
                });
            }

            let active: BTreeSet<_> = room
                .connections
                .iter()
                .filter(|c| c.state == ConnectionState::Active)
                .map(|c| &c.user)
                .collect();
            if present != active {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("room {id}: presence {present:?} != active {active:?}"),
                });
            }
        }
        Ok(())
    }
}

/// Every registered connection is `Active`.
///
/// Only meaningful once teardowns have finished: a connection is `Draining`
/// for the short window between claiming its teardown and unregistering.
pub struct MembersAreActive;

impl Invariant for MembersAreActive {
    fn name(&self) -> &'static str {
        "members_are_active"
    }

    fn check(&self, state: &RegistrySnapshot) -> InvariantResult {
        for (id, room) in &state.rooms {
            if let Some(conn) = room.connections.iter().find(|c| c.state != ConnectionState::Active)
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("room {id}: connection {} is {:?}", conn.id, conn.state),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parley_core::{ConnectionId, ConnectionSnapshot, RoomId, RoomSnapshot, UserId};

    use super::*;

    fn snapshot(
        connections: &[(u64, &str, ConnectionState)],
        presence: &[&str],
    ) -> RegistrySnapshot {
        let room = RoomSnapshot {
            connections: connections
                .iter()
                .map(|(id, user, state)| ConnectionSnapshot {
                    id: ConnectionId::new(*id),
                    user: UserId::from(*user),
                    state: *state,
                })
                .collect(),
            presence: presence.iter().map(|u| UserId::from(*u)).collect(),
        };
        let mut snapshot = RegistrySnapshot::default();
        snapshot.rooms.insert(RoomId::from("r"), room);
        snapshot
    }

    #[test]
    fn consistent_room_passes() {
        let state = snapshot(
            &[(1, "a", ConnectionState::Active), (2, "b", ConnectionState::Active)],
            &["a", "b"],
        );
        assert!(RoomsNonEmpty.check(&state).is_ok());
        assert!(SingleActivePerIdentity.check(&state).is_ok());
        assert!(PresenceMatchesActive.check(&state).is_ok());
        assert!(MembersAreActive.check(&state).is_ok());
    }

    #[test]
    fn empty_room_detected() {
        let state = snapshot(&[], &[]);
        assert!(RoomsNonEmpty.check(&state).is_err());
    }

    #[test]
    fn duplicate_active_identity_detected() {
        let state = snapshot(
            &[(1, "a", ConnectionState::Active), (2, "a", ConnectionState::Active)],
            &["a"],
        );
        assert!(SingleActivePerIdentity.check(&state).is_err());
    }

    #[test]
    fn stale_presence_detected() {
        let state = snapshot(&[(1, "a", ConnectionState::Active)], &["a", "ghost"]);
        let err = PresenceMatchesActive.check(&state).unwrap_err();
        assert_eq!(err.invariant, "presence_matches_active");
    }

    #[test]
    fn lingering_draining_connection_detected() {
        let state = snapshot(&[(1, "a", ConnectionState::Draining)], &["a"]);
        assert!(MembersAreActive.check(&state).is_err());
        // Presence check alone also flags it: "a" has no active connection
        assert!(PresenceMatchesActive.check(&state).is_err());
    }
}
