//! Per-room presence tracking.
//!
//! Presence is the ordered set of distinct identities in a room, independent of
//! how many connections each identity has opened over time. It lives inside
//! the room's lock next to the member set, so the registry updates both in one
//! critical section.

use crate::ids::UserId;

/// Ordered set of present identities for one room.
///
/// Rooms hold a handful of participants, so a `Vec` with linear lookups keeps
/// join order for free.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceTracker {
    present: Vec<UserId>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `user` if absent. Returns true if the identity is newly present.
    pub fn join(&mut self, user: &UserId) -> bool {
        if self.contains(user) {
            return false;
        }
        self.present.push(user.clone());
        true
    }

    /// Remove `user` unless it still has an active connection.
    ///
    /// `active` lists the identities of the room's remaining `Active`
    /// connections. Returns true if the identity left.
    pub fn leave<'a>(
        &mut self,
        user: &UserId,
        mut active: impl Iterator<Item = &'a UserId>,
    ) -> bool {
        if active.any(|u| u == user) {
            return false;
        }

        let before = self.present.len();
        self.present.retain(|u| u != user);
        self.present.len() != before
    }

    /// Present identities minus `excluding`, in join order.
    pub fn snapshot(&self, excluding: Option<&UserId>) -> Vec<UserId> {
        self.present.iter().filter(|u| Some(*u) != excluding).cloned().collect()
    }

    /// Whether `user` is present.
    pub fn contains(&self, user: &UserId) -> bool {
        self.present.contains(user)
    }

    /// Number of present identities.
    pub fn len(&self) -> usize {
        self.present.len()
    }

    /// Whether nobody is present.
    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }
}
