//! Message router hook.
//!
//! Every inbound application message passes through a [`MessageRouter`]
//! after the relay has validated it and stamped `from_user_id`. The router
//! decides who receives it, may rewrite it, or may consume it entirely (chat
//! persistence, history queries). The relay then executes the decision.

use parley_proto::Envelope;

use crate::ids::{ConnectionId, RoomId, UserId};

/// Who sent the message being routed.
#[derive(Debug, Clone, Copy)]
pub struct RouteContext<'a> {
    /// Sender's room
    pub room: &'a RoomId,
    /// Sender's identity
    pub user: &'a UserId,
    /// Sender's connection
    pub connection: ConnectionId,
}

/// Recipients of a routed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Everyone in the room except the sender
    Others,
    /// Everyone in the room, sender included
    Everyone,
    /// Only the sender (private reply)
    Sender,
    /// Only the given identity's active connection in the room
    User(UserId),
}

/// Router decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Send `envelope` to `delivery`
    Deliver {
        /// Message to send, possibly rewritten
        envelope: Envelope,
        /// Recipients
        delivery: Delivery,
    },
    /// The router consumed the message; nothing is sent
    Handled,
}

impl Dispatch {
    /// Shorthand for [`Dispatch::Deliver`].
    pub fn deliver(envelope: Envelope, delivery: Delivery) -> Self {
        Self::Deliver { envelope, delivery }
    }
}

/// Dispatch hook invoked for every inbound message.
///
/// Synchronous: routers that need I/O should hand it off rather than block
/// the sender's read loop.
pub trait MessageRouter: Send + Sync {
    /// Decide what to do with `envelope`.
    fn route(&self, ctx: &RouteContext<'_>, envelope: Envelope) -> Dispatch;
}

/// Relay everything verbatim.
///
/// Messages carrying a string `to_user_id` go only to that identity (offers,
/// answers and ICE candidates are addressed this way); everything else goes
/// to the rest of the room.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRouter;

impl MessageRouter for DefaultRouter {
    fn route(&self, _ctx: &RouteContext<'_>, envelope: Envelope) -> Dispatch {
        let delivery = match envelope.recipient() {
            Some(target) => Delivery::User(UserId::from(target)),
            None => Delivery::Others,
        };
        Dispatch::deliver(envelope, delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(envelope: Envelope) -> Dispatch {
        let room = RoomId::from("r");
        let user = UserId::from("alice");
        let ctx = RouteContext { room: &room, user: &user, connection: ConnectionId::new(1) };
        DefaultRouter.route(&ctx, envelope)
    }

    #[test]
    fn untargeted_messages_go_to_others() {
        let envelope = Envelope::new("media-state").with("muted", true);
        assert_eq!(route(envelope.clone()), Dispatch::deliver(envelope, Delivery::Others));
    }

    #[test]
    fn targeted_messages_go_to_one_user() {
        let envelope = Envelope::new("offer").with("to_user_id", "bob");
        assert_eq!(
            route(envelope.clone()),
            Dispatch::deliver(envelope, Delivery::User(UserId::from("bob")))
        );
    }

    #[test]
    fn non_string_target_is_ignored() {
        let envelope = Envelope::new("offer").with("to_user_id", 42);
        assert_eq!(route(envelope.clone()), Dispatch::deliver(envelope, Delivery::Others));
    }
}
