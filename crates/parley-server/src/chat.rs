//! Chat routing.
//!
//! [`ChatRouter`] sits in front of [`DefaultRouter`] and owns two message
//! types:
//!
//! - `chat_message`: stored with a server timestamp, then echoed to the whole
//!   room (sender included) with `sent_at` added
//! - `chat_history`: answered privately with the room's recent messages
//!
//! Everything else falls through to the default signaling relay.

use parley_core::{DefaultRouter, Delivery, Dispatch, Environment, MessageRouter, RouteContext};
use parley_proto::Envelope;
use serde_json::Value;

use crate::storage::{ChatRecord, ChatStore};

/// Inbound and outbound chat message type.
pub const CHAT_MESSAGE: &str = "chat_message";

/// History request and reply type.
pub const CHAT_HISTORY: &str = "chat_history";

/// Routes chat messages through a [`ChatStore`].
#[derive(Debug, Clone)]
pub struct ChatRouter<E, S> {
    env: E,
    store: S,
    fallback: DefaultRouter,
}

impl<E, S> ChatRouter<E, S>
where
    E: Environment,
    S: ChatStore,
{
    /// Create a router stamping messages with `env`'s wall clock.
    pub fn new(env: E, store: S) -> Self {
        Self { env, store, fallback: DefaultRouter }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn chat_message(&self, ctx: &RouteContext<'_>, mut envelope: Envelope) -> Dispatch {
        let text = envelope
            .get_str("text")
            .or_else(|| envelope.get_str("message"))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToString::to_string);

        let Some(text) = text else {
            tracing::warn!(room = %ctx.room, user = %ctx.user, "dropping empty chat message");
            return Dispatch::Handled;
        };

        let sent_at = self.env.wall_clock_secs();
        let record = ChatRecord { user_id: ctx.user.clone(), text: text.clone(), sent_at };
        if let Err(err) = self.store.append(ctx.room, record) {
            tracing::warn!(
                room = %ctx.room,
                user = %ctx.user,
                error = %err,
                "failed to store chat message, dropping"
            );
            return Dispatch::Handled;
        }

        envelope.insert("text", text);
        envelope.insert("sent_at", sent_at);
        Dispatch::deliver(envelope, Delivery::Everyone)
    }

    fn chat_history(&self, ctx: &RouteContext<'_>, envelope: &Envelope) -> Dispatch {
        let limit = envelope
            .get("limit")
            .and_then(Value::as_u64)
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));

        let records = match self.store.recent(ctx.room, limit) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(
                    room = %ctx.room,
                    user = %ctx.user,
                    error = %err,
                    "history lookup failed"
                );
                return Dispatch::Handled;
            },
        };

        let messages = match serde_json::to_value(&records) {
            Ok(messages) => messages,
            Err(err) => {
                tracing::warn!(room = %ctx.room, error = %err, "failed to encode chat history");
                return Dispatch::Handled;
            },
        };

        tracing::debug!(room = %ctx.room, user = %ctx.user, count = records.len(), "chat history");
        Dispatch::deliver(Envelope::new(CHAT_HISTORY).with("messages", messages), Delivery::Sender)
    }
}

impl<E, S> MessageRouter for ChatRouter<E, S>
where
    E: Environment,
    S: ChatStore,
{
    fn route(&self, ctx: &RouteContext<'_>, envelope: Envelope) -> Dispatch {
        match envelope.message_type() {
            CHAT_MESSAGE => self.chat_message(ctx, envelope),
            CHAT_HISTORY => self.chat_history(ctx, &envelope),
            _ => self.fallback.route(ctx, envelope),
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_core::{ConnectionId, RoomId, UserId};
    use serde_json::json;

    use super::*;
    use crate::{MemoryChatStore, SystemEnv};

    fn route(router: &ChatRouter<SystemEnv, MemoryChatStore>, value: Value) -> Dispatch {
        let room = RoomId::from("r");
        let user = UserId::from("alice");
        let ctx = RouteContext { room: &room, user: &user, connection: ConnectionId::new(1) };
        router.route(&ctx, Envelope::from_value(value).unwrap())
    }

    fn delivered(dispatch: Dispatch) -> (Envelope, Delivery) {
        match dispatch {
            Dispatch::Deliver { envelope, delivery } => (envelope, delivery),
            Dispatch::Handled => unreachable!("expected a delivery"),
        }
    }

    #[test]
    fn chat_message_goes_to_everyone() {
        let router = ChatRouter::new(SystemEnv::new(), MemoryChatStore::default());
        let (envelope, delivery) =
            delivered(route(&router, json!({"type": "chat_message", "text": " hi "})));

        assert_eq!(delivery, Delivery::Everyone);
        assert_eq!(envelope.get_str("text"), Some("hi"));
        assert!(envelope.get("sent_at").and_then(Value::as_u64).is_some());
    }

    #[test]
    fn blank_chat_message_is_handled() {
        let router = ChatRouter::new(SystemEnv::new(), MemoryChatStore::default());
        let blank = route(&router, json!({"type": "chat_message", "text": "   "}));
        assert_eq!(blank, Dispatch::Handled);
        assert_eq!(route(&router, json!({"type": "chat_message"})), Dispatch::Handled);
        assert_eq!(router.store().total_records(), 0);
    }

    #[test]
    fn other_types_fall_through() {
        let router = ChatRouter::new(SystemEnv::new(), MemoryChatStore::default());
        let answer = route(&router, json!({"type": "answer", "to_user_id": "bob"}));
        let (_, delivery) = delivered(answer);
        assert_eq!(delivery, Delivery::User(UserId::from("bob")));
    }
}
