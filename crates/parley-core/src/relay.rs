//! Lifecycle controller.
//!
//! [`Relay`] is the only writer of registry state. It drives each connection
//! through `Connecting -> Active -> Draining -> Closed`:
//!
//! - [`Relay::accept`] registers a connection, closes any connection it
//!   replaces, sends it the private `existing_users` snapshot and announces
//!   `user_joined` to the rest of the room.
//! - [`Relay::serve`] runs the connection's read loop and routes every inbound
//!   message.
//! - Teardown (peer close, receive error, failed send, explicit
//!   [`Relay::disconnect`]) unregisters the connection and announces
//!   `user_left` when the identity's last connection goes.
//!
//! # Invariants
//!
//! - Teardown runs once per connection no matter how many triggers race: the
//!   trigger that wins `begin_drain` does the work, the rest return.
//! - Sends discovered to fail while announcing `user_left` are torn down from
//!   a work-list, so a cascade of dead peers never recurses.
//! - Every exit from [`Relay::serve`] reaches teardown, including the serving
//!   future being dropped.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use parley_proto::{Envelope, LifecycleEvent, ProtocolError};

use crate::{
    broadcast::{BroadcastEngine, BroadcastReport},
    channel::{Channel, ChannelReader, Received},
    connection::Connection,
    error::ConnectionError,
    ids::{ConnectionId, RoomId, UserId},
    registry::Registry,
    router::{DefaultRouter, Delivery, Dispatch, MessageRouter, RouteContext},
};

/// Relay configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayConfig {
    /// Upper bound on a single send. `None` waits for the transport to report
    /// an error, however long that takes.
    pub send_timeout: Option<Duration>,
    /// Largest encoded message the transport can carry. Outbound messages
    /// over it are dropped before any send is attempted. `None` is unbounded.
    pub max_message_size: Option<usize>,
}

impl RelayConfig {
    /// Set the per-send bound.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set the outbound message size limit.
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = Some(max);
        self
    }
}

/// Room relay handle.
///
/// Cheap to clone; clones share the registry. One is passed into every
/// connection task.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<Registry>,
    broadcaster: BroadcastEngine,
    router: Arc<dyn MessageRouter>,
    config: RelayConfig,
    next_id: AtomicU64,
}

/// One pending teardown.
struct Teardown {
    conn: Arc<Connection>,
    reason: String,
}

impl Teardown {
    fn new(conn: Arc<Connection>, reason: impl Into<String>) -> Self {
        Self { conn, reason: reason.into() }
    }
}

impl Relay {
    /// Create a relay that routes with [`DefaultRouter`].
    pub fn new(config: RelayConfig) -> Self {
        Self::with_router(config, Arc::new(DefaultRouter))
    }

    /// Create a relay with a custom message router.
    pub fn with_router(config: RelayConfig, router: Arc<dyn MessageRouter>) -> Self {
        let registry = Arc::new(Registry::new());
        let broadcaster = BroadcastEngine::new(Arc::clone(&registry), config.send_timeout);
        Self {
            inner: Arc::new(Inner {
                registry,
                broadcaster,
                router,
                config,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Shared registry.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Configuration this relay was built with.
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Admit a connection whose transport handshake has completed.
    ///
    /// On return the connection is `Active`, has been sent `existing_users`
    /// as its first message, and the room has been told it joined (unless the
    /// identity was already present through a connection this one replaced).
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Transport` if the `existing_users` send failed; the
    ///   connection has already been torn down
    pub async fn accept(
        &self,
        channel: Arc<dyn Channel>,
        room: RoomId,
        user: UserId,
    ) -> Result<Arc<Connection>, ConnectionError> {
        let id = ConnectionId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Connection::new(id, room, user, channel));

        // Nothing reaches the new connection before its snapshot
        let sends = conn.lock_sends().await;
        let registration = self.inner.registry.register(&conn)?;

        if let Some(stale) = &registration.evicted {
            stale.close("replaced by a newer connection");
            tracing::info!(
                room = %conn.room(),
                user = %conn.user(),
                conn = %conn.id(),
                replaced = %stale.id(),
                "replaced previous connection"
            );
        }

        let existing = registration.existing_users.len();
        let snapshot = LifecycleEvent::ExistingUsers {
            users: registration.existing_users.into_iter().map(String::from).collect(),
        };
        let sent = match snapshot.encode().and_then(|payload| self.within_limit(payload)) {
            Ok(payload) => sends
                .send(payload, self.inner.config.send_timeout)
                .await
                .map_err(ConnectionError::from),
            Err(err) => Err(ConnectionError::from(err)),
        };
        drop(sends);

        if let Err(err) = sent {
            tracing::warn!(
                room = %conn.room(),
                user = %conn.user(),
                conn = %conn.id(),
                error = %err,
                "failed to send existing_users"
            );
            // Others may already have seen this identity in their own
            // snapshot, so its departure is announced even without a join
            self.disconnect(&conn, "initial send failed").await;
            return Err(err);
        }

        tracing::info!(
            room = %conn.room(),
            user = %conn.user(),
            conn = %conn.id(),
            existing,
            newly_present = registration.newly_present,
            "connection joined"
        );

        if registration.newly_present {
            let joined = LifecycleEvent::UserJoined { user_id: conn.user().to_string() };
            self.announce(conn.room(), &joined, &[conn.id()]).await;
        }

        Ok(conn)
    }

    /// Run `conn`'s read loop until the peer goes away or the connection is
    /// cancelled, then tear it down.
    pub async fn serve<R>(&self, conn: Arc<Connection>, mut reader: R)
    where
        R: ChannelReader,
    {
        let mut guard = ServeGuard { relay: self.clone(), conn: Some(Arc::clone(&conn)) };

        let reason = loop {
            tokio::select! {
                biased;

                () = conn.cancelled() => break "cancelled".to_string(),

                received = reader.recv() => match received {
                    Received::Message(payload) => self.handle_message(&conn, &payload).await,
                    Received::Closed => break "closed by peer".to_string(),
                    Received::Failed(err) => break format!("receive failed: {err}"),
                },
            }
        };

        guard.disarm();
        self.disconnect(&conn, &reason).await;
    }

    /// Validate, stamp and route one inbound message from `conn`.
    ///
    /// Malformed or reserved messages are logged and dropped; the connection
    /// stays `Active`. Messages from a connection that is no longer `Active`
    /// are dropped too.
    pub async fn handle_message(&self, conn: &Arc<Connection>, payload: &[u8]) {
        if !conn.is_active() {
            tracing::debug!(
                conn = %conn.id(),
                state = ?conn.state(),
                "ignoring message from inactive connection"
            );
            return;
        }

        let mut envelope = match Envelope::decode_inbound(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(
                    room = %conn.room(),
                    user = %conn.user(),
                    conn = %conn.id(),
                    error = %err,
                    "dropping message"
                );
                return;
            },
        };
        envelope.set_sender(conn.user().as_str());

        let ctx = RouteContext { room: conn.room(), user: conn.user(), connection: conn.id() };
        match self.inner.router.route(&ctx, envelope) {
            Dispatch::Deliver { envelope, delivery } => {
                self.dispatch(conn, &envelope, delivery).await;
            },
            Dispatch::Handled => {},
        }
    }

    /// Send `envelope` to every member of `room` not in `exclude`.
    ///
    /// Recipients whose send fails are torn down before this returns; they
    /// are still listed in the report. A room that does not exist yields an
    /// empty report.
    pub async fn broadcast(
        &self,
        room: &RoomId,
        envelope: &Envelope,
        exclude: &[ConnectionId],
    ) -> Result<BroadcastReport, ProtocolError> {
        let payload = self.within_limit(envelope.encode()?)?;
        let report = self.inner.broadcaster.broadcast(room, payload, exclude).await;
        self.reap(&report).await;
        Ok(report)
    }

    /// Tear `conn` down. Idempotent.
    pub async fn disconnect(&self, conn: &Arc<Connection>, reason: &str) {
        self.teardown(vec![Teardown::new(Arc::clone(conn), reason)]).await;
    }

    async fn dispatch(&self, sender: &Arc<Connection>, envelope: &Envelope, delivery: Delivery) {
        // Stamping can push a message that arrived within the limit over it
        let payload = match envelope.encode().and_then(|payload| self.within_limit(payload)) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(
                    room = %sender.room(),
                    user = %sender.user(),
                    conn = %sender.id(),
                    message_type = envelope.message_type(),
                    error = %err,
                    "dropping message"
                );
                return;
            },
        };

        let broadcaster = &self.inner.broadcaster;
        let report = match delivery {
            Delivery::Others => broadcaster.broadcast(sender.room(), payload, &[sender.id()]).await,
            Delivery::Everyone => broadcaster.broadcast(sender.room(), payload, &[]).await,
            Delivery::Sender => {
                if let Err(err) = broadcaster.send_to(sender, payload).await {
                    tracing::debug!(conn = %sender.id(), error = %err, "reply failed");
                    self.disconnect(sender, "send failed").await;
                }
                return;
            },
            Delivery::User(target) => {
                match self.inner.registry.find_active(sender.room(), &target) {
                    Some(recipient) => broadcaster.deliver(vec![recipient], payload).await,
                    None => {
                        tracing::debug!(
                            room = %sender.room(),
                            from = %sender.user(),
                            to = %target,
                            "recipient not present, dropping message"
                        );
                        return;
                    },
                }
            },
        };

        self.reap(&report).await;
    }

    /// Send a relay-generated event to the room.
    async fn announce(&self, room: &RoomId, event: &LifecycleEvent, exclude: &[ConnectionId]) {
        let Some(payload) = self.encode_event(event) else {
            return;
        };
        let report = self.inner.broadcaster.broadcast(room, payload, exclude).await;
        self.reap(&report).await;
    }

    async fn reap(&self, report: &BroadcastReport) {
        if !report.has_failures() {
            return;
        }
        let pending =
            report.failed.iter().map(|(conn, _)| Teardown::new(Arc::clone(conn), "send failed"));
        self.teardown(pending.collect()).await;
    }

    async fn teardown(&self, mut pending: Vec<Teardown>) {
        while let Some(Teardown { conn, reason }) = pending.pop() {
            if !conn.begin_drain() {
                continue;
            }

            conn.cancel();
            let unregistration = self.inner.registry.unregister(&conn);
            conn.close(&reason);

            tracing::info!(
                room = %conn.room(),
                user = %conn.user(),
                conn = %conn.id(),
                reason = %reason,
                connected_for = ?conn.age(),
                identity_left = unregistration.identity_left,
                room_collected = unregistration.room_collected,
                "connection closed"
            );

            if !unregistration.identity_left {
                continue;
            }

            let left = LifecycleEvent::UserLeft { user_id: conn.user().to_string() };
            let Some(payload) = self.encode_event(&left) else {
                continue;
            };
            let report = self.inner.broadcaster.broadcast(conn.room(), payload, &[]).await;
            pending.extend(
                report.failed.into_iter().map(|(failed, _)| Teardown::new(failed, "send failed")),
            );
        }
    }

    /// Reject `payload` if the transport could not carry it.
    fn within_limit(&self, payload: Bytes) -> Result<Bytes, ProtocolError> {
        match self.inner.config.max_message_size {
            Some(max) if payload.len() > max => {
                Err(ProtocolError::FrameTooLarge { size: payload.len(), max })
            },
            _ => Ok(payload),
        }
    }

    fn encode_event(&self, event: &LifecycleEvent) -> Option<Bytes> {
        match event.encode().and_then(|payload| self.within_limit(payload)) {
            Ok(payload) => Some(payload),
            Err(err) => {
                tracing::warn!(event = event.message_type(), error = %err, "dropping event");
                None
            },
        }
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.inner.config)
            .field("rooms", &self.inner.registry.room_count())
            .finish_non_exhaustive()
    }
}

/// Schedules teardown if [`Relay::serve`] is dropped before finishing.
struct ServeGuard {
    relay: Relay,
    conn: Option<Arc<Connection>>,
}

impl ServeGuard {
    fn disarm(&mut self) {
        self.conn = None;
    }
}

impl Drop for ServeGuard {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let relay = self.relay.clone();
                handle.spawn(async move {
                    relay.disconnect(&conn, "read loop aborted").await;
                });
            },
            // Runtime is gone: nobody is left to announce to, just release
            // the registry slot
            Err(_) => {
                if conn.begin_drain() {
                    self.relay.registry().unregister(&conn);
                    conn.close("read loop aborted");
                }
            },
        }
    }
}

