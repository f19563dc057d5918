//! Connection record and lifecycle state machine.
//!
//! A [`Connection`] is created by the relay when a transport hands it a
//! channel, registered into its room, and torn down exactly once.
//!
//! # State Machine
//!
//! ```text
//! ┌────────────┐  register   ┌────────┐
//! │ Connecting │────────────>│ Active │
//! └────────────┘             └────────┘
//!       │                        │ close / error / evicted / failed send
//!       │ setup failed           ↓
//!       │                  ┌──────────┐ unregister ┌────────┐
//!       └─────────────────>│ Draining │───────────>│ Closed │
//!                          └──────────┘            └────────┘
//! ```
//!
//! `Closed` is terminal. A reconnect always creates a fresh `Connection`.
//!
//! # Invariants
//!
//! - Exactly one caller wins the move into `Draining`; that caller owns the
//!   rest of the teardown. Every other trigger sees `begin_drain() == false`
//!   and returns.
//! - Sends to one connection are serialized by its send lock, so two
//!   broadcasts reach it in the order they acquired the lock.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::{
    channel::Channel,
    error::{ConnectionError, InvariantViolation, TransportError},
    ids::{ConnectionId, RoomId, UserId},
};

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Accepted, not yet registered
    Connecting,
    /// Registered; a valid send target
    Active,
    /// Teardown in progress
    Draining,
    /// Torn down
    Closed,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Active | Self::Draining)
                | (Self::Active, Self::Draining)
                | (Self::Draining, Self::Closed)
        )
    }
}

/// Result of a send that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Payload handed to the channel
    Sent,
    /// Connection was no longer `Active`; nothing was sent
    Skipped,
}

/// One accepted duplex connection.
pub struct Connection {
    id: ConnectionId,
    room: RoomId,
    user: UserId,
    state: Mutex<ConnectionState>,
    channel: Arc<dyn Channel>,
    send_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    accepted_at: Instant,
}

impl Connection {
    /// Create a connection in [`ConnectionState::Connecting`].
    pub fn new(id: ConnectionId, room: RoomId, user: UserId, channel: Arc<dyn Channel>) -> Self {
        Self {
            id,
            room,
            user,
            state: Mutex::new(ConnectionState::Connecting),
            channel,
            send_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            accepted_at: Instant::now(),
        }
    }

    /// Connection handle.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Room this connection joined.
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Identity this connection carries.
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    /// Whether this connection is a valid send target.
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Time since the relay accepted this connection.
    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    /// Move to `to`, returning the previous state.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidTransition` if `to` is not reachable from
    ///   the current state
    pub fn transition(&self, to: ConnectionState) -> Result<ConnectionState, ConnectionError> {
        let mut state = self.lock_state();
        let from = *state;
        if !from.can_transition_to(to) {
            return Err(ConnectionError::InvalidTransition { from, to });
        }
        *state = to;
        Ok(from)
    }

    /// Claim the teardown.
    ///
    /// Moves `Connecting` or `Active` to `Draining` and returns true. Returns
    /// false if teardown was already claimed.
    pub fn begin_drain(&self) -> bool {
        self.transition(ConnectionState::Draining).is_ok()
    }

    /// Finish teardown: `Draining -> Closed`, stop the read loop and close the
    /// channel.
    ///
    /// Closing twice is a no-op (logged).
    pub fn close(&self, reason: &str) {
        if let Err(ConnectionError::InvalidTransition { from, to }) =
            self.transition(ConnectionState::Closed)
        {
            let violation = InvariantViolation::InvalidTransition { conn: self.id, from, to };
            tracing::warn!(%violation, "ignoring close");
            return;
        }

        self.cancel.cancel();
        self.channel.close(reason);
    }

    /// Signal the read loop to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether [`Connection::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the connection is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Send one message, serialized with every other send to this connection.
    ///
    /// Returns `SendStatus::Skipped` without touching the channel if the
    /// connection stopped being `Active` while the send waited for its turn.
    ///
    /// # Errors
    ///
    /// - `TransportError::Timeout` if `timeout` elapses first
    /// - any error the channel reports
    pub async fn send(
        &self,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<SendStatus, TransportError> {
        self.lock_sends().await.send(payload, timeout).await
    }

    /// Hold this connection's send lock across several sends.
    ///
    /// The relay takes it before registering a new connection so the private
    /// `existing_users` snapshot is the first thing the connection receives.
    pub(crate) async fn lock_sends(&self) -> SendGuard<'_> {
        SendGuard { conn: self, _guard: self.send_lock.lock().await }
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("room", &self.room)
            .field("user", &self.user)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Exclusive right to send on one connection.
pub(crate) struct SendGuard<'a> {
    conn: &'a Connection,
    _guard: tokio::sync::MutexGuard<'a, ()>,
}

impl SendGuard<'_> {
    pub(crate) async fn send(
        &self,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<SendStatus, TransportError> {
        if !self.conn.is_active() {
            return Ok(SendStatus::Skipped);
        }

        let send = self.conn.channel.send(payload);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| TransportError::Timeout(limit))??,
            None => send.await?,
        }

        Ok(SendStatus::Sent)
    }
}
