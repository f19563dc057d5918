//! Broadcast engine: fan one payload out to many connections.
//!
//! The engine snapshots a room's members, releases the room, and then sends
//! to every recipient concurrently. A failed or timed-out send is reported in
//! the [`BroadcastReport`] and never aborts delivery to the others; the caller
//! decides what to do with failures (the relay tears them down).

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::future::join_all;

use crate::{
    connection::{Connection, SendStatus},
    error::TransportError,
    ids::{ConnectionId, RoomId},
    registry::Registry,
};

/// What happened to one fan-out.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Recipients a send was attempted for
    pub attempted: usize,
    /// Sends the channel accepted
    pub delivered: usize,
    /// Recipients that were no longer `Active` when their turn came
    pub skipped: usize,
    /// Recipients whose send failed, with the error
    pub failed: Vec<(Arc<Connection>, TransportError)>,
}

impl BroadcastReport {
    /// Whether any send failed.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Fans payloads out to room members.
#[derive(Debug, Clone)]
pub struct BroadcastEngine {
    registry: Arc<Registry>,
    send_timeout: Option<Duration>,
}

impl BroadcastEngine {
    /// Create an engine over `registry`.
    pub fn new(registry: Arc<Registry>, send_timeout: Option<Duration>) -> Self {
        Self { registry, send_timeout }
    }

    /// Send `payload` to every member of `room` not listed in `exclude`.
    ///
    /// A room that does not exist yields an empty report.
    pub async fn broadcast(
        &self,
        room: &RoomId,
        payload: Bytes,
        exclude: &[ConnectionId],
    ) -> BroadcastReport {
        let recipients: Vec<_> = self
            .registry
            .members(room)
            .into_iter()
            .filter(|c| !exclude.contains(&c.id()))
            .collect();

        self.deliver(recipients, payload).await
    }

    /// Send `payload` to each of `recipients`, concurrently.
    ///
    /// Every recipient sees the same `Bytes`. At most one attempt is made
    /// per recipient.
    pub async fn deliver(
        &self,
        recipients: Vec<Arc<Connection>>,
        payload: Bytes,
    ) -> BroadcastReport {
        let sends = recipients.iter().map(|conn| conn.send(payload.clone(), self.send_timeout));
        let outcomes = join_all(sends).await;

        let mut report = BroadcastReport { attempted: recipients.len(), ..Default::default() };
        for (conn, outcome) in recipients.into_iter().zip(outcomes) {
            match outcome {
                Ok(SendStatus::Sent) => report.delivered += 1,
                Ok(SendStatus::Skipped) => report.skipped += 1,
                Err(err) => {
                    tracing::debug!(
                        room = %conn.room(),
                        user = %conn.user(),
                        conn = %conn.id(),
                        error = %err,
                        "send failed"
                    );
                    report.failed.push((conn, err));
                },
            }
        }
        report
    }

    /// Send `payload` to one connection.
    pub async fn send_to(
        &self,
        conn: &Connection,
        payload: Bytes,
    ) -> Result<SendStatus, TransportError> {
        conn.send(payload, self.send_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{channel::Channel, ids::UserId};

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<Bytes>>,
        fail: bool,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Closed);
            }
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }

        fn close(&self, _reason: &str) {}
    }

    struct Fixture {
        engine: BroadcastEngine,
        registry: Arc<Registry>,
        room: RoomId,
        next_id: u64,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(Registry::new());
            let engine = BroadcastEngine::new(Arc::clone(&registry), None);
            Self { engine, registry, room: RoomId::from("r"), next_id: 1 }
        }

        fn join(&mut self, user: &str, fail: bool) -> (Arc<Connection>, Arc<RecordingChannel>) {
            let channel = Arc::new(RecordingChannel { fail, ..Default::default() });
            let id = ConnectionId::new(self.next_id);
            self.next_id += 1;
            let conn = Arc::new(Connection::new(
                id,
                self.room.clone(),
                UserId::from(user),
                Arc::clone(&channel) as Arc<dyn Channel>,
            ));
            self.registry.register(&conn).unwrap();
            (conn, channel)
        }
    }

    #[tokio::test]
    async fn excluded_members_are_not_attempted() {
        let mut fx = Fixture::new();
        let (c, c_chan) = fx.join("c", false);
        let (_, d_chan) = fx.join("d", false);
        let (_, e_chan) = fx.join("e", false);

        let payload = Bytes::from_static(b"{\"type\":\"x\"}");
        let report = fx.engine.broadcast(&fx.room, payload.clone(), &[c.id()]).await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 2);
        assert!(c_chan.sent.lock().unwrap().is_empty());
        assert_eq!(*d_chan.sent.lock().unwrap(), vec![payload.clone()]);
        assert_eq!(*e_chan.sent.lock().unwrap(), vec![payload]);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_rest() {
        let mut fx = Fixture::new();
        let (d, _) = fx.join("d", true);
        let (_, e_chan) = fx.join("e", false);

        let report = fx.engine.broadcast(&fx.room, Bytes::from_static(b"{}"), &[]).await;

        assert_eq!(report.delivered, 1);
        assert!(report.has_failures());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.id(), d.id());
        assert_eq!(report.failed[0].1, TransportError::Closed);
        assert_eq!(e_chan.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn draining_members_are_skipped() {
        let mut fx = Fixture::new();
        let (d, d_chan) = fx.join("d", false);
        assert!(d.begin_drain());

        let report = fx.engine.broadcast(&fx.room, Bytes::from_static(b"{}"), &[]).await;

        assert_eq!(report.attempted, 1);
        assert_eq!(report.skipped, 1);
        assert!(d_chan.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_room_is_empty_report() {
        let fx = Fixture::new();
        let report = fx.engine.broadcast(&RoomId::from("nowhere"), Bytes::new(), &[]).await;
        assert_eq!(report.attempted, 0);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn send_to_reaches_one_connection() {
        let mut fx = Fixture::new();
        let (d, d_chan) = fx.join("d", false);
        let (_, e_chan) = fx.join("e", false);

        let status = fx.engine.send_to(&d, Bytes::from_static(b"{}")).await;

        assert_eq!(status, Ok(SendStatus::Sent));
        assert_eq!(d_chan.sent.lock().unwrap().len(), 1);
        assert!(e_chan.sent.lock().unwrap().is_empty());
    }
}
