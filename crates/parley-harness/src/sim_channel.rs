//! In-memory channels and simulated peers.
//!
//! [`SimChannel`] records everything the relay sends and can be told to fail
//! or stall. [`SimReader`] is fed from a test through an unbounded queue.
//! [`SimPeer`] wires both to a [`Relay`] the way a transport would: accept,
//! then spawn the read loop.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parley_core::{
    Channel, ChannelReader, Connection, ConnectionError, ConnectionId, Received, Relay, RoomId,
    TransportError, UserId,
};
use parley_proto::Envelope;
use tokio::{sync::mpsc, task::JoinHandle};

/// Polling interval for [`eventually`].
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Polls before [`eventually`] gives up.
const POLL_ATTEMPTS: usize = 2_500;

#[derive(Debug, Default)]
struct ChannelState {
    sent: Vec<Bytes>,
    fail: bool,
    stall: bool,
    close_reason: Option<String>,
    close_calls: usize,
}

/// Recording outbound channel with failure injection.
#[derive(Debug, Default)]
pub struct SimChannel {
    state: Mutex<ChannelState>,
}

impl SimChannel {
    /// Create a healthy channel.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every later send fail with an I/O error.
    pub fn fail_sends(&self) {
        self.lock().fail = true;
    }

    /// Make every later send hang forever.
    pub fn stall_sends(&self) {
        self.lock().stall = true;
    }

    /// Raw payloads sent so far, in order.
    pub fn sent(&self) -> Vec<Bytes> {
        self.lock().sent.clone()
    }

    /// Sent payloads decoded as envelopes.
    pub fn messages(&self) -> Vec<Envelope> {
        self.sent().iter().filter_map(|p| Envelope::decode(p).ok()).collect()
    }

    /// Sent envelopes whose `type` is `message_type`.
    pub fn messages_of_type(&self, message_type: &str) -> Vec<Envelope> {
        self.messages().into_iter().filter(|m| m.message_type() == message_type).collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.lock().sent.clear();
    }

    /// Reason given on the first close. `None` while open.
    pub fn close_reason(&self) -> Option<String> {
        self.lock().close_reason.clone()
    }

    /// How many times `close` was called.
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Channel for SimChannel {
    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        let (fail, stall, closed) = {
            let state = self.lock();
            (state.fail, state.stall, state.close_reason.is_some())
        };

        if stall {
            std::future::pending::<()>().await;
        }
        if closed {
            return Err(TransportError::Closed);
        }
        if fail {
            return Err(TransportError::Io("injected send failure".to_string()));
        }

        self.lock().sent.push(payload);
        Ok(())
    }

    fn close(&self, reason: &str) {
        let mut state = self.lock();
        state.close_calls += 1;
        if state.close_reason.is_none() {
            state.close_reason = Some(reason.to_string());
        }
    }
}

/// Scripted inbound channel.
#[derive(Debug)]
pub struct SimReader {
    rx: mpsc::UnboundedReceiver<Received>,
}

impl SimReader {
    /// Create a reader and the sender that feeds it.
    pub fn pair() -> (mpsc::UnboundedSender<Received>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl ChannelReader for SimReader {
    async fn recv(&mut self) -> Received {
        self.rx.recv().await.unwrap_or(Received::Closed)
    }
}

/// A simulated client connected to a relay.
pub struct SimPeer {
    relay: Relay,
    channel: Arc<SimChannel>,
    inbound: mpsc::UnboundedSender<Received>,
    conn: Arc<Connection>,
    task: JoinHandle<()>,
}

impl SimPeer {
    /// Connect `user` to `room` and start its read loop.
    pub async fn join(relay: &Relay, room: &str, user: &str) -> Result<Self, ConnectionError> {
        Self::join_with(relay, room, user, SimChannel::new()).await
    }

    /// Like [`SimPeer::join`], over a channel the test prepared (for example
    /// one that already fails).
    pub async fn join_with(
        relay: &Relay,
        room: &str,
        user: &str,
        channel: Arc<SimChannel>,
    ) -> Result<Self, ConnectionError> {
        let outbound: Arc<dyn Channel> = Arc::clone(&channel) as Arc<dyn Channel>;
        let conn = relay.accept(outbound, RoomId::from(room), UserId::from(user)).await?;

        let (inbound, reader) = SimReader::pair();
        let task = tokio::spawn({
            let relay = relay.clone();
            let conn = Arc::clone(&conn);
            async move { relay.serve(conn, reader).await }
        });

        Ok(Self { relay: relay.clone(), channel, inbound, conn, task })
    }

    /// The relay-side connection record.
    pub fn conn(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Connection handle.
    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Outbound channel (what the relay sent this peer).
    pub fn channel(&self) -> &Arc<SimChannel> {
        &self.channel
    }

    /// Messages the relay sent this peer.
    pub fn messages(&self) -> Vec<Envelope> {
        self.channel.messages()
    }

    /// Messages of one type the relay sent this peer.
    pub fn messages_of_type(&self, message_type: &str) -> Vec<Envelope> {
        self.channel.messages_of_type(message_type)
    }

    /// Queue a JSON message on the peer's read loop.
    pub fn send_json(&self, message: &serde_json::Value) {
        self.send_raw(Bytes::from(message.to_string()));
    }

    /// Queue raw bytes on the peer's read loop.
    pub fn send_raw(&self, payload: Bytes) {
        self.push(Received::Message(payload));
    }

    /// Route a JSON message inline, bypassing the read loop, and return once
    /// every resulting send has completed.
    pub async fn process_json(&self, message: &serde_json::Value) {
        self.relay.handle_message(&self.conn, message.to_string().as_bytes()).await;
    }

    /// Simulate the peer closing cleanly.
    pub fn hang_up(&self) {
        self.push(Received::Closed);
    }

    /// Simulate a receive error.
    pub fn fail_recv(&self, err: TransportError) {
        self.push(Received::Failed(err));
    }

    /// Drop the read loop mid-flight.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the read loop to exit.
    ///
    /// A panic inside the read loop is re-raised here so the test fails with
    /// the original message. A loop stopped with [`SimPeer::abort`] returns
    /// normally.
    pub async fn finished(self) {
        if let Err(err) = self.task.await {
            if err.is_panic() {
                std::panic::resume_unwind(err.into_panic());
            }
        }
    }

    fn push(&self, received: Received) {
        if self.inbound.send(received).is_err() {
            tracing::debug!(conn = %self.conn.id(), "read loop already exited");
        }
    }
}

/// Poll `condition` until it holds, yielding to the runtime between polls.
///
/// Returns false if it still does not hold after a few seconds of (possibly
/// virtual) time.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..POLL_ATTEMPTS {
        if condition() {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    condition()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_records_until_failed() {
        let channel = SimChannel::new();
        channel.send(Bytes::from_static(br#"{"type":"a"}"#)).await.unwrap();

        channel.fail_sends();
        let result = channel.send(Bytes::from_static(br#"{"type":"b"}"#)).await;
        assert!(matches!(result, Err(TransportError::Io(_))));

        assert_eq!(channel.messages().len(), 1);
        assert_eq!(channel.messages()[0].message_type(), "a");
    }

    #[tokio::test]
    async fn closed_channel_rejects_sends() {
        let channel = SimChannel::new();
        channel.close("bye");
        channel.close("again");

        assert_eq!(channel.close_reason().as_deref(), Some("bye"));
        assert_eq!(channel.close_calls(), 2);
        assert_eq!(channel.send(Bytes::new()).await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn reader_reports_closed_when_sender_dropped() {
        let (tx, mut reader) = SimReader::pair();
        tx.send(Received::Message(Bytes::from_static(b"x"))).unwrap();
        drop(tx);

        assert_eq!(reader.recv().await, Received::Message(Bytes::from_static(b"x")));
        assert_eq!(reader.recv().await, Received::Closed);
    }
}
