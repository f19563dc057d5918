//! Parley production server.
//!
//! Production server implementation using Quinn for QUIC transport, Tokio for
//! the async runtime, and system time for chat timestamps.
//!
//! # Architecture
//!
//! This crate is the production "glue" around [`parley_core::Relay`]: it
//! accepts QUIC connections, runs the join handshake, and hands each client's
//! stream to the relay as a [`parley_core::Channel`] /
//! [`parley_core::ChannelReader`] pair. All room state lives in the relay.
//!
//! # Components
//!
//! - [`Server`]: accept loop and per-connection handshake
//! - [`QuinnTransport`]: QUIC transport via Quinn library
//! - [`ChatRouter`]: chat persistence and history on top of the default relay
//! - [`MemoryChatStore`]: bounded in-memory chat history
//! - [`SystemEnv`]: production environment (real clocks)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chat;
mod error;
pub mod storage;
mod system_env;
mod transport;

use std::{net::SocketAddr, sync::Arc, time::Duration};

pub use chat::{CHAT_HISTORY, CHAT_MESSAGE, ChatRouter};
pub use error::ServerError;
use parley_core::{ChannelReader, Received, Relay, RelayConfig, RoomId, UserId};
use parley_proto::{DEFAULT_MAX_FRAME_SIZE, FrameCodec, JoinRequest};
pub use storage::{
    ChatRecord, ChatStore, DEFAULT_MAX_ROOMS, DEFAULT_RETENTION, MemoryChatStore, StorageError,
};
pub use system_env::SystemEnv;
pub use transport::{
    CLOSE_HANDSHAKE_FAILED, CLOSE_NORMAL, QuicChannel, QuicReader, QuinnConnection, QuinnTransport,
};

/// Default bound on a single send to a client.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a client has to open its stream and send the join request.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Time allowed for the join handshake
    pub handshake_timeout: Duration,
    /// Largest frame payload accepted or sent
    pub max_frame_size: usize,
    /// Chat messages kept per room
    pub chat_history_limit: usize,
    /// Rooms with chat history kept at once
    pub chat_max_rooms: usize,
    /// Relay configuration (send timeout; the message size limit is taken
    /// from `max_frame_size`)
    pub relay: RelayConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            chat_history_limit: DEFAULT_RETENTION,
            chat_max_rooms: DEFAULT_MAX_ROOMS,
            relay: RelayConfig::default().with_send_timeout(DEFAULT_SEND_TIMEOUT),
        }
    }
}

/// Per-connection settings shared by every connection task.
#[derive(Debug, Clone, Copy)]
struct ConnectionSettings {
    handshake_timeout: Duration,
    codec: FrameCodec,
}

/// Production Parley server.
///
/// Wraps a [`Relay`] routed through a [`ChatRouter`] with Quinn QUIC
/// transport.
pub struct Server {
    relay: Relay,
    transport: QuinnTransport,
    chat_store: MemoryChatStore,
    settings: ConnectionSettings,
}

impl Server {
    /// Create and bind a new server. Must be called within a Tokio runtime.
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let chat_store = MemoryChatStore::new(config.chat_history_limit)
            .with_max_rooms(config.chat_max_rooms);
        let router = ChatRouter::new(SystemEnv::new(), chat_store.clone());
        // Anything the relay sends must fit in one outbound frame
        let relay_config = config.relay.with_max_message_size(config.max_frame_size);
        let relay = Relay::with_router(relay_config, Arc::new(router));

        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        let settings = ConnectionSettings {
            handshake_timeout: config.handshake_timeout,
            codec: FrameCodec::new(config.max_frame_size),
        };

        Ok(Self { relay, transport, chat_store, settings })
    }

    /// The relay serving this server's rooms.
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Chat history shared with the router.
    pub fn chat_store(&self) -> &MemoryChatStore {
        &self.chat_store
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Stop accepting connections and close every open one.
    pub fn shutdown(&self) {
        self.transport.close();
    }

    /// Run the server, accepting connections until the endpoint closes.
    pub async fn run(&self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.local_addr()?, "server accepting connections");

        while let Some(incoming) = self.transport.accept().await {
            let relay = self.relay.clone();
            let settings = self.settings;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, relay, settings).await {
                    tracing::debug!(error = %e, "connection ended with error");
                }
            });
        }

        tracing::info!("endpoint closed, server stopped");
        Ok(())
    }
}

/// Handle a single QUIC connection from TLS handshake to teardown.
async fn handle_connection(
    incoming: quinn::Incoming,
    relay: Relay,
    settings: ConnectionSettings,
) -> Result<(), ServerError> {
    let handshake = async {
        let conn = QuinnConnection::establish(incoming).await?;
        let (send, recv) = conn.accept_bi().await?;
        let mut reader = QuicReader::new(recv, settings.codec);
        let join = read_join(&mut reader).await;
        Ok::<_, ServerError>((conn, send, reader, join))
    };

    let (conn, send, reader, join) =
        match tokio::time::timeout(settings.handshake_timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ServerError::Handshake(format!(
                    "no join request within {:?}",
                    settings.handshake_timeout
                )));
            },
        };

    let remote = conn.remote_addr();
    let join = match join {
        Ok(join) => join,
        Err(err) => {
            tracing::warn!(%remote, error = %err, "rejecting connection");
            conn.close(CLOSE_HANDSHAKE_FAILED, "invalid join request");
            return Err(err);
        },
    };

    tracing::debug!(%remote, room = %join.room_id, user = %join.user_id, "join request");

    let channel = Arc::new(QuicChannel::new(send, conn, settings.codec));
    let connection =
        relay.accept(channel, RoomId::from(join.room_id), UserId::from(join.user_id)).await?;
    relay.serve(connection, reader).await;

    Ok(())
}

/// Read and validate the first frame on a client's stream.
async fn read_join(reader: &mut QuicReader) -> Result<JoinRequest, ServerError> {
    match reader.recv().await {
        Received::Message(payload) => Ok(JoinRequest::decode(&payload)?),
        Received::Closed => Err(ServerError::Handshake("stream closed before join".to_string())),
        Received::Failed(err) => Err(ServerError::Transport(err.to_string())),
    }
}
