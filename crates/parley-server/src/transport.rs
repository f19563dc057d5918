//! Quinn-based QUIC transport implementation.
//!
//! Production QUIC transport using the Quinn library. Provides encrypted,
//! multiplexed streams over UDP with TLS 1.3. Supports both production TLS
//! certificates (via PEM files) and self-signed certificates for testing.
//!
//! # Connection layout
//!
//! A client opens exactly one bidirectional stream. Every message in either
//! direction is a length-prefixed frame ([`FrameCodec`]). The first inbound
//! frame is the join request; after that the send half becomes the relay's
//! [`Channel`] ([`QuicChannel`]) and the receive half its [`ChannelReader`]
//! ([`QuicReader`]).
//!
//! # Security
//!
//! The transport enforces TLS 1.3 via the `rustls` crate. ALPN is set to
//! "parley" to ensure protocol compatibility. Self-signed certificates are
//! only suitable for local testing.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parley_core::{Channel, ChannelReader, Received, TransportError};
use parley_proto::{ALPN_PROTOCOL, FrameCodec, LENGTH_PREFIX_SIZE};
use quinn::{
    ConnectionError, Endpoint, ReadError, ReadExactError, RecvStream, SendStream, ServerConfig,
    VarInt, WriteError,
};

use crate::error::ServerError;

/// Application close code for an orderly close.
pub const CLOSE_NORMAL: u32 = 0;

/// Application close code for a failed join handshake.
pub const CLOSE_HANDSHAKE_FAILED: u32 = 1;

/// QUIC transport using Quinn.
///
/// Provides a QUIC endpoint that can accept incoming connections. The endpoint
/// is configured with TLS 1.3 and ALPN protocol "parley".
pub struct QuinnTransport {
    /// Quinn endpoint
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Create and bind a new QUIC transport.
    ///
    /// If `cert_path` and `key_path` are provided, they will be used for TLS.
    /// Otherwise, a self-signed certificate will be generated for testing.
    pub fn bind(
        address: &str,
        cert_path: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let server_config = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_tls_config(cert, key)?,
            _ => generate_self_signed_config()?,
        };

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ServerError::Transport(format!("failed to create endpoint: {e}")))?;

        tracing::info!(%addr, "QUIC transport bound");

        Ok(Self { endpoint })
    }

    /// Wait for the next incoming connection attempt.
    ///
    /// Returns `None` once the endpoint is closed. The TLS handshake has not
    /// run yet; see [`QuinnConnection::establish`].
    pub async fn accept(&self) -> Option<quinn::Incoming> {
        self.endpoint.accept().await
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }

    /// Stop accepting and close every connection.
    pub fn close(&self) {
        self.endpoint.close(VarInt::from_u32(CLOSE_NORMAL), b"server shutting down");
    }
}

/// A QUIC connection wrapper.
///
/// Clones are cheap and share the same underlying QUIC connection.
#[derive(Clone)]
pub struct QuinnConnection {
    connection: quinn::Connection,
}

impl QuinnConnection {
    /// Complete the QUIC/TLS handshake for an incoming attempt.
    pub async fn establish(incoming: quinn::Incoming) -> Result<Self, ServerError> {
        let connection = incoming
            .await
            .map_err(|e| ServerError::Transport(format!("connection failed: {e}")))?;
        Ok(Self { connection })
    }

    /// Accept the client's bidirectional stream.
    pub async fn accept_bi(&self) -> Result<(SendStream, RecvStream), ServerError> {
        self.connection
            .accept_bi()
            .await
            .map_err(|e| ServerError::Transport(format!("accept_bi failed: {e}")))
    }

    /// Remote peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Close the connection with an application code and reason.
    pub fn close(&self, code: u32, reason: &str) {
        self.connection.close(VarInt::from_u32(code), reason.as_bytes());
    }
}

/// Outbound half of a client's stream.
pub struct QuicChannel {
    stream: tokio::sync::Mutex<SendStream>,
    connection: QuinnConnection,
    codec: FrameCodec,
}

impl QuicChannel {
    /// Wrap the send half of `connection`'s stream.
    pub fn new(stream: SendStream, connection: QuinnConnection, codec: FrameCodec) -> Self {
        Self { stream: tokio::sync::Mutex::new(stream), connection, codec }
    }
}

#[async_trait]
impl Channel for QuicChannel {
    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        let frame =
            self.codec.encode_to_bytes(&payload).map_err(|e| TransportError::Io(e.to_string()))?;

        let mut stream = self.stream.lock().await;
        stream.write_all(&frame).await.map_err(write_error)
    }

    fn close(&self, reason: &str) {
        self.connection.close(CLOSE_NORMAL, reason);
    }
}

/// Inbound half of a client's stream.
///
/// A pending receive may be dropped between frames without losing data.
/// Dropping it mid-frame loses the partial frame, which only happens when
/// the connection is being torn down anyway.
pub struct QuicReader {
    stream: RecvStream,
    codec: FrameCodec,
}

impl QuicReader {
    /// Wrap the receive half of a client's stream.
    pub fn new(stream: RecvStream, codec: FrameCodec) -> Self {
        Self { stream, codec }
    }
}

#[async_trait]
impl ChannelReader for QuicReader {
    async fn recv(&mut self) -> Received {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        if let Err(err) = self.stream.read_exact(&mut prefix).await {
            return read_failure(err, true);
        }

        let len = match self.codec.payload_len(prefix) {
            Ok(len) => len,
            Err(err) => return Received::Failed(TransportError::Io(err.to_string())),
        };

        let mut payload = vec![0u8; len];
        if let Err(err) = self.stream.read_exact(&mut payload).await {
            return read_failure(err, false);
        }

        Received::Message(Bytes::from(payload))
    }
}

/// Classify a failed read. A stream finished cleanly between frames is an
/// orderly close; anything else is a failure.
fn read_failure(err: ReadExactError, at_frame_boundary: bool) -> Received {
    match err {
        ReadExactError::FinishedEarly(0) if at_frame_boundary => Received::Closed,
        ReadExactError::FinishedEarly(read) => Received::Failed(TransportError::Io(format!(
            "stream finished mid-frame after {read} bytes"
        ))),
        ReadExactError::ReadError(ReadError::ConnectionLost(
            ConnectionError::ApplicationClosed(_) | ConnectionError::LocallyClosed,
        )) => Received::Closed,
        ReadExactError::ReadError(err) => Received::Failed(TransportError::Io(err.to_string())),
    }
}

fn write_error(err: WriteError) -> TransportError {
    match err {
        WriteError::Stopped(_)
        | WriteError::ClosedStream
        | WriteError::ConnectionLost(
            ConnectionError::ApplicationClosed(_) | ConnectionError::LocallyClosed,
        ) => TransportError::Closed,
        err => TransportError::Io(err.to_string()),
    }
}

/// Load TLS configuration from certificate and key files.
fn load_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, ServerError> {
    use std::fs;

    let cert_pem = fs::read(cert_path)
        .map_err(|e| ServerError::Config(format!("failed to read cert '{cert_path}': {e}")))?;

    let key_pem = fs::read(key_path)
        .map_err(|e| ServerError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config("no private key found".to_string()))?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    quic_server_config(tls_config)
}

/// Generate a self-signed certificate for testing.
fn generate_self_signed_config() -> Result<ServerConfig, ServerError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let cert_chain = vec![cert.cert.der().clone()];
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key.into())
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    tracing::warn!("using self-signed certificate, not for production use");

    quic_server_config(tls_config)
}

fn quic_server_config(mut tls_config: rustls::ServerConfig) -> Result<ServerConfig, ServerError> {
    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
        .map_err(|e| ServerError::Config(format!("QUIC config error: {e}")))?;

    Ok(ServerConfig::with_crypto(Arc::new(crypto)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transport_binds_with_self_signed() {
        let transport = QuinnTransport::bind("127.0.0.1:0", None, None);
        assert!(transport.is_ok(), "Transport should bind with self-signed cert");

        let transport = transport.unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0, "Should have assigned a port");
    }

    #[tokio::test]
    async fn transport_rejects_invalid_address() {
        let result = QuinnTransport::bind("invalid:address:format", None, None);
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn transport_rejects_missing_cert_files() {
        let result = QuinnTransport::bind(
            "127.0.0.1:0",
            Some("/nonexistent/cert.pem"),
            Some("/nonexistent/key.pem"),
        );
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn clean_finish_between_frames_is_close() {
        assert_eq!(read_failure(ReadExactError::FinishedEarly(0), true), Received::Closed);
        assert!(matches!(
            read_failure(ReadExactError::FinishedEarly(0), false),
            Received::Failed(TransportError::Io(_))
        ));
        assert!(matches!(
            read_failure(ReadExactError::FinishedEarly(2), true),
            Received::Failed(TransportError::Io(_))
        ));
    }

    #[test]
    fn stopped_stream_is_closed() {
        assert_eq!(write_error(WriteError::Stopped(VarInt::from_u32(0))), TransportError::Closed);
        assert_eq!(write_error(WriteError::ClosedStream), TransportError::Closed);
    }
}
