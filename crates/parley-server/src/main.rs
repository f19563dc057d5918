//! Parley server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate (development)
//! parley-server --bind 0.0.0.0:4433
//!
//! # Start with TLS certificate (production)
//! parley-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem
//! ```

use std::time::Duration;

use clap::Parser;
use parley_core::RelayConfig;
use parley_proto::DEFAULT_MAX_FRAME_SIZE;
use parley_server::{DEFAULT_MAX_ROOMS, DEFAULT_RETENTION, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley room relay server
#[derive(Parser, Debug)]
#[command(name = "parley-server")]
#[command(about = "Parley room signaling relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Upper bound on a single send to a client, in milliseconds (0 disables)
    #[arg(long, default_value = "5000")]
    send_timeout_ms: u64,

    /// Time a client has to send its join request, in milliseconds
    #[arg(long, default_value = "10000")]
    handshake_timeout_ms: u64,

    /// Largest frame payload accepted or sent, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Chat messages kept per room
    #[arg(long, default_value_t = DEFAULT_RETENTION)]
    chat_history_limit: usize,

    /// Rooms with chat history kept at once; the least recently written is
    /// dropped first
    #[arg(long, default_value_t = DEFAULT_MAX_ROOMS)]
    chat_max_rooms: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn runtime_config(self) -> ServerRuntimeConfig {
        let relay = match self.send_timeout_ms {
            0 => RelayConfig::default(),
            ms => RelayConfig::default().with_send_timeout(Duration::from_millis(ms)),
        };

        ServerRuntimeConfig {
            bind_address: self.bind,
            cert_path: self.cert,
            key_path: self.key,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            max_frame_size: self.max_frame_size,
            chat_history_limit: self.chat_history_limit,
            chat_max_rooms: self.chat_max_rooms,
            relay,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(bind = %args.bind, "parley server starting");

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("no TLS certificate provided, using self-signed certificate");
    }

    let server = Server::bind(args.runtime_config())?;

    tracing::info!(addr = %server.local_addr()?, "server listening");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            server.shutdown();
        },
    }

    Ok(())
}
