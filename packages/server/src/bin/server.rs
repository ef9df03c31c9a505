//! Partyline presence relay server.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin partyline-server -- --port 4000 --room party
//! ```

use clap::Parser;
use partyline_server::ServerConfig;
use partyline_shared::logger::setup_logger;

#[derive(Debug, Parser)]
#[command(version, about = "Presence and team-coordination relay")]
struct Args {
    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(short, long, default_value_t = 4000)]
    port: u16,

    /// Room code accepted at authentication (repeatable)
    #[arg(long = "room", default_value = "party")]
    rooms: Vec<String>,

    /// Signaling timeout handed to clients, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    signal_timeout_ms: u64,

    /// Timeout of a single store call, in milliseconds
    #[arg(long, default_value_t = 3_000)]
    store_timeout_ms: u64,

    /// Attempts per store call, including the first
    #[arg(long, default_value_t = 3)]
    store_retry_attempts: u32,

    /// Delay before the first store retry, in milliseconds
    #[arg(long, default_value_t = 100)]
    store_retry_backoff_ms: u64,

    /// Interval of the deferred presence write flush, in seconds
    #[arg(long, default_value_t = 30)]
    deferred_flush_secs: u64,

    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            rooms: args.rooms,
            signal_timeout_ms: args.signal_timeout_ms,
            store_timeout_ms: args.store_timeout_ms,
            store_retry_attempts: args.store_retry_attempts,
            store_retry_backoff_ms: args.store_retry_backoff_ms,
            deferred_flush_secs: args.deferred_flush_secs,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), &args.log_level);

    // Run the server
    if let Err(e) = partyline_server::run(ServerConfig::from(args)).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
