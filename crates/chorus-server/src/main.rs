//! Chorus server binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default 127.0.0.1:1337
//! chorus-server
//!
//! # Listen on all interfaces with verbose logging
//! chorus-server --bind 0.0.0.0:1337 --log-level debug
//! ```

use chorus_core::ServerConfig;
use chorus_server::{ChorusServer, RuntimeConfig};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chorus broadcast server
#[derive(Parser, Debug)]
#[command(name = "chorus-server")]
#[command(about = "Relays every client's input to every other connected client")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = chorus_server::DEFAULT_BIND_ADDRESS)]
    bind: String,

    /// Maximum concurrent connections
    #[arg(long, default_value_t = chorus_core::DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Upper bound for a single read; each read is relayed as one message
    #[arg(long, default_value_t = chorus_core::DEFAULT_READ_CHUNK_SIZE)]
    read_chunk_size: usize,

    /// Events fetched per poll
    #[arg(long, default_value_t = chorus_server::DEFAULT_EVENT_CAPACITY)]
    event_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(bind = %args.bind, "chorus server starting");

    let config = RuntimeConfig {
        bind_address: args.bind,
        event_capacity: args.event_capacity,
        server: ServerConfig {
            read_chunk_size: args.read_chunk_size,
            max_connections: args.max_connections,
        },
    };

    let mut server = match ChorusServer::bind(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            return Err(e.into());
        },
    };

    tracing::info!("server listening on {}", server.local_addr()?);

    server.run()?;

    Ok(())
}
