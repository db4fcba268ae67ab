//! upcase-reactor: a single-threaded TCP reactor
//!
//! Every byte a client sends comes back through a byte-wise transform
//! (ASCII uppercase by default), in order, on the same connection.
//!
//! Features:
//! - mio readiness loop with non-blocking sockets
//! - Partial read/write handling with bounded output buffering
//! - Graceful shutdown on SIGINT/SIGTERM with a bounded drain
//! - Optional multi-reactor mode over `SO_REUSEPORT`
//! - Configuration via CLI arguments or TOML file

mod config;
mod runtime;
mod transform;

use config::Config;
use runtime::ShutdownSignal;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        workers = config.workers,
        transform = ?config.transform,
        max_connections = config.max_connections,
        high_watermark = config.high_watermark,
        drain_timeout_ms = config.drain_timeout.as_millis() as u64,
        "Starting upcase-reactor"
    );

    let shutdown = ShutdownSignal::install()?;
    runtime::run(config, shutdown)?;

    info!("Shutdown complete");
    Ok(())
}
