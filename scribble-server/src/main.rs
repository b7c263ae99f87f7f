//! Scribble store server.
//!
//! Serves the shared canvas tree over WebSocket. Configuration comes from
//! the environment (or a `.env` file):
//!
//! | Variable | Default |
//! |----------|---------|
//! | `SCRIBBLE_BIND_ADDR` | `127.0.0.1:9090` |
//! | `SCRIBBLE_BROADCAST_CAPACITY` | `256` |
//! | `SCRIBBLE_MAX_CONNECTIONS` | `1024` |
//!
//! Logging is controlled with `RUST_LOG`.

use log::info;
use scribble_collab::config::load_server_config;
use scribble_collab::server::StoreServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = load_server_config()?;
    info!("Starting Scribble store server on {}...", config.bind_addr);
    let server = StoreServer::new(config);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            info!(
                "Shutting down: {} connection(s) served, {} frame(s) received",
                stats.total_connections, stats.total_frames
            );
        }
    }
    Ok(())
}
