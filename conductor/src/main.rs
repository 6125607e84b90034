// Conductor coordinator server

mod server;

use anyhow::Result;
use conductor_core::{logging, Config};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (optional file path as first argument)
    let config_file = std::env::args().nth(1);
    let config = Config::load(config_file.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}");
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize logging
    logging::init_logging(&config.logging)?;

    info!("Conductor coordinator starting...");
    info!("HTTP address: {}", config.http_address());
    info!(
        "Registry staleness window: {}s",
        config.staleness_window_seconds()
    );

    server::run(config).await
}
