//! # Tagnet Fleet Daemon
//!
//! TCP server for the shelf-label and NFC-reader fleet.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          fleetd                                         │
//! │                                                                         │
//! │  Devices ───► TCP (5000) ───► tagnet-fleet engine ───► CSV files       │
//! │                                     │                                   │
//! │                                     ▼                                   │
//! │                              FleetHandle                                │
//! │                        (operator control surface)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tagnet_fleet::{CsvSink, FleetConfig, FleetServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("Starting Tagnet fleet daemon...");

    // Load configuration (path from the first CLI argument, if given)
    let config_path = std::env::args().nth(1).map(Into::into);
    let config = FleetConfig::load_or_default(config_path);
    info!(
        addr = %config.server.bind_address(),
        movements = %config.storage.movements_csv.display(),
        sales = %config.storage.sales_csv.display(),
        "Configuration loaded"
    );

    // Open the CSV event sink
    let sink = Arc::new(CsvSink::open(
        &config.storage.movements_csv,
        &config.storage.sales_csv,
    )?);

    // Start the fleet server
    let handle = FleetServer::new(config, sink).start().await?;
    info!(addr = %handle.local_addr(), "Fleet server running");

    // Run until interrupted
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Interrupt received, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    handle.shutdown().await?;
    info!(devices = handle.device_count().await, "Fleet daemon stopped");

    Ok(())
}
