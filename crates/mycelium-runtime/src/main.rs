//! # Mycelium Runtime
//!
//! Entry point for the Mycelium host process.
//!
//! ## Environment
//!
//! See [`RuntimeConfig::from_env`] and `mycelium_telemetry::TelemetryConfig`.

use anyhow::{Context, Result};
use mycelium_runtime::{MyceliumRuntime, RuntimeConfig};
use mycelium_telemetry::init_telemetry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = RuntimeConfig::from_env().context("Failed to load configuration")?;

    // Initialize logging and metrics
    let _telemetry = init_telemetry(&config.telemetry).context("Failed to initialize telemetry")?;

    // Create and start the runtime
    let runtime = MyceliumRuntime::new(config).context("Failed to create Mycelium runtime")?;
    runtime
        .start()
        .await
        .context("Failed to start Mycelium runtime")?;

    // Keep the network running
    info!("Mycelium network is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    // Graceful shutdown
    runtime.shutdown().await;

    Ok(())
}
