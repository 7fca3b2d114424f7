//! # Mycelium Telemetry
//!
//! Structured logging and Prometheus metrics for the Mycelium network.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mycelium_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(&config).expect("Failed to init telemetry");
//!
//!     // Logs and metrics are now being collected
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MYCELIUM_SERVICE_NAME` | `mycelium` | Service name in log lines |
//! | `MYCELIUM_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter directive |
//! | `MYCELIUM_JSON_LOGS` | `false` | JSON formatted logs |
//! | `MYCELIUM_METRICS` | `true` | Register Prometheus collectors |

mod config;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    encode_metrics, register_metrics, HistogramTimer, MetricsHandle, CONNECTIONS,
    HANDLER_ERRORS, IN_FLIGHT_TASKS, LATE_RESPONSES, MESSAGES_DROPPED, MESSAGES_ROUTED,
    NODES_REGISTERED, QUEUE_DEPTH, REGISTRY, REQUEST_DURATION, REQUEST_TIMEOUTS,
};
pub use tracing_setup::{build_filter, init_tracing};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = if config.metrics_enabled {
        Some(register_metrics()?)
    } else {
        None
    };

    init_tracing(config)?;

    Ok(TelemetryGuard {
        service_name: config.service_name.clone(),
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
    _metrics: Option<MetricsHandle>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry...");
    }
}
