//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to log lines
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or a full
    /// `EnvFilter` directive such as `mycelium_network=debug,info`
    pub log_level: String,

    /// Whether to write logs to stdout at all
    pub console_output: bool,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,

    /// Whether to register the Prometheus collectors
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "mycelium".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MYCELIUM_SERVICE_NAME`: Service name (default: mycelium)
    /// - `MYCELIUM_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `MYCELIUM_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `MYCELIUM_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    /// - `MYCELIUM_METRICS`: Register Prometheus metrics (default: true)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("MYCELIUM_SERVICE_NAME")
                .unwrap_or_else(|_| "mycelium".to_string()),

            log_level: env::var("MYCELIUM_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("MYCELIUM_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),

            json_logs: env::var("MYCELIUM_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            metrics_enabled: env::var("MYCELIUM_METRICS")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
        }
    }

    /// Configuration for one named subsystem process (e.g. `bios-q`).
    pub fn for_service(name: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = format!("mycelium-{name}");
        config
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
