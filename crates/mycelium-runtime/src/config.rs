//! Runtime configuration.
//!
//! Defaults are suitable for a development host; every field can be
//! overridden through `MYCELIUM_*` environment variables.

use mycelium_network::NetworkConfig;
use mycelium_telemetry::TelemetryConfig;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub network: NetworkConfig,
    pub telemetry: TelemetryConfig,
    /// Node id of the supervisor that monitors health and answers status
    /// queries.
    pub supervisor_node_id: String,
    /// How often the runtime logs a network summary.
    pub status_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            telemetry: TelemetryConfig::default(),
            supervisor_node_id: "BIOS-Q".to_string(),
            status_interval: Duration::from_secs(60),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}'")]
    InvalidValue { var: &'static str, value: String },

    #[error("max_in_flight must be at least 1")]
    ZeroMaxInFlight,

    #[error("supervisor node id must not be empty")]
    EmptySupervisorId,

    #[error("status interval must be greater than zero")]
    ZeroStatusInterval,
}

impl RuntimeConfig {
    /// Load configuration from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `MYCELIUM_MAX_IN_FLIGHT`: concurrent deliveries (default: 1024)
    /// - `MYCELIUM_SHUTDOWN_GRACE_MS`: stop grace period (default: 2000)
    /// - `MYCELIUM_SUPERVISOR_ID`: supervisor node id (default: BIOS-Q)
    /// - `MYCELIUM_STATUS_INTERVAL_SECS`: status log period (default: 60)
    /// - plus the telemetry variables read by [`TelemetryConfig::from_env`]
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|var| std::env::var(var).ok())?;
        config.telemetry = TelemetryConfig::from_env();
        Ok(config)
    }

    /// Apply overrides from `lookup` on top of the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(max) = parse_var::<usize, _>(&lookup, "MYCELIUM_MAX_IN_FLIGHT")? {
            config.network.max_in_flight = max;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "MYCELIUM_SHUTDOWN_GRACE_MS")? {
            config.network.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(id) = lookup("MYCELIUM_SUPERVISOR_ID") {
            config.supervisor_node_id = id;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "MYCELIUM_STATUS_INTERVAL_SECS")? {
            config.status_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Reject settings the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_in_flight == 0 {
            return Err(ConfigError::ZeroMaxInFlight);
        }
        if self.supervisor_node_id.trim().is_empty() {
            return Err(ConfigError::EmptySupervisorId);
        }
        if self.status_interval.is_zero() {
            return Err(ConfigError::ZeroStatusInterval);
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}
