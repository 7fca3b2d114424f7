//! Network configuration.

use std::time::Duration;

/// Tuning knobs for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Maximum number of REQUEST/EVENT deliveries running at once.
    pub max_in_flight: usize,
    /// How long `stop()` waits for running deliveries before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1024,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl NetworkConfig {
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Permit count actually used by the dispatcher; zero would deadlock it.
    pub(crate) fn effective_max_in_flight(&self) -> usize {
        self.max_in_flight.max(1)
    }
}
