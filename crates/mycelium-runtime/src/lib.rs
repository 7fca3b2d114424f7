//! # Mycelium Runtime
//!
//! Hosts one [`MyceliumNetwork`] for a process and connects the supervisor
//! node. Subsystems attach with [`MyceliumRuntime::interface`].
//!
//! ## Startup Sequence
//!
//! 1. Validate configuration
//! 2. Start the network dispatcher
//! 3. Connect the supervisor node (status queries)
//! 4. Subscribe the supervisor to health reports
//! 5. Start the periodic status logger
//!
//! Shutdown runs the sequence in reverse.

pub mod config;
pub mod supervisor;

pub use config::{ConfigError, RuntimeConfig};
pub use supervisor::{HealthMonitor, SupervisorHandler, METRICS_TOPIC};

use mycelium_network::{Interface, MyceliumNetwork};
use mycelium_types::{EventCallback, MyceliumError, NodeStatus, HEALTH_REPORT_TOPIC};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mycelium(#[from] MyceliumError),

    #[error("Startup failed: {0}")]
    Startup(String),
}

/// The process-level owner of the network.
pub struct MyceliumRuntime {
    config: RuntimeConfig,
    network: Arc<MyceliumNetwork>,
    supervisor: Interface,
    health: Arc<HealthMonitor>,
    shutdown_tx: watch::Sender<bool>,
    status_task: Mutex<Option<JoinHandle<()>>>,
}

impl MyceliumRuntime {
    /// Build the runtime. Nothing runs until [`start`](Self::start).
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        info!(supervisor = %config.supervisor_node_id, "Creating Mycelium runtime");

        let network = Arc::new(MyceliumNetwork::new(config.network.clone()));
        let supervisor = Interface::new(Arc::clone(&network), config.supervisor_node_id.clone())?;
        let health = Arc::new(HealthMonitor::new(&network));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            network,
            supervisor,
            health,
            shutdown_tx,
            status_task: Mutex::new(None),
        })
    }

    /// Start the network and connect the supervisor.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        self.network.start();

        let connected = self.supervisor.connect_with_handler(
            "supervisor",
            env!("CARGO_PKG_VERSION"),
            ["network_status", "health_monitoring", "metrics"],
            Arc::new(SupervisorHandler::new(&self.network)),
        );
        if !connected {
            return Err(RuntimeError::Startup(format!(
                "supervisor {} could not connect",
                self.config.supervisor_node_id
            )));
        }

        let monitor: Arc<dyn EventCallback> = self.health.clone();
        self.supervisor.subscribe(HEALTH_REPORT_TOPIC, monitor)?;
        self.supervisor.report_health(NodeStatus::Active, None)?;

        self.shutdown_tx.send_replace(false);
        let handle = tokio::spawn(status_logger(
            Arc::clone(&self.network),
            Arc::clone(&self.health),
            self.config.status_interval,
            self.shutdown_tx.subscribe(),
        ));
        if let Some(previous) = self.status_task.lock().replace(handle) {
            previous.abort();
        }

        info!(
            supervisor = %self.config.supervisor_node_id,
            "Mycelium runtime started"
        );
        Ok(())
    }

    /// Stop the status logger, disconnect the supervisor and stop the network.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        self.shutdown_tx.send_replace(true);
        let status_task = self.status_task.lock().take();
        if let Some(handle) = status_task {
            let _ = handle.await;
        }

        if self.supervisor.is_connected() {
            self.supervisor.disconnect();
        }
        self.network.stop().await;

        info!("Shutdown complete");
    }

    /// Interface for a subsystem node on this runtime's network.
    pub fn interface(&self, node_id: &str) -> Result<Interface, RuntimeError> {
        Ok(Interface::new(Arc::clone(&self.network), node_id)?)
    }

    pub fn network(&self) -> Arc<MyceliumNetwork> {
        Arc::clone(&self.network)
    }

    pub fn health_monitor(&self) -> Arc<HealthMonitor> {
        Arc::clone(&self.health)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

/// Periodically log a one-line network summary.
async fn status_logger(
    network: Arc<MyceliumNetwork>,
    health: Arc<HealthMonitor>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = network.get_network_status();
                info!(
                    nodes = status.total_nodes,
                    connections = status.total_connections,
                    topics = status.subscriptions.len(),
                    queue_size = status.queue_size,
                    in_flight = status.in_flight,
                    routed = status.routing.messages_routed,
                    dropped = status.routing.messages_dropped,
                    health_reports = health.reports(),
                    "Mycelium network status"
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
