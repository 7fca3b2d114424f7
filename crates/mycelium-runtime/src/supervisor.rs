//! BIOS-Q supervisor node.
//!
//! Answers `request.mycelium.network_status` with the current network
//! snapshot, `request.mycelium.metrics` with the Prometheus text exposition,
//! and records every health report published on
//! `event.mycelium.health_report` against the reporting node.
//!
//! Both hold a `Weak` network reference: the handler lives inside the
//! network's own registry.

use async_trait::async_trait;
use mycelium_network::MyceliumNetwork;
use mycelium_telemetry::encode_metrics;
use mycelium_types::{
    EventCallback, HandlerError, HandlerResult, Message, MessageHandler, NodeStatus,
    NETWORK_STATUS_TOPIC,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Topic answered with the encoded metrics registry.
pub const METRICS_TOPIC: &str = "request.mycelium.metrics";

/// Request handler of the supervisor node.
pub struct SupervisorHandler {
    network: Weak<MyceliumNetwork>,
}

impl SupervisorHandler {
    pub fn new(network: &Arc<MyceliumNetwork>) -> Self {
        Self {
            network: Arc::downgrade(network),
        }
    }
}

#[async_trait]
impl MessageHandler for SupervisorHandler {
    async fn handle_request(&self, message: &Message) -> HandlerResult<Option<Value>> {
        match message.header.topic.as_str() {
            NETWORK_STATUS_TOPIC => {
                let network = self
                    .network
                    .upgrade()
                    .ok_or_else(|| HandlerError::failed("network is shutting down"))?;
                debug!(requester = %message.header.sender_node, "Serving network status");
                Ok(Some(serde_json::to_value(network.get_network_status())?))
            }
            METRICS_TOPIC => {
                let body = encode_metrics().map_err(|e| HandlerError::failed(e.to_string()))?;
                Ok(Some(json!({ "format": "prometheus", "body": body })))
            }
            other => Err(HandlerError::failed(format!("unsupported topic '{other}'"))),
        }
    }
}

/// Subscriber for health reports.
pub struct HealthMonitor {
    network: Weak<MyceliumNetwork>,
    reports: AtomicU64,
    rejected: AtomicU64,
}

impl HealthMonitor {
    pub fn new(network: &Arc<MyceliumNetwork>) -> Self {
        Self {
            network: Arc::downgrade(network),
            reports: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Health reports applied so far.
    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    /// Malformed reports seen so far.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn parse(payload: &Value) -> HandlerResult<(String, NodeStatus, Option<Map<String, Value>>)> {
        let node_id = payload
            .get("node_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| HandlerError::failed("health report without node_id"))?;
        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::failed("health report without status"))?
            .parse::<NodeStatus>()
            .map_err(HandlerError::Failed)?;
        let details = payload.get("details").and_then(Value::as_object).cloned();
        Ok((node_id.to_string(), status, details))
    }
}

#[async_trait]
impl EventCallback for HealthMonitor {
    async fn on_event(&self, message: Message) -> HandlerResult<()> {
        let (node_id, status, details) = match Self::parse(&message.payload) {
            Ok(report) => report,
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let Some(network) = self.network.upgrade() else {
            return Ok(());
        };
        network.update_node_status(&node_id, status, details);
        self.reports.fetch_add(1, Ordering::Relaxed);

        match status {
            NodeStatus::Active | NodeStatus::Initializing => {
                info!(node_id = %node_id, status = %status, "Health report received");
            }
            NodeStatus::Degraded | NodeStatus::Inactive => {
                warn!(node_id = %node_id, status = %status, "Node reported unhealthy status");
            }
        }
        Ok(())
    }
}
