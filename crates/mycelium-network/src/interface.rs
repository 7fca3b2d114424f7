//! # Interface
//!
//! The per-node facade a subsystem holds. It registers the node, turns the
//! queue-based router into an awaitable request/response API, publishes
//! events and reports health.
//!
//! ## Example
//!
//! ```rust,ignore
//! let network = Arc::new(MyceliumNetwork::default());
//! network.start();
//!
//! let nexus = Interface::new(Arc::clone(&network), "NEXUS")?;
//! nexus.connect("analysis", "1.0", ["analyze"]);
//!
//! let reply = nexus
//!     .send_request("ATLAS", "atlas.map.request", json!({"path": "/src"}), Duration::from_secs(5))
//!     .await?;
//! ```

use crate::dispatcher::without_slot;
use crate::network::{MyceliumNetwork, NetworkStatus};
use crate::pending::{PendingResponses, PendingStatsSnapshot, WaiterOutcome};
use mycelium_telemetry::{time_histogram, REQUEST_DURATION, REQUEST_TIMEOUTS};
use mycelium_types::{
    payload_error_message, EventCallback, Message, MessageHandler, MyceliumError,
    MyceliumResult, NodeId, NodeStatus, BROADCAST_TARGET, HEALTH_REPORT_TOPIC, TOPIC_TARGET,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// One node's handle on the network.
pub struct Interface {
    network: Arc<MyceliumNetwork>,
    node_id: NodeId,
    pending: Arc<PendingResponses>,
    connected: AtomicBool,
}

impl Interface {
    /// Create an unconnected interface for `node_id`.
    pub fn new(network: Arc<MyceliumNetwork>, node_id: impl Into<NodeId>) -> MyceliumResult<Self> {
        let node_id = node_id.into();
        if node_id.trim().is_empty() {
            return Err(MyceliumError::InvalidArgument(
                "node id must not be empty".to_string(),
            ));
        }

        debug!(node_id = %node_id, "Mycelium interface created");
        Ok(Self {
            pending: Arc::new(PendingResponses::new(node_id.clone())),
            network,
            node_id,
            connected: AtomicBool::new(false),
        })
    }

    /// Register the node and install this interface as its response sink.
    pub fn connect<I, S>(&self, node_type: &str, version: &str, capabilities: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        info!(node_id = %self.node_id, "Node connecting to Mycelium network");
        let registered = self
            .network
            .register_node(&self.node_id, node_type, version, capabilities);
        self.finish_connect(registered)
    }

    /// Like [`connect`](Self::connect), with the node's request/event handler.
    pub fn connect_with_handler<I, S>(
        &self,
        node_type: &str,
        version: &str,
        capabilities: I,
        handler: Arc<dyn MessageHandler>,
    ) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        info!(node_id = %self.node_id, "Node connecting to Mycelium network");
        let registered = self.network.register_node_with_handler(
            &self.node_id,
            node_type,
            version,
            capabilities,
            handler,
        );
        self.finish_connect(registered)
    }

    fn finish_connect(&self, registered: bool) -> bool {
        if !registered {
            return false;
        }
        let sink = Arc::clone(&self.pending);
        let installed = self.network.register_response_handler(&self.node_id, sink);
        self.connected.store(installed, Ordering::SeqCst);
        installed
    }

    /// Cancel outstanding requests and remove the node from the network.
    ///
    /// The interface stays unusable until connected again.
    pub fn disconnect(&self) -> bool {
        if !self.connected.swap(false, Ordering::SeqCst) {
            warn!(node_id = %self.node_id, "Disconnect called on a disconnected interface");
            return false;
        }

        info!(node_id = %self.node_id, "Node disconnecting from Mycelium network");
        self.pending.cancel_all("node disconnecting");
        self.network.remove_response_handler(&self.node_id);
        self.network.remove_node(&self.node_id)
    }

    /// Send a REQUEST and wait up to `timeout` for its RESPONSE.
    ///
    /// An ERROR payload is returned as [`MyceliumError::Application`]; any
    /// other payload is returned unchanged.
    pub async fn send_request(
        &self,
        target: &str,
        topic: &str,
        payload: Value,
        timeout: Duration,
    ) -> MyceliumResult<Value> {
        self.ensure_connected("send request")?;

        let request = Message::request(self.node_id.as_str(), target, topic, payload);
        let Some(correlation_id) = request.correlation_id().map(str::to_owned) else {
            return Err(MyceliumError::InvalidMessage(
                "request built without correlation_id".to_string(),
            ));
        };

        let rx = self.register_waiter(&correlation_id, target, topic)?;
        let mut waiter = WaiterGuard {
            pending: &self.pending,
            correlation_id: &correlation_id,
            timed_out: false,
        };
        let _timer = time_histogram!(REQUEST_DURATION);

        debug!(
            node_id = %self.node_id,
            correlation_id = %correlation_id,
            target = target,
            topic = topic,
            "Sending request"
        );
        self.network.route_message(request);

        match without_slot(tokio::time::timeout(timeout, rx)).await {
            Ok(Ok(Ok(payload))) => {
                debug!(
                    node_id = %self.node_id,
                    correlation_id = %correlation_id,
                    "Received response"
                );
                match payload_error_message(&payload) {
                    Some(message) => Err(MyceliumError::Application {
                        source_node: target.to_string(),
                        message,
                    }),
                    None => Ok(payload),
                }
            }
            Ok(Ok(Err(reason))) => {
                warn!(
                    node_id = %self.node_id,
                    correlation_id = %correlation_id,
                    reason = %reason,
                    "Request cancelled"
                );
                Err(MyceliumError::ConnectionAborted(format!(
                    "Request {correlation_id} cancelled due to node disconnection"
                )))
            }
            Ok(Err(_)) => Err(MyceliumError::ConnectionAborted(format!(
                "Request {correlation_id} abandoned: response channel closed"
            ))),
            Err(_) => {
                waiter.timed_out = true;
                self.pending.record_timeout();
                REQUEST_TIMEOUTS.inc();
                error!(
                    node_id = %self.node_id,
                    correlation_id = %correlation_id,
                    target = target,
                    topic = topic,
                    timeout_ms = timeout.as_millis(),
                    "Timeout waiting for response"
                );
                Err(MyceliumError::Timeout {
                    correlation_id: correlation_id.clone(),
                    target: target.to_string(),
                    topic: topic.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Register the waiter for `correlation_id`.
    ///
    /// Fails if a disconnect ran after the caller's connection check: that
    /// disconnect has already cancelled every waiter it could see.
    fn register_waiter(
        &self,
        correlation_id: &str,
        target: &str,
        topic: &str,
    ) -> MyceliumResult<oneshot::Receiver<WaiterOutcome>> {
        let rx = self.pending.register(correlation_id, target, topic);
        if self.is_connected() {
            return Ok(rx);
        }

        self.pending.remove(correlation_id);
        Err(MyceliumError::ConnectionAborted(format!(
            "Request {correlation_id} cancelled due to node disconnection"
        )))
    }

    /// Publish an EVENT to every subscriber of `topic`.
    pub fn publish_event(&self, topic: &str, payload: Value) -> MyceliumResult<()> {
        self.emit_event("publish event", TOPIC_TARGET, topic, payload)
    }

    /// Send an EVENT to every other registered node.
    pub fn broadcast_event(&self, topic: &str, payload: Value) -> MyceliumResult<()> {
        self.emit_event("broadcast event", BROADCAST_TARGET, topic, payload)
    }

    /// Send an EVENT to one node.
    pub fn send_event(&self, target: &str, topic: &str, payload: Value) -> MyceliumResult<()> {
        self.emit_event("send event", target, topic, payload)
    }

    fn emit_event(
        &self,
        action: &str,
        target: &str,
        topic: &str,
        payload: Value,
    ) -> MyceliumResult<()> {
        self.ensure_connected(action)?;
        debug!(node_id = %self.node_id, target = target, topic = topic, "Emitting event");
        self.network
            .route_message(Message::event(self.node_id.as_str(), target, topic, payload));
        Ok(())
    }

    /// Subscribe this node to `topic`. Returns false for a duplicate.
    pub fn subscribe(&self, topic: &str, callback: Arc<dyn EventCallback>) -> MyceliumResult<bool> {
        self.ensure_connected("subscribe")?;
        Ok(self.network.add_subscription(topic, &self.node_id, callback))
    }

    /// Remove a subscription made with the same callback `Arc`.
    pub fn unsubscribe(&self, topic: &str, callback: &Arc<dyn EventCallback>) -> bool {
        self.network.remove_subscription(topic, &self.node_id, callback)
    }

    /// Record this node's health and publish it on the health topic.
    ///
    /// On a disconnected interface this only logs a warning.
    pub fn report_health(
        &self,
        status: NodeStatus,
        details: Option<Map<String, Value>>,
    ) -> MyceliumResult<()> {
        if !self.is_connected() {
            warn!(node_id = %self.node_id, "Cannot report health, node is disconnected");
            return Ok(());
        }

        let details = details.unwrap_or_default();
        self.network
            .update_node_status(&self.node_id, status, Some(details.clone()));

        let payload = json!({
            "node_id": self.node_id,
            "status": status.as_str(),
            "details": details,
        });
        debug!(node_id = %self.node_id, status = %status, "Reporting health");
        self.publish_event(HEALTH_REPORT_TOPIC, payload)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    pub fn stats(&self) -> PendingStatsSnapshot {
        self.pending.stats()
    }

    pub fn network_status(&self) -> NetworkStatus {
        self.network.get_network_status()
    }

    pub fn network(&self) -> &Arc<MyceliumNetwork> {
        &self.network
    }

    fn ensure_connected(&self, action: &str) -> MyceliumResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(MyceliumError::Connection(format!(
                "Cannot {action}, node {} is disconnected",
                self.node_id
            )))
        }
    }
}

/// Removes the waiter however `send_request` exits, including when its
/// future is dropped mid-wait.
struct WaiterGuard<'a> {
    pending: &'a PendingResponses,
    correlation_id: &'a str,
    timed_out: bool,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if self.pending.remove(self.correlation_id) && !self.timed_out {
            self.pending.record_abandoned();
        }
    }
}
