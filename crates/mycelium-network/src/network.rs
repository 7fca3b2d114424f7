//! # Mycelium Network
//!
//! Owns the routing tables and the dispatcher. Subsystems normally talk to it
//! through an [`Interface`](crate::Interface); the methods here are the
//! lower-level registry and routing operations the interface is built on.
//!
//! ## Lifecycle
//!
//! ```text
//! new() ──► start() ──► route_message()* ──► stop() ──► start() ...
//! ```
//!
//! Messages may be routed before `start()`; they wait in the queue.

use crate::config::NetworkConfig;
use crate::dispatcher;
use crate::registry::{ConnectError, Registry};
use mycelium_telemetry::{CONNECTIONS, NODES_REGISTERED, QUEUE_DEPTH};
use mycelium_types::{
    EventCallback, Message, MessageHandler, NodeId, NodeSnapshot, NodeStatus, ResponseHandler,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Running totals kept by the dispatcher.
#[derive(Debug, Default)]
pub(crate) struct RoutingCounters {
    pub routed: AtomicU64,
    pub dropped: AtomicU64,
    pub handler_errors: AtomicU64,
    pub dispatcher_failures: AtomicU64,
}

/// Copy of the routing totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingStats {
    pub messages_routed: u64,
    pub messages_dropped: u64,
    pub handler_errors: u64,
    /// Dispatcher tasks that died instead of returning the queue.
    pub dispatcher_failures: u64,
}

/// Snapshot returned by [`MyceliumNetwork::get_network_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub total_nodes: usize,
    /// Undirected edge count.
    pub total_connections: usize,
    pub connections_per_node: BTreeMap<NodeId, usize>,
    pub nodes: BTreeMap<NodeId, NodeSnapshot>,
    /// Topic → subscriber ids.
    pub subscriptions: BTreeMap<String, Vec<NodeId>>,
    pub queue_size: usize,
    pub processor_running: bool,
    pub in_flight: usize,
    pub routing: RoutingStats,
}

/// State shared between the network handle and the dispatcher task.
pub(crate) struct NetworkShared {
    pub config: NetworkConfig,
    pub registry: RwLock<Registry>,
    queue_tx: RwLock<mpsc::UnboundedSender<Message>>,
    queue_depth: AtomicUsize,
    pub in_flight: AtomicUsize,
    running: AtomicBool,
    pub counters: RoutingCounters,
}

impl NetworkShared {
    /// Non-blocking enqueue.
    pub fn enqueue(&self, message: Message) {
        let message_id = message.header.message_id.clone();
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
        QUEUE_DEPTH.inc();
        if self.queue_tx.read().send(message).is_err() {
            self.queue_depth_dec();
            error!(message_id = %message_id, "Message queue closed, message dropped");
        }
    }

    pub fn queue_depth_dec(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
        QUEUE_DEPTH.dec();
    }

    /// Replace a queue lost with a failed dispatcher. Returns the new
    /// receiver and the number of messages that were still queued.
    fn replace_queue(&self) -> (mpsc::UnboundedReceiver<Message>, usize) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        *self.queue_tx.write() = queue_tx;
        let lost = self.queue_depth.swap(0, Ordering::Relaxed);
        QUEUE_DEPTH.sub(lost as f64);
        (queue_rx, lost)
    }

    fn refresh_topology_gauges(&self, registry: &Registry) {
        NODES_REGISTERED.set(registry.node_count() as f64);
        CONNECTIONS.set(registry.total_connections() as f64);
    }
}

enum DispatcherState {
    Idle(mpsc::UnboundedReceiver<Message>),
    Running {
        shutdown: watch::Sender<bool>,
        handle: JoinHandle<mpsc::UnboundedReceiver<Message>>,
    },
    /// Between `stop()` taking the handle and the queue coming back.
    Stopping,
}

/// The message router.
///
/// Share it through `Arc`; every method takes `&self`.
pub struct MyceliumNetwork {
    shared: Arc<NetworkShared>,
    dispatcher: Mutex<DispatcherState>,
}

impl Default for MyceliumNetwork {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

impl MyceliumNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(NetworkShared {
                config,
                registry: RwLock::new(Registry::default()),
                queue_tx: RwLock::new(queue_tx),
                queue_depth: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                running: AtomicBool::new(false),
                counters: RoutingCounters::default(),
            }),
            dispatcher: Mutex::new(DispatcherState::Idle(queue_rx)),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.shared.config
    }

    // =========================================================================
    // NODES
    // =========================================================================

    /// Register a node, or update it in place if the id is already known.
    ///
    /// Always succeeds. An existing node keeps its handler, connections and
    /// subscriptions.
    pub fn register_node<I, S>(
        &self,
        node_id: &str,
        node_type: &str,
        version: &str,
        capabilities: I,
    ) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.upsert(node_id, node_type, version, collect(capabilities), None)
    }

    /// Register a node whose REQUESTs and generic EVENTs go to `handler`.
    pub fn register_node_with_handler<I, S>(
        &self,
        node_id: &str,
        node_type: &str,
        version: &str,
        capabilities: I,
        handler: Arc<dyn MessageHandler>,
    ) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.upsert(node_id, node_type, version, collect(capabilities), Some(handler))
    }

    fn upsert(
        &self,
        node_id: &str,
        node_type: &str,
        version: &str,
        capabilities: Vec<String>,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> bool {
        let existed = {
            let mut registry = self.shared.registry.write();
            let existed = registry.upsert_node(node_id, node_type, version, capabilities, handler);
            self.shared.refresh_topology_gauges(&registry);
            existed
        };

        if existed {
            warn!(node_id = node_id, "Node already registered, updating");
        } else {
            info!(node_id = node_id, node_type = node_type, version = version, "Node registered");
        }
        true
    }

    /// Replace the handler of a registered node.
    pub fn set_node_handler(&self, node_id: &str, handler: Arc<dyn MessageHandler>) -> bool {
        let updated = self.shared.registry.write().set_handler(node_id, handler);
        if !updated {
            error!(node_id = node_id, "Cannot set handler: node not registered");
        }
        updated
    }

    /// Remove a node with all its connections, subscriptions and response
    /// handler. Outstanding waiters behind that handler are cancelled.
    pub fn remove_node(&self, node_id: &str) -> bool {
        let removal = {
            let mut registry = self.shared.registry.write();
            let removal = registry.remove_node(node_id);
            self.shared.refresh_topology_gauges(&registry);
            removal
        };

        let Some(removal) = removal else {
            warn!(node_id = node_id, "Attempted to remove non-existent node");
            return false;
        };

        if let Some(handler) = removal.response_handler {
            handler.cancel_all("node disconnecting");
        }

        info!(
            node_id = node_id,
            connections = removal.neighbors,
            subscriptions = removal.subscriptions,
            "Node removed"
        );
        true
    }

    pub fn update_node_status(
        &self,
        node_id: &str,
        status: NodeStatus,
        details: Option<Map<String, Value>>,
    ) -> bool {
        let updated = self
            .shared
            .registry
            .write()
            .update_status(node_id, status, details);
        if updated {
            debug!(node_id = node_id, status = %status, "Node status updated");
        } else {
            warn!(node_id = node_id, status = %status, "Status update for unknown node ignored");
        }
        updated
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.shared.registry.read().contains_node(node_id)
    }

    pub fn node_count(&self) -> usize {
        self.shared.registry.read().node_count()
    }

    pub fn node_status(&self, node_id: &str) -> Option<NodeSnapshot> {
        self.shared
            .registry
            .read()
            .node(node_id)
            .map(|node| node.get_status())
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    /// Create a symmetric connection. Both nodes must be registered.
    pub fn add_connection(&self, a: &str, b: &str) -> bool {
        let result = {
            let mut registry = self.shared.registry.write();
            let result = registry.connect(a, b);
            self.shared.refresh_topology_gauges(&registry);
            result
        };

        match result {
            Ok(()) => {
                info!(a = a, b = b, "Connection added");
                true
            }
            Err(ConnectError::SelfConnection) => {
                error!(node_id = a, "Cannot connect a node to itself");
                false
            }
            Err(ConnectError::UnknownNode(missing)) => {
                error!(
                    a = a,
                    b = b,
                    missing = %missing,
                    "Cannot add connection: node not registered"
                );
                false
            }
        }
    }

    pub fn remove_connection(&self, a: &str, b: &str) -> bool {
        let removed = {
            let mut registry = self.shared.registry.write();
            let removed = registry.disconnect(a, b);
            self.shared.refresh_topology_gauges(&registry);
            removed
        };
        if removed {
            info!(a = a, b = b, "Connection removed");
        } else {
            debug!(a = a, b = b, "No connection to remove");
        }
        removed
    }

    /// Connected node ids, sorted.
    pub fn neighbors(&self, node_id: &str) -> Vec<NodeId> {
        self.shared.registry.read().neighbors(node_id)
    }

    // =========================================================================
    // RESPONSE HANDLERS
    // =========================================================================

    pub fn register_response_handler(
        &self,
        node_id: &str,
        handler: Arc<dyn ResponseHandler>,
    ) -> bool {
        let registered = self
            .shared
            .registry
            .write()
            .set_response_handler(node_id, handler);
        if registered {
            debug!(node_id = node_id, "Response handler registered");
        } else {
            error!(node_id = node_id, "Cannot register response handler: node not registered");
        }
        registered
    }

    pub fn remove_response_handler(&self, node_id: &str) -> bool {
        let removed = self
            .shared
            .registry
            .write()
            .remove_response_handler(node_id)
            .is_some();
        if removed {
            debug!(node_id = node_id, "Response handler removed");
        }
        removed
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Subscribe `node_id` to `topic`. An identical `(node_id, callback)`
    /// pair is rejected.
    pub fn add_subscription(
        &self,
        topic: &str,
        node_id: &str,
        callback: Arc<dyn EventCallback>,
    ) -> bool {
        let mut registry = self.shared.registry.write();
        if !registry.contains_node(node_id) {
            drop(registry);
            error!(node_id = node_id, topic = topic, "Cannot subscribe: node not registered");
            return false;
        }
        let added = registry.subscribe(topic, node_id, callback);
        drop(registry);

        if added {
            info!(node_id = node_id, topic = topic, "Subscribed to topic");
        } else {
            warn!(node_id = node_id, topic = topic, "Duplicate subscription ignored");
        }
        added
    }

    pub fn remove_subscription(
        &self,
        topic: &str,
        node_id: &str,
        callback: &Arc<dyn EventCallback>,
    ) -> bool {
        let removed = self
            .shared
            .registry
            .write()
            .unsubscribe(topic, node_id, callback);
        if removed {
            info!(node_id = node_id, topic = topic, "Unsubscribed from topic");
        }
        removed
    }

    // =========================================================================
    // ROUTING
    // =========================================================================

    /// Enqueue a message for the dispatcher. Never blocks.
    pub fn route_message(&self, message: Message) {
        debug!(
            message_id = %message.header.message_id,
            message_type = %message.header.message_type,
            sender = %message.header.sender_node,
            target = %message.header.target_node,
            topic = %message.header.topic,
            "Routing message"
        );
        self.shared.enqueue(message);
    }

    /// Launch the dispatcher. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut state = self.dispatcher.lock();
        match std::mem::replace(&mut *state, DispatcherState::Stopping) {
            DispatcherState::Idle(queue) => {
                let (shutdown, shutdown_rx) = watch::channel(false);
                self.shared.running.store(true, Ordering::SeqCst);
                let handle = tokio::spawn(dispatcher::run(
                    Arc::clone(&self.shared),
                    queue,
                    shutdown_rx,
                ));
                *state = DispatcherState::Running { shutdown, handle };
                info!("Mycelium network started");
            }
            running @ DispatcherState::Running { .. } => {
                *state = running;
                warn!("Mycelium network already running");
            }
            DispatcherState::Stopping => {
                warn!("Mycelium network is stopping, start ignored");
            }
        }
    }

    /// Stop the dispatcher and wait for it to hand the queue back.
    ///
    /// Running deliveries get the configured grace period before they are
    /// aborted. Queued messages are kept for the next `start()`.
    pub async fn stop(&self) {
        let (shutdown, handle) = {
            let mut state = self.dispatcher.lock();
            match std::mem::replace(&mut *state, DispatcherState::Stopping) {
                DispatcherState::Running { shutdown, handle } => (shutdown, handle),
                other => {
                    *state = other;
                    debug!("Mycelium network not running, stop ignored");
                    return;
                }
            }
        };

        // Receiver lives in the task until it returns
        let _ = shutdown.send(true);

        match handle.await {
            Ok(queue) => {
                *self.dispatcher.lock() = DispatcherState::Idle(queue);
                info!("Mycelium network stopped");
            }
            Err(e) => {
                self.shared
                    .counters
                    .dispatcher_failures
                    .fetch_add(1, Ordering::Relaxed);
                let (queue, lost) = self.shared.replace_queue();
                *self.dispatcher.lock() = DispatcherState::Idle(queue);
                error!(
                    error = %e,
                    lost_messages = lost,
                    "Dispatcher task failed; queued messages lost, network can be restarted"
                );
            }
        }
        self.shared.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn queue_size(&self) -> usize {
        self.shared.queue_depth.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Relaxed)
    }

    pub fn get_network_status(&self) -> NetworkStatus {
        let registry = self.shared.registry.read();
        NetworkStatus {
            total_nodes: registry.node_count(),
            total_connections: registry.total_connections(),
            connections_per_node: registry.connections_per_node(),
            nodes: registry.snapshots(),
            subscriptions: registry.subscription_summary(),
            queue_size: self.queue_size(),
            processor_running: self.is_running(),
            in_flight: self.in_flight(),
            routing: RoutingStats {
                messages_routed: self.shared.counters.routed.load(Ordering::Relaxed),
                messages_dropped: self.shared.counters.dropped.load(Ordering::Relaxed),
                handler_errors: self.shared.counters.handler_errors.load(Ordering::Relaxed),
                dispatcher_failures: self
                    .shared
                    .counters
                    .dispatcher_failures
                    .load(Ordering::Relaxed),
            },
        }
    }
}

impl Drop for MyceliumNetwork {
    fn drop(&mut self) {
        if let DispatcherState::Running { shutdown, .. } = &*self.dispatcher.get_mut() {
            let _ = shutdown.send(true);
        }
    }
}

fn collect<I, S>(capabilities: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    capabilities.into_iter().map(Into::into).collect()
}
