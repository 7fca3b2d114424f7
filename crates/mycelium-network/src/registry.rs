//! Shared routing tables.
//!
//! Nodes, connections, subscriptions and response handlers live in one
//! struct behind one lock so that cascading removal is atomic. Nothing in
//! here awaits; callers clone `Arc`s out before invoking handlers.

use mycelium_types::{
    DeliveryTarget, EventCallback, Message, MessageHandler, Node, NodeId, NodeSnapshot,
    NodeStatus, ResponseHandler,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// One `(node_id, callback)` entry under a topic.
#[derive(Clone)]
pub(crate) struct Subscription {
    pub node_id: NodeId,
    pub callback: Arc<dyn EventCallback>,
}

impl Subscription {
    fn matches(&self, node_id: &str, callback: &Arc<dyn EventCallback>) -> bool {
        self.node_id == node_id && Arc::ptr_eq(&self.callback, callback)
    }
}

/// Why a connection could not be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConnectError {
    SelfConnection,
    UnknownNode(NodeId),
}

/// What `remove_node` tore down.
pub(crate) struct Removal {
    pub neighbors: usize,
    pub subscriptions: usize,
    pub response_handler: Option<Arc<dyn ResponseHandler>>,
}

/// One EVENT delivery resolved at dispatch time.
pub(crate) enum Recipient {
    /// Topic-specific subscriber callback.
    Callback {
        node_id: NodeId,
        callback: Arc<dyn EventCallback>,
    },
    /// Generic node handler.
    Node(Node),
}

impl Recipient {
    pub fn node_id(&self) -> &str {
        match self {
            Self::Callback { node_id, .. } => node_id,
            Self::Node(node) => node.id(),
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    nodes: HashMap<NodeId, Node>,
    connections: HashMap<NodeId, HashSet<NodeId>>,
    subscriptions: HashMap<String, Vec<Subscription>>,
    response_handlers: HashMap<NodeId, Arc<dyn ResponseHandler>>,
}

impl Registry {
    // =========================================================================
    // NODES
    // =========================================================================

    /// Insert or update a node. Returns true if the id already existed.
    pub fn upsert_node(
        &mut self,
        id: &str,
        node_type: &str,
        version: &str,
        capabilities: Vec<String>,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> bool {
        if let Some(node) = self.nodes.get_mut(id) {
            node.register(node_type, version, capabilities);
            if let Some(handler) = handler {
                node.set_handler(handler);
            }
            return true;
        }

        let mut node = Node::new(id, node_type, version, capabilities.clone());
        if let Some(handler) = handler {
            node = node.with_handler(handler);
        }
        node.register(node_type, version, capabilities);
        self.nodes.insert(id.to_string(), node);
        false
    }

    pub fn set_handler(&mut self, id: &str, handler: Arc<dyn MessageHandler>) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.set_handler(handler);
                true
            }
            None => false,
        }
    }

    pub fn update_status(
        &mut self,
        id: &str,
        status: NodeStatus,
        details: Option<Map<String, Value>>,
    ) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.update_status(status, details);
                true
            }
            None => false,
        }
    }

    /// Remove a node and everything that references it.
    pub fn remove_node(&mut self, id: &str) -> Option<Removal> {
        self.nodes.remove(id)?;

        let neighbors = self.connections.remove(id).unwrap_or_default();
        for neighbor in &neighbors {
            self.unlink(neighbor, id);
        }

        let mut subscriptions = 0;
        self.subscriptions.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|sub| sub.node_id != id);
            subscriptions += before - subs.len();
            !subs.is_empty()
        });

        Some(Removal {
            neighbors: neighbors.len(),
            subscriptions,
            response_handler: self.response_handlers.remove(id),
        })
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn snapshots(&self) -> BTreeMap<NodeId, NodeSnapshot> {
        self.nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.get_status()))
            .collect()
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    pub fn connect(&mut self, a: &str, b: &str) -> Result<(), ConnectError> {
        if a == b {
            return Err(ConnectError::SelfConnection);
        }
        for id in [a, b] {
            if !self.nodes.contains_key(id) {
                return Err(ConnectError::UnknownNode(id.to_string()));
            }
        }

        self.connections
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.connections
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
        Ok(())
    }

    /// Returns true if the edge existed.
    pub fn disconnect(&mut self, a: &str, b: &str) -> bool {
        let forward = self.unlink(a, b);
        let backward = self.unlink(b, a);
        forward || backward
    }

    fn unlink(&mut self, from: &str, to: &str) -> bool {
        let Some(peers) = self.connections.get_mut(from) else {
            return false;
        };
        let removed = peers.remove(to);
        if peers.is_empty() {
            self.connections.remove(from);
        }
        removed
    }

    pub fn neighbors(&self, id: &str) -> Vec<NodeId> {
        let mut neighbors: Vec<NodeId> = self
            .connections
            .get(id)
            .map(|peers| peers.iter().cloned().collect())
            .unwrap_or_default();
        neighbors.sort();
        neighbors
    }

    pub fn connections_per_node(&self) -> BTreeMap<NodeId, usize> {
        self.nodes
            .keys()
            .map(|id| {
                let count = self.connections.get(id).map_or(0, HashSet::len);
                (id.clone(), count)
            })
            .collect()
    }

    /// Undirected edge count.
    pub fn total_connections(&self) -> usize {
        self.connections.values().map(HashSet::len).sum::<usize>() / 2
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Append a subscription. Returns false for an exact duplicate.
    pub fn subscribe(
        &mut self,
        topic: &str,
        node_id: &str,
        callback: Arc<dyn EventCallback>,
    ) -> bool {
        let subs = self.subscriptions.entry(topic.to_string()).or_default();
        if subs.iter().any(|sub| sub.matches(node_id, &callback)) {
            return false;
        }
        subs.push(Subscription {
            node_id: node_id.to_string(),
            callback,
        });
        true
    }

    pub fn unsubscribe(
        &mut self,
        topic: &str,
        node_id: &str,
        callback: &Arc<dyn EventCallback>,
    ) -> bool {
        let Some(subs) = self.subscriptions.get_mut(topic) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|sub| !sub.matches(node_id, callback));
        let removed = subs.len() != before;
        if subs.is_empty() {
            self.subscriptions.remove(topic);
        }
        removed
    }

    /// Topic → subscriber ids, in subscription order.
    pub fn subscription_summary(&self) -> BTreeMap<String, Vec<NodeId>> {
        self.subscriptions
            .iter()
            .map(|(topic, subs)| {
                (
                    topic.clone(),
                    subs.iter().map(|sub| sub.node_id.clone()).collect(),
                )
            })
            .collect()
    }

    fn callback_for(&self, topic: &str, node_id: &str) -> Option<Arc<dyn EventCallback>> {
        self.subscriptions
            .get(topic)?
            .iter()
            .find(|sub| sub.node_id == node_id)
            .map(|sub| Arc::clone(&sub.callback))
    }

    // =========================================================================
    // RESPONSE HANDLERS
    // =========================================================================

    /// Install a response handler. Returns false if the node is unknown.
    pub fn set_response_handler(
        &mut self,
        node_id: &str,
        handler: Arc<dyn ResponseHandler>,
    ) -> bool {
        if !self.nodes.contains_key(node_id) {
            return false;
        }
        self.response_handlers.insert(node_id.to_string(), handler);
        true
    }

    pub fn remove_response_handler(&mut self, node_id: &str) -> Option<Arc<dyn ResponseHandler>> {
        self.response_handlers.remove(node_id)
    }

    pub fn response_handler(&self, node_id: &str) -> Option<Arc<dyn ResponseHandler>> {
        self.response_handlers.get(node_id).cloned()
    }

    // =========================================================================
    // EVENT AUDIENCE
    // =========================================================================

    /// Resolve who receives an EVENT. The sender is always excluded and each
    /// node appears at most once.
    pub fn event_recipients(&self, message: &Message) -> Vec<Recipient> {
        let header = &message.header;
        let sender = header.sender_node.as_str();

        let audience: Vec<&str> = match header.delivery_target() {
            DeliveryTarget::Broadcast => {
                let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
                ids.sort_unstable();
                ids
            }
            DeliveryTarget::Topic => {
                let mut seen = HashSet::new();
                self.subscriptions
                    .get(&header.topic)
                    .map(|subs| {
                        subs.iter()
                            .map(|sub| sub.node_id.as_str())
                            .filter(|id| seen.insert(*id))
                            .collect()
                    })
                    .unwrap_or_default()
            }
            DeliveryTarget::Node(id) => vec![id],
        };

        audience
            .into_iter()
            .filter(|id| *id != sender)
            .filter_map(|id| {
                if let Some(callback) = self.callback_for(&header.topic, id) {
                    return Some(Recipient::Callback {
                        node_id: id.to_string(),
                        callback,
                    });
                }
                self.nodes.get(id).cloned().map(Recipient::Node)
            })
            .collect()
    }
}
