//! # Node Record
//!
//! Identity, capability and health record for one registered participant.
//!
//! A node is created by `register_node`, updated in place on re-registration
//! or status updates, and destroyed by `remove_node`. Its id never changes.

use crate::envelope::{Message, MessageType};
use crate::errors::{HandlerError, HandlerResult};
use crate::handler::{EchoHandler, MessageHandler};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Unique identifier of a node (e.g. `"CRONOS"`, `"ATLAS"`).
pub type NodeId = String;

/// Health status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Created but not yet registered.
    Initializing,
    /// Registered and operating normally.
    Active,
    /// Operating with reduced capability.
    Degraded,
    /// Not operating.
    Inactive,
}

impl NodeStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "initializing" => Ok(Self::Initializing),
            "active" => Ok(Self::Active),
            "degraded" => Ok(Self::Degraded),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown node status: {other}")),
        }
    }
}

/// Read-only view of a node, as reported by `get_network_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub node_type: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub status: NodeStatus,
    pub health_details: Map<String, Value>,
    pub last_update: DateTime<Utc>,
}

/// A registered participant.
#[derive(Clone)]
pub struct Node {
    id: NodeId,
    node_type: String,
    version: String,
    capabilities: BTreeSet<String>,
    status: NodeStatus,
    health_details: Map<String, Value>,
    last_update: DateTime<Utc>,
    handler: Arc<dyn MessageHandler>,
}

impl Node {
    /// Create a node in the `initializing` state with the echo handler.
    pub fn new<I, S>(
        id: impl Into<NodeId>,
        node_type: impl Into<String>,
        version: impl Into<String>,
        capabilities: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            version: version.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            status: NodeStatus::Initializing,
            health_details: Map::new(),
            last_update: Utc::now(),
            handler: Arc::new(EchoHandler),
        }
    }

    /// Install the handler that answers REQUESTs and generic EVENTs.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Replace the handler of an existing node.
    pub fn set_handler(&mut self, handler: Arc<dyn MessageHandler>) {
        self.handler = handler;
        self.last_update = Utc::now();
    }

    /// Idempotent upsert of the descriptive fields; marks the node active.
    pub fn register<I, S>(
        &mut self,
        node_type: impl Into<String>,
        version: impl Into<String>,
        capabilities: I,
    )
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node_type = node_type.into();
        self.version = version.into();
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self.update_status(NodeStatus::Active, None);
    }

    /// Set status and health details and bump `last_update`.
    ///
    /// `None` keeps the current details.
    pub fn update_status(&mut self, status: NodeStatus, details: Option<Map<String, Value>>) {
        self.status = status;
        if let Some(details) = details {
            self.health_details = details;
        }
        self.last_update = Utc::now();
    }

    /// Run this node's handler on `message`.
    ///
    /// REQUEST returns the reply payload (or `None` for no reply), EVENT and
    /// RESPONSE return `None`. Fails fast on a node that was never registered.
    pub async fn process_message(&self, message: &Message) -> HandlerResult<Option<Value>> {
        if self.status == NodeStatus::Initializing {
            return Err(HandlerError::NotRegistered(self.id.clone()));
        }

        match message.message_type() {
            MessageType::Request => self.handler.handle_request(message).await,
            MessageType::Event => {
                self.handler.handle_event(message).await?;
                Ok(None)
            }
            MessageType::Response => Ok(None),
        }
    }

    #[must_use]
    pub fn get_status(&self) -> NodeSnapshot {
        NodeSnapshot {
            node_id: self.id.clone(),
            node_type: self.node_type.clone(),
            version: self.version.clone(),
            capabilities: self.capabilities.iter().cloned().collect(),
            status: self.status,
            health_details: self.health_details.clone(),
            last_update: self.last_update,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    #[must_use]
    pub fn status(&self) -> NodeStatus {
        self.status
    }

    #[must_use]
    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("node_type", &self.node_type)
            .field("version", &self.version)
            .field("capabilities", &self.capabilities)
            .field("status", &self.status)
            .field("last_update", &self.last_update)
            .finish_non_exhaustive()
    }
}
