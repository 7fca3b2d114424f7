//! # Message Envelope
//!
//! The universal header + payload unit for all Mycelium traffic.
//!
//! ## Properties
//!
//! - **Versioning**: every header carries a `version` string.
//! - **Correlation**: REQUEST/RESPONSE pairs share a `correlation_id`;
//!   EVENT messages never carry one.
//! - **Addressing**: `target_node` is either a node id or one of the two
//!   sentinels [`BROADCAST_TARGET`] / [`TOPIC_TARGET`].
//!
//! ## Wire Shape
//!
//! ```text
//! {
//!   "header": {
//!     "message_id", "correlation_id", "timestamp", "sender_node",
//!     "target_node", "topic", "message_type", "priority", "version"
//!   },
//!   "payload": <application-defined>
//! }
//! ```

use crate::errors::MyceliumError;
use crate::node::NodeId;
use crate::PROTOCOL_VERSION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Sentinel target: deliver an EVENT to every registered node except the sender.
pub const BROADCAST_TARGET: &str = "BROADCAST";

/// Sentinel target: deliver an EVENT to every subscriber of the header's topic.
pub const TOPIC_TARGET: &str = "TOPIC_TARGET";

/// Kind of traffic carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    /// Expects exactly one RESPONSE with the same correlation id.
    Request,
    /// Answer to a REQUEST.
    Response,
    /// Fire-and-forget notification.
    Event,
}

impl MessageType {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Response => "RESPONSE",
            Self::Event => "EVENT",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory priority. The dispatcher does not reorder on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Typed view of the `target_node` header field.
///
/// The wire format keeps the string sentinels; this enum only makes the
/// delivery mode explicit at the routing site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryTarget<'a> {
    /// Every registered node except the sender.
    Broadcast,
    /// Every subscriber of the message topic.
    Topic,
    /// One concrete node.
    Node(&'a str),
}

/// Envelope header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Unique per message.
    pub message_id: String,
    /// Present only on REQUEST/RESPONSE pairs.
    pub correlation_id: Option<String>,
    /// Creation time, serialized as RFC 3339.
    pub timestamp: DateTime<Utc>,
    /// Originating node id.
    pub sender_node: NodeId,
    /// Node id, [`BROADCAST_TARGET`] or [`TOPIC_TARGET`].
    pub target_node: NodeId,
    /// Channel name used for fan-out and as an addressing convention.
    pub topic: String,
    /// REQUEST / RESPONSE / EVENT.
    pub message_type: MessageType,
    /// Advisory priority.
    #[serde(default)]
    pub priority: Priority,
    /// Envelope version.
    pub version: String,
}

impl MessageHeader {
    fn new(
        sender: impl Into<NodeId>,
        target: impl Into<NodeId>,
        topic: impl Into<String>,
        message_type: MessageType,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            message_id: new_id(),
            correlation_id,
            timestamp: Utc::now(),
            sender_node: sender.into(),
            target_node: target.into(),
            topic: topic.into(),
            message_type,
            priority: Priority::default(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Interpret `target_node`.
    #[must_use]
    pub fn delivery_target(&self) -> DeliveryTarget<'_> {
        match self.target_node.as_str() {
            BROADCAST_TARGET => DeliveryTarget::Broadcast,
            TOPIC_TARGET => DeliveryTarget::Topic,
            node => DeliveryTarget::Node(node),
        }
    }

    /// Check the fields the router relies on.
    ///
    /// Sender, target and topic must be non-empty; REQUEST and RESPONSE
    /// headers must carry a correlation id.
    pub fn validate(&self) -> Result<(), MyceliumError> {
        let missing = [
            ("sender_node", self.sender_node.is_empty()),
            ("target_node", self.target_node.is_empty()),
            ("topic", self.topic.is_empty()),
        ]
        .iter()
        .filter(|(_, empty)| *empty)
        .map(|(name, _)| *name)
        .collect::<Vec<_>>();

        if !missing.is_empty() {
            return Err(MyceliumError::InvalidMessage(format!(
                "header missing required fields: {}",
                missing.join(", ")
            )));
        }

        if self.message_type != MessageType::Event && self.correlation_id.is_none() {
            return Err(MyceliumError::InvalidMessage(format!(
                "{} {} has no correlation_id",
                self.message_type, self.message_id
            )));
        }

        Ok(())
    }
}

/// Header + payload unit routed by the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Value,
}

impl Message {
    /// Build a REQUEST with a fresh correlation id.
    pub fn request(
        sender: impl Into<NodeId>,
        target: impl Into<NodeId>,
        topic: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            header: MessageHeader::new(
                sender,
                target,
                topic,
                MessageType::Request,
                Some(new_id()),
            ),
            payload,
        }
    }

    /// Build an EVENT. Use [`TOPIC_TARGET`] or [`BROADCAST_TARGET`] as the
    /// target for fan-out delivery.
    pub fn event(
        sender: impl Into<NodeId>,
        target: impl Into<NodeId>,
        topic: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            header: MessageHeader::new(sender, target, topic, MessageType::Event, None),
            payload,
        }
    }

    /// Build the RESPONSE for `request`.
    ///
    /// Sender and target are swapped; correlation id, topic and priority are
    /// preserved.
    #[must_use]
    pub fn response_to(request: &Message, payload: Value) -> Self {
        let req = &request.header;
        let mut header = MessageHeader::new(
            req.target_node.clone(),
            req.sender_node.clone(),
            req.topic.clone(),
            MessageType::Response,
            req.correlation_id.clone(),
        );
        header.priority = req.priority;
        Self { header, payload }
    }

    /// Set the advisory priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.header.priority = priority;
        self
    }

    /// Shorthand for `header.correlation_id`.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.header.correlation_id.as_deref()
    }

    /// Shorthand for `header.message_type`.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }
}

/// Build the conventional error payload.
pub fn error_payload(message: impl Into<String>) -> Value {
    serde_json::json!({
        "status": "ERROR",
        "error_message": message.into(),
    })
}

/// Extract the embedded message from an error payload.
///
/// Returns `None` unless the payload is an object with `"status": "ERROR"`.
#[must_use]
pub fn payload_error_message(payload: &Value) -> Option<String> {
    if payload.get("status").and_then(Value::as_str) != Some("ERROR") {
        return None;
    }
    Some(
        payload
            .get("error_message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string(),
    )
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}
