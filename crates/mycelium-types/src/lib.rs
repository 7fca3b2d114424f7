//! # Mycelium Types Crate
//!
//! This crate contains the node record, the message envelope and the error
//! taxonomy used by every participant of the Mycelium network.
//!
//! ## Design Principles
//!
//! - **Single Envelope**: REQUEST, RESPONSE and EVENT traffic all travel as a
//!   [`Message`] with one uniform header.
//! - **Wire Shape Is The Contract**: the serde representation of [`Message`]
//!   is the only external contract the core exposes.
//! - **Handlers Own Logic**: subsystems plug behaviour in through
//!   [`MessageHandler`] and [`EventCallback`]; the core never interprets
//!   payloads beyond the `status` / `error_message` convention.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod envelope;
pub mod errors;
pub mod handler;
pub mod node;

pub use envelope::{
    error_payload, payload_error_message, DeliveryTarget, Message, MessageHeader, MessageType,
    Priority, BROADCAST_TARGET, TOPIC_TARGET,
};
pub use errors::{HandlerError, HandlerResult, MyceliumError, MyceliumResult};
pub use handler::{handler_fn, EchoHandler, EventCallback, MessageHandler, ResponseHandler};
pub use node::{Node, NodeId, NodeSnapshot, NodeStatus};

/// Protocol version stamped on every envelope.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Topic used by `report_health` style announcements.
pub const HEALTH_REPORT_TOPIC: &str = "event.mycelium.health_report";

/// Topic answered by the runtime supervisor with a network status snapshot.
pub const NETWORK_STATUS_TOPIC: &str = "request.mycelium.network_status";
