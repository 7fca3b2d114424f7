//! # Mycelium Network
//!
//! In-process message router connecting the Mycelium subsystems.
//!
//! ## Messaging Patterns
//!
//! | Pattern | Addressing | Reply |
//! |---------|------------|-------|
//! | Request/Response | one node id | RESPONSE matched by correlation id |
//! | Topic event | `TOPIC_TARGET` | none |
//! | Broadcast event | `BROADCAST` | none |
//! | Direct event | one node id | none |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐ route_message ┌────────────┐ spawn ┌───────────────────┐
//! │ Interface │ ────────────► │   queue    │ ────► │ per-message tasks │
//! └───────────┘               │ dispatcher │       │ (semaphore bound) │
//!       ▲                     └────────────┘       └───────────────────┘
//!       │ RESPONSE (inline)         │                        │
//!       └───────────────────────────┴────────────────────────┘
//! ```
//!
//! - [`MyceliumNetwork`]: registry of nodes, connections and subscriptions,
//!   plus the single dispatcher task.
//! - [`Interface`]: one node's handle; awaitable requests, events, health.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
mod dispatcher;
pub mod interface;
pub mod network;
pub mod pending;
mod registry;

pub use config::NetworkConfig;
pub use interface::Interface;
pub use network::{MyceliumNetwork, NetworkStatus, RoutingStats};
pub use pending::{PendingResponses, PendingStats, PendingStatsSnapshot, WaiterOutcome};
