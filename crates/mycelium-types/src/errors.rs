//! # Error Types
//!
//! Defines the error taxonomy shared by the network, the interface and
//! subsystem handlers.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the network and interface APIs.
///
/// Callers of `send_request` handle exactly three outcomes: a success
/// payload, [`MyceliumError::Application`], or one of the transport errors
/// ([`MyceliumError::Timeout`], [`MyceliumError::Connection`],
/// [`MyceliumError::ConnectionAborted`]).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MyceliumError {
    /// Operation attempted on a disconnected or never-connected interface.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A pending request was cancelled because its node disconnected.
    #[error("Connection aborted: {0}")]
    ConnectionAborted(String),

    /// REQUEST addressed to an unknown node. The router sends its text back
    /// as the message of an ERROR RESPONSE, so callers see it wrapped in
    /// [`MyceliumError::Application`].
    #[error("Target node '{target}' not found")]
    Routing { target: String },

    /// No RESPONSE arrived before the caller's deadline.
    #[error("Timeout waiting for response {correlation_id} from {target} on topic {topic} after {timeout:?}")]
    Timeout {
        correlation_id: String,
        target: String,
        topic: String,
        timeout: Duration,
    },

    /// The target handler failed or returned an error payload.
    #[error("Error response from {source_node}: {message}")]
    Application { source_node: String, message: String },

    /// Malformed envelope.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Programmer misuse (empty node id and similar).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl MyceliumError {
    /// True for the deadline outcome.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True when the remote handler reported the failure.
    #[must_use]
    pub fn is_application(&self) -> bool {
        matches!(self, Self::Application { .. })
    }
}

/// Result alias for network and interface operations.
pub type MyceliumResult<T> = Result<T, MyceliumError>;

/// Errors raised by message handlers and subscriber callbacks.
///
/// These never cross the dispatcher boundary: for REQUEST traffic they are
/// converted into an ERROR RESPONSE, for EVENT traffic they are logged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// Handler-specific failure.
    #[error("{0}")]
    Failed(String),

    /// `process_message` called on a node that was never registered.
    #[error("node {0} is not registered")]
    NotRegistered(String),
}

impl HandlerError {
    /// Convenience constructor for handler failures.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Failed(format!("payload serialization failed: {err}"))
    }
}

/// Result alias for handler code.
pub type HandlerResult<T> = Result<T, HandlerError>;
