//! Pending response store.
//!
//! Maps correlation ids to callers blocked in `send_request`. Each
//! [`Interface`](crate::Interface) owns one store and installs it as its
//! node's [`ResponseHandler`], so the dispatcher resolves waiters without
//! knowing anything about them.
//!
//! Flow:
//! 1. `send_request` builds the REQUEST and calls `register()` with its
//!    correlation id to get a oneshot receiver
//! 2. The REQUEST is enqueued on the network
//! 3. The dispatcher routes the RESPONSE to the store, which calls `complete()`
//! 4. The caller awaits the receiver or times out, then `remove()`s the entry

use dashmap::DashMap;
use mycelium_telemetry::LATE_RESPONSES;
use mycelium_types::{Message, ResponseHandler};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// What a waiter resolves to: the raw RESPONSE payload, or the reason the
/// wait was cancelled.
pub type WaiterOutcome = Result<Value, String>;

/// A caller waiting for a RESPONSE.
struct PendingRequest {
    sender: oneshot::Sender<WaiterOutcome>,
    created_at: Instant,
    target: String,
    topic: String,
}

/// Counters for one pending store.
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total waiters registered
    pub total_registered: AtomicU64,
    /// Total waiters resolved with a RESPONSE
    pub total_completed: AtomicU64,
    /// Total waiters that hit their deadline
    pub total_timeouts: AtomicU64,
    /// Total waiters cancelled (disconnect or dropped caller)
    pub total_cancelled: AtomicU64,
    /// RESPONSEs for unknown or already-resolved correlation ids
    pub total_late: AtomicU64,
}

/// Point-in-time copy of [`PendingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingStatsSnapshot {
    pub registered: u64,
    pub completed: u64,
    pub timeouts: u64,
    pub cancelled: u64,
    pub late: u64,
    pub pending: usize,
}

/// Correlation id → waiter map owned by one node.
pub struct PendingResponses {
    node_id: String,
    pending: DashMap<String, PendingRequest>,
    stats: PendingStats,
}

impl PendingResponses {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            pending: DashMap::new(),
            stats: PendingStats::default(),
        }
    }

    /// Register a waiter for `correlation_id`.
    pub fn register(
        &self,
        correlation_id: &str,
        target: &str,
        topic: &str,
    ) -> oneshot::Receiver<WaiterOutcome> {
        let (tx, rx) = oneshot::channel();

        let request = PendingRequest {
            sender: tx,
            created_at: Instant::now(),
            target: target.to_string(),
            topic: topic.to_string(),
        };

        self.pending.insert(correlation_id.to_string(), request);
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(
            node_id = %self.node_id,
            correlation_id = correlation_id,
            target = target,
            topic = topic,
            "Registered pending request"
        );

        rx
    }

    /// Resolve the waiter for `correlation_id` with `payload`.
    ///
    /// Returns false if no waiter exists or its caller already gave up.
    pub fn complete(&self, correlation_id: &str, payload: Value) -> bool {
        let Some((_, pending)) = self.pending.remove(correlation_id) else {
            self.stats.total_late.fetch_add(1, Ordering::Relaxed);
            LATE_RESPONSES.inc();
            warn!(
                node_id = %self.node_id,
                correlation_id = correlation_id,
                "Received response for unknown/timed-out/cancelled correlation_id"
            );
            return false;
        };

        let response_time = pending.created_at.elapsed();
        match pending.sender.send(Ok(payload)) {
            Ok(()) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    node_id = %self.node_id,
                    correlation_id = correlation_id,
                    target = %pending.target,
                    topic = %pending.topic,
                    response_time_ms = response_time.as_millis(),
                    "Completed pending request"
                );
                true
            }
            Err(_) => {
                // Receiver was dropped between removal and send
                self.stats.total_late.fetch_add(1, Ordering::Relaxed);
                LATE_RESPONSES.inc();
                debug!(
                    node_id = %self.node_id,
                    correlation_id = correlation_id,
                    "Pending request receiver dropped"
                );
                false
            }
        }
    }

    /// Remove a waiter without resolving it. Used once the caller is done.
    pub fn remove(&self, correlation_id: &str) -> bool {
        self.pending.remove(correlation_id).is_some()
    }

    /// Count a deadline expiry.
    pub fn record_timeout(&self) {
        self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a caller that stopped waiting before any outcome.
    pub fn record_abandoned(&self) {
        self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Fail every outstanding waiter with `reason`.
    ///
    /// Returns the number of waiters cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();

        let mut cancelled = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                // The caller may already be gone; nothing to do then.
                let _ = pending.sender.send(Err(reason.to_string()));
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            self.stats
                .total_cancelled
                .fetch_add(cancelled as u64, Ordering::Relaxed);
            warn!(
                node_id = %self.node_id,
                cancelled = cancelled,
                reason = reason,
                "Cancelled pending requests"
            );
        }

        cancelled
    }

    /// Number of currently pending waiters
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a correlation id is pending
    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub fn stats(&self) -> PendingStatsSnapshot {
        PendingStatsSnapshot {
            registered: self.stats.total_registered.load(Ordering::Relaxed),
            completed: self.stats.total_completed.load(Ordering::Relaxed),
            timeouts: self.stats.total_timeouts.load(Ordering::Relaxed),
            cancelled: self.stats.total_cancelled.load(Ordering::Relaxed),
            late: self.stats.total_late.load(Ordering::Relaxed),
            pending: self.pending.len(),
        }
    }
}

impl ResponseHandler for PendingResponses {
    fn deliver(&self, message: Message) {
        match message.header.correlation_id {
            Some(ref correlation_id) => {
                self.complete(correlation_id, message.payload);
            }
            None => warn!(
                node_id = %self.node_id,
                message_id = %message.header.message_id,
                "Response without correlation_id ignored"
            ),
        }
    }

    fn cancel_all(&self, reason: &str) {
        PendingResponses::cancel_all(self, reason);
    }
}
