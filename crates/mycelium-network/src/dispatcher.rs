//! The dispatcher task.
//!
//! Exactly one runs per started network. It pulls messages off the queue in
//! FIFO order and routes them:
//!
//! - RESPONSE: handed to the target's response handler inline.
//! - REQUEST: processed by the target node in a spawned task; the result is
//!   routed back as a RESPONSE.
//! - EVENT: one spawned task per recipient.
//!
//! The loop itself never waits for capacity. Spawned deliveries take a
//! [`DeliverySlot`] before running handler code, so at most `max_in_flight`
//! handlers run at once. A delivery awaiting one of its own nested requests
//! hands its slot back until the reply arrives. A failing or panicking
//! handler never takes the dispatcher down.

use crate::network::NetworkShared;
use crate::registry::Recipient;
use futures::FutureExt;
use mycelium_telemetry::{HANDLER_ERRORS, IN_FLIGHT_TASKS, MESSAGES_DROPPED, MESSAGES_ROUTED};
use mycelium_types::{error_payload, Message, MessageType, MyceliumError, Node};
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

tokio::task_local! {
    static DELIVERY_SLOT: Arc<DeliverySlot>;
}

/// Run until `shutdown` fires, then drain and hand the queue back.
pub(crate) async fn run(
    shared: Arc<NetworkShared>,
    mut queue: mpsc::UnboundedReceiver<Message>,
    mut shutdown: watch::Receiver<bool>,
) -> mpsc::UnboundedReceiver<Message> {
    let permits = Arc::new(Semaphore::new(shared.config.effective_max_in_flight()));
    let mut tasks = JoinSet::new();

    info!(
        max_in_flight = shared.config.effective_max_in_flight(),
        "Mycelium message processor started"
    );

    loop {
        tokio::select! {
            biased;

            _ = stopped(&mut shutdown) => break,

            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(error = %e, "Delivery task panicked");
                    }
                }
            }

            received = queue.recv() => {
                let Some(message) = received else { break };
                shared.queue_depth_dec();
                let delivery = Delivery {
                    shared: &shared,
                    tasks: &mut tasks,
                    permits: &permits,
                    shutdown: &shutdown,
                };
                delivery.dispatch(message);
            }
        }
    }

    drain(&shared, tasks).await;
    info!("Mycelium message processor stopped");
    queue
}

/// Resolves once a stop was requested or the network handle is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Wait up to the grace period for running deliveries, then abort the rest.
async fn drain(shared: &NetworkShared, mut tasks: JoinSet<()>) {
    if tasks.is_empty() {
        return;
    }

    let running = tasks.len();
    let grace = shared.config.shutdown_grace;
    let finished = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if finished.is_err() {
        warn!(
            remaining = tasks.len(),
            running_at_stop = running,
            grace_ms = grace.as_millis(),
            "Aborting deliveries still running after shutdown grace period"
        );
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
}

fn count_routed(shared: &NetworkShared, message_type: MessageType) {
    MESSAGES_ROUTED
        .with_label_values(&[message_type.as_str()])
        .inc();
    shared.counters.routed.fetch_add(1, Ordering::Relaxed);
}

fn count_dropped(shared: &NetworkShared, reason: &str) {
    MESSAGES_DROPPED.with_label_values(&[reason]).inc();
    shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
}

/// Await `future` with the current delivery's slot handed back.
///
/// Outside a delivery task this is a plain `future.await`.
pub(crate) async fn without_slot<F: Future>(future: F) -> F::Output {
    let Ok(slot) = DELIVERY_SLOT.try_with(Arc::clone) else {
        return future.await;
    };

    let output = {
        let _waiting = slot.release();
        future.await
    };
    slot.reclaim().await;
    output
}

/// A delivery's claim on the concurrency limit.
pub(crate) struct DeliverySlot {
    permits: Arc<Semaphore>,
    state: Mutex<SlotState>,
}

struct SlotState {
    permit: Option<OwnedSemaphorePermit>,
    /// Nested requests currently awaited by this delivery.
    waiting: usize,
}

impl DeliverySlot {
    /// Take a slot, or `None` if shutdown was requested first.
    async fn acquire(
        permits: &Arc<Semaphore>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Arc<Self>> {
        let permit = tokio::select! {
            biased;
            _ = stopped(shutdown) => None,
            acquired = Arc::clone(permits).acquire_owned() => acquired.ok(),
        }?;

        Some(Arc::new(Self {
            permits: Arc::clone(permits),
            state: Mutex::new(SlotState {
                permit: Some(permit),
                waiting: 0,
            }),
        }))
    }

    fn release(&self) -> Waiting<'_> {
        let mut state = self.state.lock();
        state.waiting += 1;
        state.permit = None;
        Waiting { slot: self }
    }

    /// Retake the permit once no nested request is outstanding.
    async fn reclaim(&self) {
        {
            let state = self.state.lock();
            if state.waiting > 0 || state.permit.is_some() {
                return;
            }
        }

        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };
        let mut state = self.state.lock();
        if state.waiting == 0 && state.permit.is_none() {
            state.permit = Some(permit);
        }
    }
}

/// Marks one outstanding nested request; cleared on drop so a cancelled
/// wait does not leave the count behind.
struct Waiting<'a> {
    slot: &'a DeliverySlot,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        let mut state = self.slot.state.lock();
        state.waiting = state.waiting.saturating_sub(1);
    }
}

/// Borrowed dispatcher state for routing one dequeued message.
struct Delivery<'a> {
    shared: &'a Arc<NetworkShared>,
    tasks: &'a mut JoinSet<()>,
    permits: &'a Arc<Semaphore>,
    shutdown: &'a watch::Receiver<bool>,
}

impl Delivery<'_> {
    fn dispatch(self, message: Message) {
        if let Err(e) = message.header.validate() {
            count_dropped(self.shared, "invalid_header");
            warn!(message_id = %message.header.message_id, error = %e, "Dropping invalid message");
            return;
        }

        match message.message_type() {
            MessageType::Response => deliver_response(self.shared, message),
            MessageType::Request => self.dispatch_request(message),
            MessageType::Event => self.dispatch_event(message),
        }
    }

    fn dispatch_request(mut self, message: Message) {
        let target = message.header.target_node.clone();
        let node = self.shared.registry.read().node(&target).cloned();

        let Some(node) = node else {
            count_dropped(self.shared, "unknown_target");
            warn!(
                sender = %message.header.sender_node,
                target = %target,
                topic = %message.header.topic,
                correlation_id = ?message.correlation_id(),
                "Target node for request not found"
            );
            let routing = MyceliumError::Routing { target };
            let reply = Message::response_to(&message, error_payload(routing.to_string()));
            self.shared.enqueue(reply);
            return;
        };

        self.tasks.spawn(process_request(
            Arc::clone(self.shared),
            Arc::clone(self.permits),
            self.shutdown.clone(),
            node,
            message,
        ));
    }

    /// Fan an EVENT out, one task per recipient.
    fn dispatch_event(mut self, message: Message) {
        let recipients = self.shared.registry.read().event_recipients(&message);

        if recipients.is_empty() {
            count_dropped(self.shared, "no_recipients");
            debug!(
                sender = %message.header.sender_node,
                target = %message.header.target_node,
                topic = %message.header.topic,
                "Event has no recipients"
            );
            return;
        }

        count_routed(self.shared, MessageType::Event);
        let message = Arc::new(message);
        for recipient in recipients {
            self.tasks.spawn(deliver_event(
                Arc::clone(self.shared),
                Arc::clone(self.permits),
                self.shutdown.clone(),
                recipient,
                Arc::clone(&message),
            ));
        }
    }
}

fn deliver_response(shared: &NetworkShared, message: Message) {
    let target = message.header.target_node.clone();
    let handler = shared.registry.read().response_handler(&target);

    let Some(handler) = handler else {
        count_dropped(shared, "no_response_handler");
        warn!(
            target = %target,
            correlation_id = ?message.correlation_id(),
            "No response handler registered, dropping response"
        );
        return;
    };

    count_routed(shared, MessageType::Response);
    debug!(
        target = %target,
        correlation_id = ?message.correlation_id(),
        "Delivering response"
    );
    let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| handler.deliver(message)));
    if let Err(panic) = delivered {
        HANDLER_ERRORS.with_label_values(&["panic"]).inc();
        shared.counters.handler_errors.fetch_add(1, Ordering::Relaxed);
        error!(
            target = %target,
            panic = %panic_message(panic.as_ref()),
            "Response handler panicked"
        );
    }
}

async fn process_request(
    shared: Arc<NetworkShared>,
    permits: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
    node: Node,
    message: Message,
) {
    let Some(slot) = DeliverySlot::acquire(&permits, &mut shutdown).await else {
        // Keep it for the next start().
        debug!(
            correlation_id = ?message.correlation_id(),
            "Network stopping before request started, requeued"
        );
        shared.enqueue(message);
        return;
    };

    count_routed(&shared, MessageType::Request);
    let guard = InFlight::enter(shared);
    let node_id = node.id().to_string();
    debug!(
        node_id = %node_id,
        topic = %message.header.topic,
        correlation_id = ?message.correlation_id(),
        "Processing request"
    );

    let handling = AssertUnwindSafe(node.process_message(&message)).catch_unwind();
    let outcome = DELIVERY_SLOT.scope(slot, handling).await;

    let payload = match outcome {
        Ok(Ok(Some(payload))) => payload,
        Ok(Ok(None)) => {
            debug!(
                node_id = %node_id,
                topic = %message.header.topic,
                "Handler produced no response"
            );
            return;
        }
        Ok(Err(e)) => {
            guard.handler_failed("request");
            error!(
                node_id = %node_id,
                topic = %message.header.topic,
                error = %e,
                "Request handler failed"
            );
            error_payload(format!("Error processing request in {node_id}: {e}"))
        }
        Err(panic) => {
            guard.handler_failed("panic");
            let reason = panic_message(panic.as_ref());
            error!(
                node_id = %node_id,
                topic = %message.header.topic,
                panic = %reason,
                "Request handler panicked"
            );
            error_payload(format!(
                "Error processing request in {node_id}: handler panicked: {reason}"
            ))
        }
    };

    guard.shared.enqueue(Message::response_to(&message, payload));
}

async fn deliver_event(
    shared: Arc<NetworkShared>,
    permits: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
    recipient: Recipient,
    message: Arc<Message>,
) {
    let node_id = recipient.node_id().to_string();
    let topic = message.header.topic.clone();

    let Some(slot) = DeliverySlot::acquire(&permits, &mut shutdown).await else {
        warn!(node_id = %node_id, topic = %topic, "Network stopping, event delivery skipped");
        return;
    };
    let guard = InFlight::enter(shared);

    let delivery = async move {
        match recipient {
            Recipient::Callback { callback, .. } => {
                callback.on_event(Message::clone(&message)).await
            }
            Recipient::Node(node) => node.process_message(&message).await.map(|_| ()),
        }
    };
    let outcome = DELIVERY_SLOT
        .scope(slot, AssertUnwindSafe(delivery).catch_unwind())
        .await;

    match outcome {
        Ok(Ok(())) => debug!(node_id = %node_id, topic = %topic, "Event delivered"),
        Ok(Err(e)) => {
            guard.handler_failed("event");
            error!(node_id = %node_id, topic = %topic, error = %e, "Error delivering event");
        }
        Err(panic) => {
            guard.handler_failed("panic");
            error!(
                node_id = %node_id,
                topic = %topic,
                panic = %panic_message(panic.as_ref()),
                "Event callback panicked"
            );
        }
    }
}

/// Held by every delivery that got a slot. Decrements the in-flight count
/// on drop, including when the task is aborted.
struct InFlight {
    shared: Arc<NetworkShared>,
}

impl InFlight {
    fn enter(shared: Arc<NetworkShared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::Relaxed);
        IN_FLIGHT_TASKS.inc();
        Self { shared }
    }

    fn handler_failed(&self, kind: &str) {
        HANDLER_ERRORS.with_label_values(&[kind]).inc();
        self.shared
            .counters
            .handler_errors
            .fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::Relaxed);
        IN_FLIGHT_TASKS.dec();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
