//! Shared fixtures for the integration tests and benchmarks.

use async_trait::async_trait;
use mycelium_network::{Interface, MyceliumNetwork, NetworkConfig};
use mycelium_types::{EventCallback, HandlerResult, Message, MessageHandler};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A started network with the default configuration.
pub fn started_network() -> Arc<MyceliumNetwork> {
    started_network_with(NetworkConfig::default())
}

/// A started network. Must be called inside a Tokio runtime.
pub fn started_network_with(config: NetworkConfig) -> Arc<MyceliumNetwork> {
    let network = Arc::new(MyceliumNetwork::new(config));
    network.start();
    network
}

/// Connect `node_id` with the default echo handler.
pub fn connected(network: &Arc<MyceliumNetwork>, node_id: &str) -> Interface {
    let interface = Interface::new(Arc::clone(network), node_id).expect("valid node id");
    assert!(interface.connect("test", "1.0", ["test"]));
    interface
}

/// Connect `node_id` with `handler` answering its REQUESTs.
pub fn connected_with(
    network: &Arc<MyceliumNetwork>,
    node_id: &str,
    handler: Arc<dyn MessageHandler>,
) -> Interface {
    let interface = Interface::new(Arc::clone(network), node_id).expect("valid node id");
    assert!(interface.connect_with_handler("test", "1.0", ["test"], handler));
    interface
}

/// Records every event it receives, either as a topic callback or as a
/// node's generic event handler.
#[derive(Default)]
pub struct EventRecorder {
    received: Mutex<Vec<Message>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.received
            .lock()
            .iter()
            .map(|message| message.payload.clone())
            .collect()
    }

    /// Wait until at least `count` events arrived. Returns false on deadline.
    pub async fn wait_for(&self, count: usize, within: Duration) -> bool {
        tokio::time::timeout(within, async {
            while self.count() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl EventCallback for EventRecorder {
    async fn on_event(&self, message: Message) -> HandlerResult<()> {
        self.received.lock().push(message);
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for EventRecorder {
    async fn handle_request(&self, _message: &Message) -> HandlerResult<Option<Value>> {
        Ok(None)
    }

    async fn handle_event(&self, message: &Message) -> HandlerResult<()> {
        self.received.lock().push(message.clone());
        Ok(())
    }
}

/// Handler that sleeps before echoing, for timeout and concurrency tests.
pub struct SlowEcho {
    pub delay: Duration,
}

#[async_trait]
impl MessageHandler for SlowEcho {
    async fn handle_request(&self, message: &Message) -> HandlerResult<Option<Value>> {
        tokio::time::sleep(self.delay).await;
        Ok(Some(message.payload.clone()))
    }
}
