//! # Handler Traits
//!
//! The seams through which subsystems plug behaviour into the network.
//!
//! - [`MessageHandler`]: a node's generic handler, invoked for REQUESTs
//!   addressed to it and for EVENTs with no topic-specific callback.
//! - [`EventCallback`]: a topic subscription callback. Identity (`Arc`
//!   pointer equality) is what makes a subscription unique.
//! - [`ResponseHandler`]: installed by an interface so the router can hand
//!   RESPONSEs back to the waiting caller.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mycelium_types::{handler_fn, HandlerResult, Message};
//! use serde_json::json;
//!
//! let handler = handler_fn(|msg: Message| async move {
//!     HandlerResult::Ok(Some(json!({"echo": msg.payload})))
//! });
//! network.register_node_with_handler("NEXUS", "analysis", "1.0", vec![], handler);
//! ```

use crate::envelope::Message;
use crate::errors::HandlerResult;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A node's generic message handler.
///
/// The defaults echo REQUEST payloads back and ignore EVENTs, which keeps a
/// bare registered node useful for wiring tests.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a REQUEST. `Ok(Some(payload))` becomes the RESPONSE payload,
    /// `Ok(None)` sends no RESPONSE, `Err` becomes an ERROR RESPONSE.
    async fn handle_request(&self, message: &Message) -> HandlerResult<Option<Value>> {
        Ok(Some(message.payload.clone()))
    }

    /// Handle an EVENT delivered without a topic-specific callback.
    async fn handle_event(&self, _message: &Message) -> HandlerResult<()> {
        Ok(())
    }
}

/// Handler with the default echo behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl MessageHandler for EchoHandler {}

/// Topic subscription callback.
#[async_trait]
pub trait EventCallback: Send + Sync {
    /// Receive the full event message.
    async fn on_event(&self, message: Message) -> HandlerResult<()>;
}

#[async_trait]
impl<F, Fut> EventCallback for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult<()>> + Send + 'static,
{
    async fn on_event(&self, message: Message) -> HandlerResult<()> {
        (self)(message).await
    }
}

/// Sink for RESPONSE messages addressed to one node.
///
/// Implementations must not block: the router calls `deliver` inline.
pub trait ResponseHandler: Send + Sync {
    /// Resolve the waiter matching the message's correlation id.
    fn deliver(&self, message: Message);

    /// Cancel every outstanding waiter. Called when the node is removed.
    fn cancel_all(&self, reason: &str);
}

/// Request handler built from an async closure.
pub struct FnHandler<F, Fut> {
    func: F,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult<Option<Value>>> + Send + 'static,
{
    async fn handle_request(&self, message: &Message) -> HandlerResult<Option<Value>> {
        (self.func)(message.clone()).await
    }
}

/// Wrap an async closure as a node handler answering REQUESTs.
pub fn handler_fn<F, Fut>(func: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Option<Value>>> + Send + 'static,
{
    Arc::new(FnHandler {
        func,
        _future: PhantomData,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HandlerError;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_handler() {
        let msg = Message::request("A", "B", "ping", json!({"n": 1}));
        let reply = EchoHandler.handle_request(&msg).await.unwrap();
        assert_eq!(reply, Some(json!({"n": 1})));
        assert!(EchoHandler.handle_event(&msg).await.is_ok());
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let handler = handler_fn(|msg: Message| async move {
            let n = msg.payload["n"].as_i64().unwrap_or_default();
            HandlerResult::Ok(Some(json!({"n": n + 1})))
        });

        let msg = Message::request("A", "B", "ping", json!({"n": 1}));
        assert_eq!(
            handler.handle_request(&msg).await.unwrap(),
            Some(json!({"n": 2}))
        );
    }

    #[tokio::test]
    async fn test_closure_event_callback() {
        let callback: Arc<dyn EventCallback> = Arc::new(|msg: Message| async move {
            if msg.payload["fail"].as_bool() == Some(true) {
                return Err(HandlerError::failed("asked to fail"));
            }
            Ok(())
        });

        let ok = Message::event("A", "B", "t", json!({"fail": false}));
        let bad = Message::event("A", "B", "t", json!({"fail": true}));
        assert!(callback.on_event(ok).await.is_ok());
        assert!(callback.on_event(bad).await.is_err());
    }
}
