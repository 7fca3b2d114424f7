//! # End-to-End Scenarios
//!
//! Request/response and event flows between subsystem nodes sharing one
//! network.
//!
//! ## Flows Tested:
//!
//! 1. **Request → Response**: a handler's payload reaches the caller unchanged
//! 2. **Request → unknown node**: the network answers with an ERROR response
//! 3. **Topic event**: exactly one delivery per subscriber
//! 4. **Slow handler**: the caller's deadline wins over the handler

#[cfg(test)]
mod tests {
    use super::super::fixtures::{
        connected, connected_with, started_network, EventRecorder, SlowEcho,
    };
    use mycelium_types::{handler_fn, EventCallback, HandlerError, Message, MyceliumError};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    // =============================================================================
    // REQUEST / RESPONSE
    // =============================================================================

    /// A sends "ping" {"n":1} to B, B answers {"n":2}
    #[tokio::test]
    async fn test_request_receives_handler_payload() {
        let network = started_network();
        let a = connected(&network, "A");
        let _b = connected_with(
            &network,
            "B",
            handler_fn(|message: Message| async move {
                let n = message.payload["n"].as_i64().unwrap_or_default();
                Ok(Some(json!({ "n": n + 1 })))
            }),
        );

        let reply = a
            .send_request("B", "ping", json!({"n": 1}), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(reply, json!({"n": 2}));
        assert_eq!(a.pending_count(), 0);
        network.stop().await;
    }

    /// A sends to "C", which was never registered
    #[tokio::test]
    async fn test_request_to_unregistered_node_fails() {
        let network = started_network();
        let a = connected(&network, "A");

        let err = a
            .send_request("C", "ping", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(err.is_application());
        assert!(err.to_string().contains("not found"), "{err}");
        network.stop().await;
    }

    /// Cross-subsystem backup request with a handler that refuses it
    #[tokio::test]
    async fn test_handler_failure_reaches_caller() {
        let network = started_network();
        let nexus = connected(&network, "NEXUS");
        let _cronos = connected_with(
            &network,
            "CRONOS",
            handler_fn(|_message: Message| async move {
                Err(HandlerError::failed("backup volume offline"))
            }),
        );

        let err = nexus
            .send_request(
                "CRONOS",
                "cronos.backup.request",
                json!({"scope": "full"}),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            MyceliumError::Application {
                source_node: "CRONOS".to_string(),
                message: "Error processing request in CRONOS: backup volume offline".to_string(),
            }
        );
        network.stop().await;
    }

    // =============================================================================
    // EVENTS
    // =============================================================================

    /// A subscribes to "evt.x", B publishes once
    #[tokio::test]
    async fn test_topic_event_delivered_once() {
        let network = started_network();
        let a = connected(&network, "A");
        let b = connected(&network, "B");

        let recorder = EventRecorder::new();
        let callback: Arc<dyn EventCallback> = recorder.clone();
        assert!(a.subscribe("evt.x", callback).unwrap());

        b.publish_event("evt.x", json!({"v": true})).unwrap();

        assert!(recorder.wait_for(1, Duration::from_secs(1)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.payloads(), vec![json!({"v": true})]);
        network.stop().await;
    }

    /// A broadcast reaches every node's generic handler except the sender
    #[tokio::test]
    async fn test_broadcast_reaches_every_other_node() {
        let network = started_network();
        let atlas = EventRecorder::new();
        let ethik = EventRecorder::new();
        let sender = EventRecorder::new();
        let _atlas = connected_with(&network, "ATLAS", atlas.clone());
        let _ethik = connected_with(&network, "ETHIK", ethik.clone());
        let metadata = connected_with(&network, "METADATA", sender.clone());

        metadata
            .broadcast_event("metadata.schema.changed", json!({"schema": 7}))
            .unwrap();

        assert!(atlas.wait_for(1, Duration::from_secs(1)).await);
        assert!(ethik.wait_for(1, Duration::from_secs(1)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sender.count(), 0);
        network.stop().await;
    }

    /// A direct event reaches only its target
    #[tokio::test]
    async fn test_direct_event_reaches_target_only() {
        let network = started_network();
        let atlas = EventRecorder::new();
        let ethik = EventRecorder::new();
        let _atlas = connected_with(&network, "ATLAS", atlas.clone());
        let _ethik = connected_with(&network, "ETHIK", ethik.clone());
        let nexus = connected(&network, "NEXUS");

        nexus
            .send_event("ATLAS", "atlas.relationship.update", json!({"edge": ["A", "B"]}))
            .unwrap();

        assert!(atlas.wait_for(1, Duration::from_secs(1)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ethik.count(), 0);
        network.stop().await;
    }

    // =============================================================================
    // DEADLINES
    // =============================================================================

    /// B sleeps 1s, A waits 100ms
    #[tokio::test]
    async fn test_slow_handler_times_out_at_caller_deadline() {
        let network = started_network();
        let a = connected(&network, "A");
        let _b = connected_with(
            &network,
            "B",
            Arc::new(SlowEcho {
                delay: Duration::from_secs(1),
            }),
        );

        let started = Instant::now();
        let err = a
            .send_request("B", "slow", json!({}), Duration::from_millis(100))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.is_timeout(), "{err}");
        assert!(elapsed >= Duration::from_millis(90), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
        assert_eq!(a.pending_count(), 0);
        network.stop().await;
    }

    /// Disconnecting the caller aborts its outstanding request
    #[tokio::test]
    async fn test_disconnect_aborts_outstanding_request() {
        let network = started_network();
        let a = Arc::new(connected(&network, "A"));
        let _b = connected_with(
            &network,
            "B",
            Arc::new(SlowEcho {
                delay: Duration::from_secs(5),
            }),
        );

        let caller = Arc::clone(&a);
        let request = tokio::spawn(async move {
            caller
                .send_request("B", "slow", json!({}), Duration::from_secs(10))
                .await
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            while a.pending_count() == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        assert!(a.disconnect());

        let result: Result<Value, MyceliumError> = request.await.unwrap();
        assert!(matches!(result, Err(MyceliumError::ConnectionAborted(_))));
        assert!(!network.contains_node("A"));
        network.stop().await;
    }
}
