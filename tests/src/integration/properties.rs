//! # Network Properties
//!
//! Registry and routing guarantees that every caller relies on.

#[cfg(test)]
mod tests {
    use super::super::fixtures::{
        connected, connected_with, started_network, started_network_with, EventRecorder, SlowEcho,
    };
    use futures::future::join_all;
    use mycelium_network::{MyceliumNetwork, NetworkConfig};
    use mycelium_types::{handler_fn, EventCallback, Message, NodeStatus};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    // =============================================================================
    // REGISTRY
    // =============================================================================

    #[test]
    fn test_reregistration_updates_in_place() {
        let network = MyceliumNetwork::default();
        network.register_node("ATLAS", "mapping", "1.0", ["map"]);
        network.register_node("ATLAS", "mapping", "2.0", ["map", "metadata"]);

        assert_eq!(network.node_count(), 1);
        let snapshot = network.node_status("ATLAS").unwrap();
        assert_eq!(snapshot.version, "2.0");
        assert_eq!(snapshot.capabilities, vec!["map", "metadata"]);
    }

    #[test]
    fn test_connections_are_symmetric_and_removed_with_node() {
        let network = MyceliumNetwork::default();
        network.register_node("A", "test", "1.0", ["x"]);
        network.register_node("B", "test", "1.0", ["x"]);
        network.register_node("C", "test", "1.0", ["x"]);

        assert!(network.add_connection("A", "B"));
        assert!(network.add_connection("C", "B"));
        assert_eq!(network.neighbors("A"), vec!["B"]);
        assert_eq!(network.neighbors("B"), vec!["A", "C"]);

        assert!(network.remove_node("A"));
        assert_eq!(network.neighbors("B"), vec!["C"]);
        assert_eq!(network.get_network_status().total_connections, 1);
    }

    // =============================================================================
    // REQUEST ROUTING
    // =============================================================================

    #[tokio::test]
    async fn test_unknown_target_fails_fast() {
        let network = started_network();
        let a = connected(&network, "A");

        let started = Instant::now();
        let err = a
            .send_request("GHOST", "ping", json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(err.to_string().contains("not found"), "{err}");
        network.stop().await;
    }

    #[tokio::test]
    async fn test_handler_payload_returned_verbatim() {
        let network = started_network();
        let a = connected(&network, "A");
        let payload = json!({"nested": {"list": [1, 2, 3]}, "flag": null, "status": "OK"});
        let reply = payload.clone();
        let _b = connected_with(
            &network,
            "B",
            handler_fn(move |_message: Message| {
                let reply = reply.clone();
                async move { Ok(Some(reply)) }
            }),
        );

        let received = a
            .send_request("B", "fetch", json!({}), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(received, payload);
        network.stop().await;
    }

    #[tokio::test]
    async fn test_timeout_leaves_no_waiter() {
        let network = started_network();
        let a = connected(&network, "A");
        let _silent = connected_with(&network, "SILENT", EventRecorder::new());

        let started = Instant::now();
        let err = a
            .send_request("SILENT", "ping", json!({}), Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(90));
        assert_eq!(a.pending_count(), 0);
        assert_eq!(a.stats().timeouts, 1);
        network.stop().await;
    }

    #[tokio::test]
    async fn test_late_response_is_counted_not_delivered() {
        let network = started_network();
        let a = connected(&network, "A");
        let _b = connected_with(
            &network,
            "B",
            Arc::new(SlowEcho {
                delay: Duration::from_millis(150),
            }),
        );

        let err = a
            .send_request("B", "slow", json!({}), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        tokio::time::timeout(Duration::from_secs(2), async {
            while a.stats().late == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(a.pending_count(), 0);
        network.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_beyond_pool_size_complete() {
        let network = started_network_with(NetworkConfig::default().with_max_in_flight(2));
        let a = connected(&network, "A");
        let _b = connected_with(
            &network,
            "B",
            Arc::new(SlowEcho {
                delay: Duration::from_millis(20),
            }),
        );

        let requests = (0..16).map(|i| {
            a.send_request("B", "echo", json!({"i": i}), Duration::from_secs(5))
        });
        let replies = join_all(requests).await;

        for (i, reply) in replies.into_iter().enumerate() {
            assert_eq!(reply.unwrap(), json!({"i": i}));
        }
        assert!(network.in_flight() <= 2);
        network.stop().await;
    }

    // =============================================================================
    // EVENT AUDIENCE
    // =============================================================================

    #[tokio::test]
    async fn test_topic_event_reaches_subscribers_only() {
        let network = started_network();
        let bystander = EventRecorder::new();
        let a = connected(&network, "A");
        let b = connected(&network, "B");
        let _c = connected_with(&network, "C", bystander.clone());

        let at_a = EventRecorder::new();
        let at_b = EventRecorder::new();
        let callback_a: Arc<dyn EventCallback> = at_a.clone();
        let callback_b: Arc<dyn EventCallback> = at_b.clone();
        a.subscribe("atlas.metadata.update", callback_a).unwrap();
        b.subscribe("atlas.metadata.update", callback_b).unwrap();

        a.publish_event("atlas.metadata.update", json!({"id": 9})).unwrap();

        assert!(at_b.wait_for(1, Duration::from_secs(1)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(at_b.count(), 1);
        assert_eq!(at_a.count(), 0);
        assert_eq!(bystander.count(), 0);
        network.stop().await;
    }

    #[tokio::test]
    async fn test_removed_subscriber_not_invoked() {
        let network = started_network();
        let a = connected(&network, "A");
        let b = connected(&network, "B");

        let recorder = EventRecorder::new();
        let callback: Arc<dyn EventCallback> = recorder.clone();
        a.subscribe("cronos.alert", callback).unwrap();
        assert!(network.remove_node("A"));

        assert!(b.publish_event("cronos.alert", json!({"level": "high"})).is_ok());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(recorder.count(), 0);
        assert!(network.get_network_status().subscriptions.is_empty());
        network.stop().await;
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let network = started_network();
        let a = connected(&network, "A");
        let b = connected(&network, "B");
        let c = connected(&network, "C");

        let failing: Arc<dyn EventCallback> = Arc::new(|_message: Message| async move {
            Err(mycelium_types::HandlerError::failed("subscriber crashed"))
        });
        a.subscribe("evt.fail", failing).unwrap();

        let recorder = EventRecorder::new();
        let callback: Arc<dyn EventCallback> = recorder.clone();
        b.subscribe("evt.fail", callback).unwrap();

        c.publish_event("evt.fail", json!({})).unwrap();
        assert!(recorder.wait_for(1, Duration::from_secs(1)).await);

        tokio::time::timeout(Duration::from_secs(1), async {
            while network.get_network_status().routing.handler_errors == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        network.stop().await;
    }

    // =============================================================================
    // HEALTH
    // =============================================================================

    #[tokio::test]
    async fn test_health_report_updates_status() {
        let network = started_network();
        let a = connected(&network, "A");

        let mut details = serde_json::Map::new();
        details.insert("disk".to_string(), json!("92%"));
        a.report_health(NodeStatus::Degraded, Some(details)).unwrap();

        let snapshot = network.node_status("A").unwrap();
        assert_eq!(snapshot.status, NodeStatus::Degraded);
        assert_eq!(snapshot.health_details["disk"], "92%");
        network.stop().await;
    }
}
