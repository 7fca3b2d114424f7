//! # Hosted Runtime Flows
//!
//! Subsystems attached to a `MyceliumRuntime` talking to the BIOS-Q
//! supervisor node.

#[cfg(test)]
mod tests {
    use super::super::fixtures::EventRecorder;
    use mycelium_network::NetworkStatus;
    use mycelium_runtime::{MyceliumRuntime, RuntimeConfig};
    use mycelium_types::{EventCallback, NodeStatus, HEALTH_REPORT_TOPIC, NETWORK_STATUS_TOPIC};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    async fn started_runtime() -> MyceliumRuntime {
        let runtime = MyceliumRuntime::new(RuntimeConfig::default()).unwrap();
        runtime.start().await.unwrap();
        runtime
    }

    // =============================================================================
    // SUPERVISOR
    // =============================================================================

    #[tokio::test]
    async fn test_status_query_sees_every_subsystem() {
        let runtime = started_runtime().await;
        let subsystems: Vec<_> = ["ETHIK", "ATLAS", "NEXUS", "CRONOS", "METADATA"]
            .into_iter()
            .map(|id| {
                let interface = runtime.interface(id).unwrap();
                assert!(interface.connect("subsystem", "1.0", ["core"]));
                interface
            })
            .collect();
        runtime.network().add_connection("ATLAS", "NEXUS");

        let reply = subsystems[0]
            .send_request("BIOS-Q", NETWORK_STATUS_TOPIC, json!({}), Duration::from_secs(1))
            .await
            .unwrap();
        let status: NetworkStatus = serde_json::from_value(reply).unwrap();

        assert_eq!(status.total_nodes, 6);
        assert_eq!(status.total_connections, 1);
        assert!(status.nodes.contains_key("METADATA"));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_supervisor_rejects_unknown_topic() {
        let runtime = started_runtime().await;
        let nexus = runtime.interface("NEXUS").unwrap();
        nexus.connect("analysis", "1.0", ["analyze"]);

        let err = nexus
            .send_request("BIOS-Q", "request.mycelium.reboot", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(err.is_application());
        assert!(err.to_string().contains("unsupported topic"), "{err}");
        runtime.shutdown().await;
    }

    // =============================================================================
    // HEALTH
    // =============================================================================

    #[tokio::test]
    async fn test_health_reports_fan_out_to_supervisor_and_observers() {
        let runtime = started_runtime().await;
        let observer = runtime.interface("ETHIK").unwrap();
        observer.connect("ethics", "1.0", ["validate"]);
        let recorder = EventRecorder::new();
        let callback: Arc<dyn EventCallback> = recorder.clone();
        observer.subscribe(HEALTH_REPORT_TOPIC, callback).unwrap();

        let cronos = runtime.interface("CRONOS").unwrap();
        cronos.connect("backup", "1.0", ["backup"]);
        cronos.report_health(NodeStatus::Degraded, None).unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !recorder.payloads().iter().any(|p| p["node_id"] == "CRONOS") {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        let report = recorder
            .payloads()
            .into_iter()
            .find(|p| p["node_id"] == "CRONOS")
            .unwrap();
        assert_eq!(report["status"], "degraded");
        assert_eq!(
            runtime.network().node_status("CRONOS").unwrap().status,
            NodeStatus::Degraded
        );
        runtime.shutdown().await;
    }
}
