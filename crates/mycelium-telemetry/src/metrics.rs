//! Prometheus metrics for the Mycelium network.
//!
//! All metrics follow the naming convention: `mycelium_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., messages_routed_total)
//! - **Gauge**: Value that can go up or down (e.g., queue_depth)
//! - **Histogram**: Distribution of values (e.g., request_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, Opts, Registry,
    TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // ROUTING METRICS
    // =========================================================================

    /// Messages taken off the queue and routed, by message type
    pub static ref MESSAGES_ROUTED: CounterVec = CounterVec::new(
        Opts::new("mycelium_router_messages_routed_total", "Messages routed by the dispatcher"),
        &["message_type"]  // REQUEST/RESPONSE/EVENT
    ).expect("metric creation failed");

    /// Messages dropped without delivery, by reason
    pub static ref MESSAGES_DROPPED: CounterVec = CounterVec::new(
        Opts::new("mycelium_router_messages_dropped_total", "Messages dropped by the dispatcher"),
        &["reason"]  // invalid_header/unknown_target/no_response_handler
    ).expect("metric creation failed");

    /// Messages waiting in the queue
    pub static ref QUEUE_DEPTH: Gauge = Gauge::new(
        "mycelium_router_queue_depth",
        "Number of messages waiting to be routed"
    ).expect("metric creation failed");

    /// Handler tasks currently running
    pub static ref IN_FLIGHT_TASKS: Gauge = Gauge::new(
        "mycelium_router_in_flight_tasks",
        "Number of REQUEST/EVENT deliveries currently running"
    ).expect("metric creation failed");

    /// Handler and callback failures
    pub static ref HANDLER_ERRORS: CounterVec = CounterVec::new(
        Opts::new("mycelium_handler_errors_total", "Handler and callback failures"),
        &["kind"]  // request/event/panic
    ).expect("metric creation failed");

    // =========================================================================
    // INTERFACE METRICS
    // =========================================================================

    /// Requests that timed out waiting for a RESPONSE
    pub static ref REQUEST_TIMEOUTS: Counter = Counter::new(
        "mycelium_interface_request_timeouts_total",
        "Requests that timed out waiting for a response"
    ).expect("metric creation failed");

    /// RESPONSEs whose waiter was already gone
    pub static ref LATE_RESPONSES: Counter = Counter::new(
        "mycelium_interface_late_responses_total",
        "Responses arriving after their request completed or timed out"
    ).expect("metric creation failed");

    /// Request round-trip duration
    pub static ref REQUEST_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "mycelium_interface_request_duration_seconds",
            "Time from send_request to response"
        ).buckets(exponential_buckets(0.0001, 2.0, 16).expect("bucket creation failed"))
    ).expect("metric creation failed");

    // =========================================================================
    // TOPOLOGY METRICS
    // =========================================================================

    /// Registered nodes
    pub static ref NODES_REGISTERED: Gauge = Gauge::new(
        "mycelium_topology_nodes",
        "Number of registered nodes"
    ).expect("metric creation failed");

    /// Undirected connections
    pub static ref CONNECTIONS: Gauge = Gauge::new(
        "mycelium_topology_connections",
        "Number of undirected node connections"
    ).expect("metric creation failed");
}

/// Handle returned once metrics are registered.
#[derive(Debug, Clone, Copy)]
pub struct MetricsHandle {
    _private: (),
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once: collectors already present are skipped.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Routing
        Box::new(MESSAGES_ROUTED.clone()),
        Box::new(MESSAGES_DROPPED.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(IN_FLIGHT_TASKS.clone()),
        Box::new(HANDLER_ERRORS.clone()),
        // Interface
        Box::new(REQUEST_TIMEOUTS.clone()),
        Box::new(LATE_RESPONSES.clone()),
        Box::new(REQUEST_DURATION.clone()),
        // Topology
        Box::new(NODES_REGISTERED.clone()),
        Box::new(CONNECTIONS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle { _private: () })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::HistogramTimer::new(&$histogram)
    };
}
