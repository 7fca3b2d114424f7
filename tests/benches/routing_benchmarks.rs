//! # Mycelium Routing Benchmarks
//!
//! | Path | Target |
//! |------|--------|
//! | Envelope JSON encode/decode | < 10µs |
//! | Request → Response round trip | < 100µs |
//! | Topic event fan-out | < 1ms per 100 subscribers |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mycelium_tests::integration::fixtures::{connected, started_network, EventRecorder};
use mycelium_types::{EventCallback, Message};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Envelope
// ============================================================================

fn bench_envelope_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");
    let message = Message::request(
        "NEXUS",
        "ATLAS",
        "atlas.map.request",
        json!({"region": "core", "depth": 3}),
    );
    let encoded = serde_json::to_string(&message).unwrap();

    group.bench_function("encode", |b| {
        b.iter(|| black_box(serde_json::to_string(&message).unwrap()))
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(serde_json::from_str::<Message>(&encoded).unwrap()))
    });
    group.finish();
}

// ============================================================================
// Routing
// ============================================================================

fn bench_request_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (network, caller, _target) = rt.block_on(async {
        let network = started_network();
        let caller = connected(&network, "NEXUS");
        let target = connected(&network, "ATLAS");
        (network, caller, target)
    });

    let mut group = c.benchmark_group("request");
    group.measurement_time(Duration::from_secs(5));
    group.bench_function("round_trip", |b| {
        b.iter(|| {
            let request =
                caller.send_request("ATLAS", "echo", json!({"n": 1}), Duration::from_secs(1));
            rt.block_on(request).unwrap()
        })
    });
    group.finish();

    rt.block_on(network.stop());
}

fn bench_topic_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("event");

    for subscribers in [10usize, 100] {
        let (network, publisher, recorder, _interfaces) = rt.block_on(async {
            let network = started_network();
            let publisher = connected(&network, "PUBLISHER");
            let recorder = EventRecorder::new();
            let interfaces: Vec<_> = (0..subscribers)
                .map(|i| {
                    let interface = connected(&network, &format!("SUB-{i}"));
                    let callback: Arc<dyn EventCallback> = recorder.clone();
                    interface.subscribe("bench.fan_out", callback).unwrap();
                    interface
                })
                .collect();
            (network, publisher, recorder, interfaces)
        });

        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(BenchmarkId::new("fan_out", subscribers), &subscribers, |b, &n| {
            b.iter(|| {
                let target = recorder.count() + n;
                publisher.publish_event("bench.fan_out", json!({})).unwrap();
                rt.block_on(recorder.wait_for(target, Duration::from_secs(5)))
            })
        });

        rt.block_on(network.stop());
    }
    group.finish();
}

criterion_group!(benches, bench_envelope_codec, bench_request_round_trip, bench_topic_fan_out);
criterion_main!(benches);
