#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};
use taktsim_config::{NetworkConfig, NetworkLink, NetworkModelKind};
use taktsim_core::event::Event;
use taktsim_network::{LatencyNetworkModel, NetworkModel};

/// Benchmark routing throughput: push a burst of events through a lossy link
/// and drain the in-flight queue.
fn benchmark_routing_throughput(c: &mut Criterion) {
    let num_events: u64 = 100_000;
    let seed = 42;

    let config = NetworkConfig {
        model: NetworkModelKind::Latency,
        default_latency_us: 10_000,
        default_loss_rate: 0.0,
        links: vec![NetworkLink {
            src: "sensor".into(),
            dst: "gateway".into(),
            latency_us: 5_000,
            loss_rate: 0.05,
        }],
    };

    c.bench_function("routing_throughput", |b| {
        b.iter(|| {
            let mut model = LatencyNetworkModel::new(&config, seed);
            for i in 0..num_events {
                let event = Event::new(i, "sample", "sensor").with_dst("gateway");
                model.route(event);
            }
            black_box(model.advance_to(num_events + 5_000));
        })
    });
}

criterion_group!(benches, benchmark_routing_throughput);
criterion_main!(benches);
