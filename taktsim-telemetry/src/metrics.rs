//! Prometheus counters for coordination progress.
//!
//! These track how the run itself behaves (quanta committed, events routed
//! and dropped at delivery); per-link network statistics live in the network
//! model's own `NetworkMetrics` snapshot, not here.

use prometheus::{Counter, Histogram, HistogramOpts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: prometheus::Registry,
    /// Quanta committed by the coordinator.
    pub quanta_total: prometheus::Counter,
    /// Events handed to the network model.
    pub events_routed: prometheus::Counter,
    /// Events discarded at delivery for missing or unknown destinations.
    pub events_unroutable: prometheus::Counter,
    /// Wall-clock duration of a full quantum (fan-out through delivery).
    pub quantum_wall_seconds: prometheus::Histogram,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let registry = Registry::new();
        let quanta_total =
            Counter::new("taktsim_quanta_total", "Quanta committed by the coordinator").unwrap();
        let events_routed =
            Counter::new("taktsim_events_routed_total", "Events offered to the network").unwrap();
        let events_unroutable = Counter::new(
            "taktsim_events_unroutable_total",
            "Events dropped at delivery (missing or unknown destination)",
        )
        .unwrap();

        let quantum_wall_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "taktsim_quantum_wall_seconds",
                "Wall-clock time per coordination quantum",
            )
            .buckets(vec![0.0001, 0.001, 0.01, 0.1, 1.0]),
        )
        .unwrap();

        registry.register(Box::new(quanta_total.clone())).unwrap();
        registry.register(Box::new(events_routed.clone())).unwrap();
        registry
            .register(Box::new(events_unroutable.clone()))
            .unwrap();
        registry
            .register(Box::new(quantum_wall_seconds.clone()))
            .unwrap();

        Self {
            registry,
            quanta_total,
            events_routed,
            events_unroutable,
            quantum_wall_seconds,
        }
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap())
    }
}
