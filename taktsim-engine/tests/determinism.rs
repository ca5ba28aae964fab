//! Determinism and latency-model integration: identical scenarios with the
//! same seed must produce identical delivery sequences and metrics.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use taktsim_config::{NetworkConfig, NetworkLink, NetworkModelKind};
use taktsim_core::error::SimulationError;
use taktsim_core::event::Event;
use taktsim_engine::Coordinator;
use taktsim_network::{LatencyNetworkModel, NetworkMetrics};

/// Emits a burst of events in the first quantum, records every inbox.
struct BurstNode {
    id: String,
    burst: Vec<Event>,
    sent: bool,
    inboxes: Arc<Mutex<Vec<Vec<Event>>>>,
}

impl BurstNode {
    fn new(id: &str, burst: Vec<Event>) -> Self {
        Self {
            id: id.into(),
            burst,
            sent: false,
            inboxes: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl taktsim_adapters::NodeAdapter for BurstNode {
    fn node_id(&self) -> &str {
        &self.id
    }

    async fn connect(&mut self) -> Result<(), SimulationError> {
        Ok(())
    }

    async fn send_init(&mut self, _config: &Value) -> Result<(), SimulationError> {
        Ok(())
    }

    async fn send_advance(
        &mut self,
        _target_time_us: u64,
        inbox: &[Event],
    ) -> Result<(), SimulationError> {
        self.inboxes.lock().unwrap().push(inbox.to_vec());
        Ok(())
    }

    async fn wait_done(&mut self) -> Result<Vec<Event>, SimulationError> {
        if self.sent {
            return Ok(Vec::new());
        }
        self.sent = true;
        Ok(self.burst.clone())
    }

    async fn send_shutdown(&mut self) {}
}

fn lossy_network() -> NetworkConfig {
    NetworkConfig {
        model: NetworkModelKind::Latency,
        default_latency_us: 10_000,
        default_loss_rate: 0.0,
        links: vec![NetworkLink {
            src: "s1".into(),
            dst: "g".into(),
            latency_us: 5_000,
            loss_rate: 0.5,
        }],
    }
}

/// One full run: 100 events from s1 to g at 100us spacing over a lossy
/// 5000us link. Returns what g saw plus the final network metrics.
async fn run_once(seed: u64) -> (Vec<Vec<Event>>, NetworkMetrics) {
    let burst: Vec<Event> = (0..100)
        .map(|i| Event::new(i * 100, "sample", "s1").with_dst("g"))
        .collect();

    let sender = BurstNode::new("s1", burst);
    let receiver = BurstNode::new("g", Vec::new());
    let received = receiver.inboxes.clone();

    let network = LatencyNetworkModel::new(&lossy_network(), seed);
    let mut coordinator = Coordinator::new(1_000, Box::new(network));
    coordinator.add_adapter("s1", Box::new(sender));
    coordinator.add_adapter("g", Box::new(receiver));

    coordinator.connect_all().await.unwrap();
    coordinator.initialize_all(seed).await.unwrap();
    coordinator.run(20_000).await.unwrap();

    assert_eq!(coordinator.current_time_us(), 20_000);
    let inboxes = received.lock().unwrap().clone();
    (inboxes, coordinator.network_metrics())
}

#[tokio::test]
async fn same_seed_gives_byte_identical_deliveries() {
    let (first_inboxes, first_metrics) = run_once(42).await;
    let (second_inboxes, second_metrics) = run_once(42).await;

    let first_bytes = serde_json::to_string(&first_inboxes).unwrap();
    let second_bytes = serde_json::to_string(&second_inboxes).unwrap();
    assert_eq!(first_bytes, second_bytes);
    assert_eq!(first_metrics, second_metrics);
}

#[tokio::test]
async fn different_seed_shifts_the_drop_pattern() {
    let (first_inboxes, _) = run_once(42).await;
    let (other_inboxes, _) = run_once(7).await;
    assert_ne!(
        serde_json::to_string(&first_inboxes).unwrap(),
        serde_json::to_string(&other_inboxes).unwrap()
    );
}

#[tokio::test]
async fn lossy_link_conserves_and_stamps_every_delivery() {
    let (inboxes, metrics) = run_once(42).await;

    assert_eq!(metrics.packets_sent, 100);
    assert_eq!(
        metrics.packets_delivered + metrics.packets_dropped + metrics.packets_in_flight(),
        100
    );
    assert!(metrics.packets_dropped > 0, "seeded loss should drop some");

    let delivered: Vec<&Event> = inboxes.iter().flatten().collect();
    assert_eq!(delivered.len() as u64, metrics.packets_delivered);
    for event in delivered {
        let meta = event.network_metadata.as_ref().expect("delivered copy is stamped");
        assert_eq!(meta.latency_us, 5_000);
        assert_eq!(meta.delivery_time_us, meta.sent_time_us + 5_000);
        assert_eq!(event.time_us, meta.delivery_time_us);
        assert_eq!(meta.loss_rate, 0.5);
    }
}

#[tokio::test]
async fn deliveries_arrive_in_due_time_order() {
    let (inboxes, _) = run_once(42).await;
    let times: Vec<u64> = inboxes.iter().flatten().map(|e| e.time_us).collect();
    let mut sorted = times.clone();
    sorted.sort_unstable();
    assert_eq!(times, sorted);
}
