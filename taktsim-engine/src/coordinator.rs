//! Conservative synchronous lockstep coordinator.
//!
//! Single logical task, fixed quantum. Per quantum: fan out ADVANCE to every
//! node in registration order, join their DONE outboxes, thread every output
//! through the network model, deposit deliveries into destination inboxes,
//! then commit the clock. No node is ever ahead of the coordinator's clock,
//! and nothing here consults wall-clock time except for progress reporting.
//!
//! Determinism rests on two ordering rules: nodes are always visited in
//! registration order, and the network model delivers in due-time order with
//! insertion-order tie-breaks. Together they impose a total order on every
//! cross-node event.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::json;
use tracing::{debug, error, info, instrument};

use taktsim_adapters::{InProcessAdapter, InProcessNode, NodeAdapter, SocketAdapter};
use taktsim_core::error::SimulationError;
use taktsim_core::event::Event;
use taktsim_core::time::RunClock;
use taktsim_network::{DirectNetworkModel, NetworkMetrics, NetworkModel};
use taktsim_telemetry::MetricsRecorder;

struct RegisteredNode {
    id: String,
    adapter: Box<dyn NodeAdapter>,
}

/// The run coordinator. Exclusively owns the clock and the inbox map.
pub struct Coordinator {
    time_quantum_us: u64,
    clock: RunClock,
    nodes: Vec<RegisteredNode>,
    inboxes: HashMap<String, Vec<Event>>,
    network: Box<dyn NetworkModel>,
    recorder: MetricsRecorder,
    step_count: u64,
}

impl Coordinator {
    pub fn new(time_quantum_us: u64, network: Box<dyn NetworkModel>) -> Self {
        Self {
            time_quantum_us,
            clock: RunClock::new(0),
            nodes: Vec::new(),
            inboxes: HashMap::new(),
            network,
            recorder: MetricsRecorder::new(),
            step_count: 0,
        }
    }

    /// Coordinator with the default zero-latency network.
    pub fn with_direct_network(time_quantum_us: u64) -> Self {
        Self::new(time_quantum_us, Box::new(DirectNetworkModel))
    }

    /// Registers a socket-attached node.
    pub fn add_socket_node(&mut self, node_id: &str, host: &str, port: u16) {
        self.add_adapter(node_id, Box::new(SocketAdapter::new(node_id, host, port)));
    }

    /// Registers a node executing inside this process.
    pub fn add_inprocess_node(&mut self, node_id: &str, node: Box<dyn InProcessNode>) {
        self.add_adapter(node_id, Box::new(InProcessAdapter::new(node_id, node)));
    }

    /// Registers any adapter (stdio or custom). Creates the node's inbox.
    pub fn add_adapter(&mut self, node_id: &str, adapter: Box<dyn NodeAdapter>) {
        self.nodes.push(RegisteredNode {
            id: node_id.to_string(),
            adapter,
        });
        self.inboxes.insert(node_id.to_string(), Vec::new());
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn current_time_us(&self) -> u64 {
        self.clock.now_us()
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Shared handle on the run clock, for observers.
    pub fn clock(&self) -> RunClock {
        self.clock.clone()
    }

    pub fn network_metrics(&self) -> NetworkMetrics {
        self.network.metrics()
    }

    pub fn metrics_recorder(&self) -> &MetricsRecorder {
        &self.recorder
    }

    /// Connects every registered node, in registration order.
    pub async fn connect_all(&mut self) -> Result<(), SimulationError> {
        info!("connecting to {} node(s)", self.nodes.len());
        for node in &mut self.nodes {
            node.adapter.connect().await?;
        }
        Ok(())
    }

    /// Sends INIT with the run seed to every node and waits for each READY.
    pub async fn initialize_all(&mut self, seed: u64) -> Result<(), SimulationError> {
        info!("initializing all nodes with seed={seed}");
        let config = json!({ "seed": seed });
        for node in &mut self.nodes {
            node.adapter.send_init(&config).await?;
            debug!(node = %node.id, "initialized and ready");
        }
        Ok(())
    }

    /// Runs the lockstep loop until the clock reaches `duration_us` exactly.
    ///
    /// On any adapter failure the coordinator attempts `send_shutdown` on all
    /// adapters, discards partial-quantum inbox state, and propagates the
    /// error. Committed clock advances are never rolled back.
    #[instrument(skip(self))]
    pub async fn run(&mut self, duration_us: u64) -> Result<(), SimulationError> {
        info!(
            "starting simulation: {:.1}s virtual time, {}us quantum",
            duration_us as f64 / 1e6,
            self.time_quantum_us
        );
        let start_wall = Instant::now();

        while self.clock.now_us() < duration_us {
            let target = (self.clock.now_us() + self.time_quantum_us).min(duration_us);

            if let Err(e) = self.step(target).await {
                error!("quantum failed at target {target}us: {e}");
                for inbox in self.inboxes.values_mut() {
                    inbox.clear();
                }
                self.shutdown_all().await;
                return Err(e);
            }

            if self.step_count % 1000 == 0 {
                let elapsed = start_wall.elapsed().as_secs_f64();
                info!(
                    "step {}: t={:.2}s ({:.1}%), wall time: {elapsed:.2}s",
                    self.step_count,
                    self.clock.now_us() as f64 / 1e6,
                    (self.clock.now_us() as f64 / duration_us as f64) * 100.0
                );
            }
        }

        self.shutdown_all().await;

        let elapsed = start_wall.elapsed().as_secs_f64();
        let virtual_sec = duration_us as f64 / 1e6;
        info!(
            "simulation finished: virtual {virtual_sec:.1}s, wall {elapsed:.2}s, {} steps, speedup {:.1}x",
            self.step_count,
            if elapsed > 0.0 { virtual_sec / elapsed } else { f64::INFINITY }
        );
        Ok(())
    }

    async fn step(&mut self, target_time_us: u64) -> Result<(), SimulationError> {
        let timer = self.recorder.quantum_wall_seconds.start_timer();

        // Phase 1: fan out ADVANCE with each node's pending inbox.
        for node in &mut self.nodes {
            let inbox = self
                .inboxes
                .get_mut(&node.id)
                .map(std::mem::take)
                .unwrap_or_default();
            node.adapter.send_advance(target_time_us, &inbox).await?;
        }

        // Phase 2: join all DONE responses, merging outboxes in
        // registration order.
        let mut outputs = Vec::new();
        for node in &mut self.nodes {
            outputs.extend(node.adapter.wait_done().await?);
        }

        // Phase 3: thread outputs through the network; deliver what is due.
        for event in outputs {
            self.recorder.events_routed.inc();
            for delivered in self.network.route(event) {
                self.deliver(delivered);
            }
        }
        for delivered in self.network.advance_to(target_time_us) {
            self.deliver(delivered);
        }

        // Phase 4: commit the clock.
        self.clock.advance_to(target_time_us);
        self.step_count += 1;
        self.recorder.quanta_total.inc();
        timer.observe_duration();
        Ok(())
    }

    /// Deposits one delivered event, or drops it when the destination is
    /// missing or unknown. The drop is deliberate and non-fatal: the network
    /// model already counted the event as sent.
    fn deliver(&mut self, event: Event) {
        match event.dst.as_ref().and_then(|dst| self.inboxes.get_mut(dst)) {
            Some(inbox) => inbox.push(event),
            None => {
                debug!(
                    src = %event.src,
                    dst = ?event.dst,
                    kind = %event.kind,
                    "dropping event with no routable destination"
                );
                self.recorder.events_unroutable.inc();
            }
        }
    }

    /// Best-effort shutdown of every adapter, in registration order. Safe to
    /// call repeatedly and from error paths.
    pub async fn shutdown_all(&mut self) {
        for node in &mut self.nodes {
            node.adapter.send_shutdown().await;
        }
    }
}
