//! In-process adapter: nodes that execute inside the coordinator's process.
//!
//! The wrapped node only has to know how to start, accept injected events,
//! advance to a target time, and stop. The adapter translates that surface
//! into the common [`NodeAdapter`] contract and normalizes produced events
//! into coordinator shape.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use taktsim_core::error::SimulationError;
use taktsim_core::event::Event;

use crate::adapter::NodeAdapter;

/// A node driven directly by the coordinator, without a wire protocol.
///
/// `advance` is synchronous from the run's point of view: it returns only
/// when the node has fully reached the target time, carrying every event the
/// node produced on the way there.
#[async_trait]
pub trait InProcessNode: Send {
    async fn start(&mut self) -> Result<(), SimulationError>;

    /// Hands incoming events to the node before time is run. Emulator-backed
    /// nodes turn these into UART input for the firmware.
    async fn inject(&mut self, inbox: &[Event]) -> Result<(), SimulationError>;

    async fn advance(&mut self, target_time_us: u64) -> Result<Vec<Event>, SimulationError>;

    async fn stop(&mut self);
}

/// Adapter wrapping an [`InProcessNode`].
pub struct InProcessAdapter {
    node_id: String,
    node: Box<dyn InProcessNode>,
    pending_target_us: u64,
    last_target_us: Option<u64>,
}

impl InProcessAdapter {
    pub fn new(node_id: impl Into<String>, node: Box<dyn InProcessNode>) -> Self {
        Self {
            node_id: node_id.into(),
            node,
            pending_target_us: 0,
            last_target_us: None,
        }
    }
}

#[async_trait]
impl NodeAdapter for InProcessAdapter {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn connect(&mut self) -> Result<(), SimulationError> {
        info!(node = %self.node_id, "starting in-process node");
        self.node.start().await
    }

    async fn send_init(&mut self, _config: &Value) -> Result<(), SimulationError> {
        // In-process nodes are fully configured at construction.
        debug!(node = %self.node_id, "in-process node initialized");
        Ok(())
    }

    async fn send_advance(
        &mut self,
        target_time_us: u64,
        inbox: &[Event],
    ) -> Result<(), SimulationError> {
        if let Some(last) = self.last_target_us {
            if target_time_us <= last {
                return Err(SimulationError::BackwardsTime {
                    node: self.node_id.clone(),
                    current_us: last,
                    target_us: target_time_us,
                });
            }
        }
        self.last_target_us = Some(target_time_us);
        self.pending_target_us = target_time_us;

        if !inbox.is_empty() {
            self.node.inject(inbox).await?;
        }
        Ok(())
    }

    async fn wait_done(&mut self) -> Result<Vec<Event>, SimulationError> {
        let produced = self.node.advance(self.pending_target_us).await?;

        // Normalize to coordinator shape: the source is this node; the
        // destination is left to the network model to decide.
        Ok(produced
            .into_iter()
            .map(|mut event| {
                event.src = self.node_id.clone();
                event.dst = None;
                event
            })
            .collect())
    }

    async fn send_shutdown(&mut self) {
        debug!(node = %self.node_id, "stopping in-process node");
        self.node.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Node emitting one sample event per simulated second, in the shape an
    /// emulated firmware would produce.
    struct PeriodicSampler {
        current_time_us: u64,
        injected: Vec<Event>,
        started: bool,
        stopped: bool,
    }

    impl PeriodicSampler {
        fn new() -> Self {
            Self {
                current_time_us: 0,
                injected: Vec::new(),
                started: false,
                stopped: false,
            }
        }
    }

    #[async_trait]
    impl InProcessNode for PeriodicSampler {
        async fn start(&mut self) -> Result<(), SimulationError> {
            self.started = true;
            Ok(())
        }

        async fn inject(&mut self, inbox: &[Event]) -> Result<(), SimulationError> {
            self.injected.extend_from_slice(inbox);
            Ok(())
        }

        async fn advance(&mut self, target_time_us: u64) -> Result<Vec<Event>, SimulationError> {
            let mut events = Vec::new();
            let mut next = (self.current_time_us / 1_000_000 + 1) * 1_000_000;
            while next <= target_time_us {
                events.push(
                    Event::new(next, "SAMPLE", "firmware")
                        .with_dst("should-be-cleared")
                        .with_payload(json!({"value": 25.3})),
                );
                next += 1_000_000;
            }
            self.current_time_us = target_time_us;
            Ok(events)
        }

        async fn stop(&mut self) {
            self.stopped = true;
        }
    }

    #[tokio::test]
    async fn produces_one_sample_per_simulated_second() {
        let mut adapter = InProcessAdapter::new("dev1", Box::new(PeriodicSampler::new()));
        adapter.connect().await.unwrap();
        adapter.send_init(&json!({"seed": 42})).await.unwrap();

        let mut all = Vec::new();
        for target in (1..=6).map(|i| i * 500_000) {
            adapter.send_advance(target, &[]).await.unwrap();
            all.extend(adapter.wait_done().await.unwrap());
        }

        let times: Vec<u64> = all.iter().map(|e| e.time_us).collect();
        assert_eq!(times, vec![1_000_000, 2_000_000, 3_000_000]);
        for event in &all {
            assert_eq!(event.src, "dev1");
            assert_eq!(event.dst, None);
            assert_eq!(event.payload.as_ref().unwrap()["value"], 25.3);
        }
    }

    #[tokio::test]
    async fn inbox_is_injected_before_advancing() {
        let mut adapter = InProcessAdapter::new("dev1", Box::new(PeriodicSampler::new()));
        adapter.connect().await.unwrap();

        let inbox = vec![Event::new(0, "actuate", "gateway").with_dst("dev1")];
        adapter.send_advance(1_000, &inbox).await.unwrap();
        adapter.wait_done().await.unwrap();
        adapter.send_shutdown().await;
    }

    #[tokio::test]
    async fn backwards_target_fails_fast() {
        let mut adapter = InProcessAdapter::new("dev1", Box::new(PeriodicSampler::new()));
        adapter.connect().await.unwrap();
        adapter.send_advance(5_000, &[]).await.unwrap();
        adapter.wait_done().await.unwrap();

        let err = adapter.send_advance(4_000, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            SimulationError::BackwardsTime {
                current_us: 5_000,
                target_us: 4_000,
                ..
            }
        ));
    }
}
