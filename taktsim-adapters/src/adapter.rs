//! The node adapter contract.

use async_trait::async_trait;
use serde_json::Value;

use taktsim_core::error::SimulationError;
use taktsim_core::event::Event;

/// Coordinator-side handle for one simulated node, regardless of substrate.
///
/// Call order within a run is fixed: `connect`, `send_init`, then repeated
/// `send_advance`/`wait_done` pairs with strictly increasing targets, and
/// finally `send_shutdown`. Every method except `send_shutdown` may fail
/// fatally; `send_shutdown` is best-effort, idempotent, and safe to call
/// from any cleanup path.
#[async_trait]
pub trait NodeAdapter: Send {
    /// Stable node identifier this adapter drives.
    fn node_id(&self) -> &str;

    /// Establishes the channel to the node within a bounded retry budget.
    /// After success the node is reachable but not yet initialized.
    async fn connect(&mut self) -> Result<(), SimulationError>;

    /// Transmits INIT with the given configuration (at minimum `{seed}`) and
    /// blocks until the node acknowledges READY.
    async fn send_init(&mut self, config: &Value) -> Result<(), SimulationError>;

    /// Transmits ADVANCE with the ordered inbox. Does not wait for the node
    /// to finish; the target must be strictly greater than the previous one.
    async fn send_advance(
        &mut self,
        target_time_us: u64,
        inbox: &[Event],
    ) -> Result<(), SimulationError>;

    /// Blocks until the node acknowledges DONE and returns its outbox.
    /// Bounded by the adapter's advance deadline.
    async fn wait_done(&mut self) -> Result<Vec<Event>, SimulationError>;

    /// Terminates the node and reclaims its resources. Never fails.
    async fn send_shutdown(&mut self);
}
