//! The network model contract.

use taktsim_core::event::Event;

use crate::metrics::NetworkMetrics;

/// Trait for network simulation models.
///
/// A model is responsible for routing events between nodes and for applying
/// whatever transit effects it simulates (delay, loss). Virtual time is
/// pushed in by the coordinator through [`NetworkModel::advance_to`]; models
/// never consult a clock of their own.
pub trait NetworkModel: Send {
    /// Routes one outgoing event.
    ///
    /// Called exactly once per event a node produced. Returns the events to
    /// deliver immediately at the current clock; a delaying model may instead
    /// buffer the event internally and return it from a later `advance_to`.
    /// An event may also disappear here entirely (packet loss).
    fn route(&mut self, event: Event) -> Vec<Event>;

    /// Advances the model to `target_time_us` and returns every buffered
    /// event whose due time is `<= target_time_us`, in non-decreasing due
    /// time order (ties in insertion order). Idempotent: a second call with
    /// the same target returns nothing.
    fn advance_to(&mut self, target_time_us: u64) -> Vec<Event>;

    /// Clears pending and metric state and restores every deterministic RNG
    /// stream to its origin, so a replay of the same event sequence yields
    /// the same deliveries.
    fn reset(&mut self);

    /// Snapshot of the model's transit counters. Stateless models return an
    /// empty snapshot.
    fn metrics(&self) -> NetworkMetrics;
}
