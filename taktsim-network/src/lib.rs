//! # taktsim-network
//!
//! Network models for cross-node event delivery.
//!
//! The network model is the single arbiter of what happens to an event
//! between the node that produced it and the inbox it lands in. Two
//! implementations share the [`NetworkModel`] contract:
//!
//! - [`DirectNetworkModel`]: zero-latency, lossless, stateless. The baseline
//!   used when a scenario has no `network` section.
//! - [`LatencyNetworkModel`]: per-link delay and deterministic loss, with an
//!   in-flight queue ordered by delivery time.
//!
//! Model operations never suspend and never fail; a malformed event is still
//! routed (and counted) — the coordinator drops it at the delivery step.

mod direct;
mod latency;
mod metrics;
mod model;

pub use direct::DirectNetworkModel;
pub use latency::LatencyNetworkModel;
pub use metrics::NetworkMetrics;
pub use model::NetworkModel;
