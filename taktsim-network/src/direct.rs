//! Zero-latency direct routing.

use taktsim_core::event::Event;

use crate::metrics::NetworkMetrics;
use crate::model::NetworkModel;

/// The simplest possible network model: every event is delivered immediately,
/// nothing is lost, nothing is buffered. Stateless, so it also opts out of
/// metrics tracking and always reports an empty snapshot.
///
/// Serves as the baseline for comparing delaying models and as the default
/// when a scenario has no network section.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectNetworkModel;

impl NetworkModel for DirectNetworkModel {
    fn route(&mut self, event: Event) -> Vec<Event> {
        vec![event]
    }

    fn advance_to(&mut self, _target_time_us: u64) -> Vec<Event> {
        Vec::new()
    }

    fn reset(&mut self) {}

    fn metrics(&self) -> NetworkMetrics {
        NetworkMetrics::default()
    }
}
