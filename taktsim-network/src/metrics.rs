//! Network-wide transit counters.

/// Packet-level statistics for the whole network.
///
/// Conservation invariant: `packets_sent` always equals
/// `packets_delivered + packets_dropped + packets_in_flight()`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkMetrics {
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_dropped: u64,
    /// Sum of delivered latencies, for average calculation.
    pub total_latency_us: u64,
    pub min_latency_us: Option<u64>,
    pub max_latency_us: Option<u64>,
}

impl NetworkMetrics {
    /// Packets routed but not yet delivered or dropped.
    pub fn packets_in_flight(&self) -> u64 {
        self.packets_sent - self.packets_delivered - self.packets_dropped
    }

    /// Average latency across delivered packets, or `None` before the first
    /// delivery.
    pub fn average_latency_us(&self) -> Option<f64> {
        if self.packets_delivered == 0 {
            return None;
        }
        Some(self.total_latency_us as f64 / self.packets_delivered as f64)
    }

    pub(crate) fn record_sent(&mut self) {
        self.packets_sent += 1;
    }

    pub(crate) fn record_delivered(&mut self, latency_us: u64) {
        self.packets_delivered += 1;
        self.total_latency_us += latency_us;

        self.min_latency_us = Some(match self.min_latency_us {
            Some(min) => min.min(latency_us),
            None => latency_us,
        });
        self.max_latency_us = Some(match self.max_latency_us {
            Some(max) => max.max(latency_us),
            None => latency_us,
        });
    }

    pub(crate) fn record_dropped(&mut self) {
        self.packets_dropped += 1;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
