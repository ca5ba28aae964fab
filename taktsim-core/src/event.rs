//! Simulation event types.
//!
//! An [`Event`] is the only value that crosses a node boundary. It is created
//! by an adapter while collecting a node's outbox, handed once to the network
//! model, and finally deposited into a destination inbox by the coordinator.
//! The network model never mutates an event in place; a delayed delivery is a
//! *new* event with an updated `time_us` and populated [`NetworkMetadata`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transit information the network model stamps onto the delivered copy of an
/// event. Absent until the event has actually passed through a latency model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkMetadata {
    /// Link latency applied to this delivery, in microseconds.
    pub latency_us: u64,
    /// Virtual time at which the source node emitted the event.
    pub sent_time_us: u64,
    /// Virtual time at which the event reached its destination inbox.
    pub delivery_time_us: u64,
    /// Loss rate of the link the event traversed.
    pub loss_rate: f64,
}

/// A simulation event.
///
/// Field names follow the core wire dialect
/// (`time_us`/`type`/`src`/`dst`/`payload`/`size_bytes`/`network_metadata`).
/// Deserialization also accepts the container dialect
/// (`timestamp_us`/`event_type`/`source`/`destination`) via serde aliases, so
/// a single parse path covers both; serialization always emits core names.
/// Unknown extra fields are ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Virtual timestamp in microseconds. Never negative, never wall-clock.
    #[serde(alias = "timestamp_us")]
    pub time_us: u64,

    /// Event type. Opaque to the harness; only node code interprets it.
    #[serde(rename = "type", alias = "event_type")]
    pub kind: String,

    /// Identifier of the emitting node.
    #[serde(alias = "source")]
    pub src: String,

    /// Identifier of the destination node. `None` means the event is offered
    /// to the network but will be dropped at the delivery step.
    #[serde(default, alias = "destination")]
    pub dst: Option<String>,

    /// Opaque payload; carried through the core without introspection.
    #[serde(default)]
    pub payload: Option<Value>,

    /// Informational payload size.
    #[serde(default)]
    pub size_bytes: u64,

    /// Set by the network model on delivered copies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_metadata: Option<NetworkMetadata>,
}

impl Event {
    /// Creates an event with no destination and no payload.
    pub fn new(time_us: u64, kind: impl Into<String>, src: impl Into<String>) -> Self {
        Self {
            time_us,
            kind: kind.into(),
            src: src.into(),
            dst: None,
            payload: None,
            size_bytes: 0,
            network_metadata: None,
        }
    }

    /// Sets the destination node.
    pub fn with_dst(mut self, dst: impl Into<String>) -> Self {
        self.dst = Some(dst.into());
        self
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the informational size.
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }
}
