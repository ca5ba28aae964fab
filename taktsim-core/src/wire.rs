//! Wire serialization for the node protocol.
//!
//! Frames are `\n`-terminated ASCII lines; event bodies are compact JSON
//! arrays with no embedded newlines. Two field dialects exist on the wire:
//! the core dialect (`time_us`/`type`/`src`/`dst`/...) used on sockets, and
//! the container dialect (`timestamp_us`/`event_type`/`source`/
//! `destination`/`payload`) used toward stdio-attached services. Decoding
//! accepts either; encoding picks the dialect of the channel.

use serde_json::{json, Value};

use crate::event::Event;

pub const READY: &str = "READY";
pub const DONE: &str = "DONE";
pub const SHUTDOWN: &str = "SHUTDOWN";
pub const ERROR_PREFIX: &str = "ERROR ";

/// Encodes an event array in the core dialect.
pub fn encode_events(events: &[Event]) -> String {
    serde_json::to_string(events).expect("event serialization is infallible")
}

/// Encodes an event array in the container dialect.
pub fn encode_events_container(events: &[Event]) -> String {
    let values: Vec<Value> = events
        .iter()
        .map(|event| {
            json!({
                "timestamp_us": event.time_us,
                "event_type": event.kind,
                "source": event.src,
                "destination": event.dst,
                "payload": event.payload,
            })
        })
        .collect();
    serde_json::to_string(&values).expect("event serialization is infallible")
}

/// Decodes an event array in either dialect.
///
/// Normalizes container-side conventions: an empty-string source becomes
/// `fallback_src` (the adapter's node id) and an empty-string destination
/// becomes no destination.
pub fn decode_events(line: &str, fallback_src: &str) -> Result<Vec<Event>, serde_json::Error> {
    let mut events: Vec<Event> = serde_json::from_str(line)?;
    for event in &mut events {
        if event.src.is_empty() {
            event.src = fallback_src.to_string();
        }
        if event.dst.as_deref() == Some("") {
            event.dst = None;
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn core_encoding_round_trips() {
        let events = vec![
            Event::new(1_000, "sample", "s1").with_dst("g"),
            Event::new(2_000, "sample", "s2"),
        ];
        let line = encode_events(&events);
        assert!(!line.contains('\n'));
        let decoded = decode_events(&line, "unused").unwrap();
        assert_eq!(decoded, events);
    }

    #[test]
    fn container_encoding_uses_alias_field_names() {
        let events = vec![Event::new(1_000, "ping", "s1")
            .with_dst("g")
            .with_payload(json!({"n": 1}))];
        let line = encode_events_container(&events);
        assert!(line.contains("\"timestamp_us\":1000"));
        assert!(line.contains("\"event_type\":\"ping\""));
        assert!(line.contains("\"source\":\"s1\""));
        assert!(line.contains("\"destination\":\"g\""));
        assert!(!line.contains("time_us\":"));
    }

    #[test]
    fn container_encoding_decodes_back_to_core_events() {
        let events = vec![Event::new(1_000, "ping", "s1").with_dst("g")];
        let decoded = decode_events(&encode_events_container(&events), "svc").unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].time_us, 1_000);
        assert_eq!(decoded[0].kind, "ping");
        assert_eq!(decoded[0].src, "s1");
        assert_eq!(decoded[0].dst.as_deref(), Some("g"));
    }

    #[test]
    fn empty_source_and_destination_are_normalized() {
        let line = r#"[{"timestamp_us": 5, "event_type": "t", "source": "", "destination": ""}]"#;
        let decoded = decode_events(line, "echo1").unwrap();
        assert_eq!(decoded[0].src, "echo1");
        assert_eq!(decoded[0].dst, None);
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(decode_events("not json", "x").is_err());
    }
}
