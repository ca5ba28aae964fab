//! Echo service: replies to every incoming event with an `echo_`-prefixed
//! copy addressed back to the sender. Used by integration tests and as the
//! smallest possible example of a stdio-attached node.

use serde_json::{json, Value};
use taktsim_core::event::Event;
use taktsim_node::{Service, ServiceAdapter};
use tracing::info;

struct EchoService;

impl Service for EchoService {
    fn init(&mut self, config: &Value) {
        info!("echo service initialized with config: {config}");
    }

    fn advance(&mut self, _current: u64, target_time_us: u64, inbox: Vec<Event>) -> Vec<Event> {
        inbox
            .into_iter()
            .map(|event| {
                let mut reply = Event::new(target_time_us, format!("echo_{}", event.kind), "")
                    .with_payload(json!({"original": event.payload}));
                reply.dst = Some(event.src);
                reply
            })
            .collect()
    }
}

fn main() -> std::io::Result<()> {
    // Protocol owns stdout; logs go to stderr.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let mut adapter = ServiceAdapter::new(EchoService);
    adapter.run()
}
