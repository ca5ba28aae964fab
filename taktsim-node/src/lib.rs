//! # taktsim-node
//!
//! Node-side protocol adapter for stdio-attached services.
//!
//! A service run inside a container (or any child process) links this crate,
//! implements [`Service`], and hands it to [`ServiceAdapter::run`]. The
//! adapter owns all protocol plumbing — INIT/ADVANCE/SHUTDOWN parsing on
//! stdin, READY/DONE framing on stdout — so service code only sees virtual
//! time and event batches. Anything a service wants to log goes to stderr;
//! stdout belongs to the protocol.
//!
//! The service callback runs entirely in virtual time: it is handed the
//! current and target instants and must never sleep.

use std::io::{BufRead, Write};

use serde_json::Value;
use tracing::{debug, error, info};

use taktsim_core::event::Event;
use taktsim_core::wire;

/// Behavior of one stdio-attached node.
pub trait Service {
    /// Called once after INIT with the full configuration body.
    fn init(&mut self, _config: &Value) {}

    /// Advances the service from `current_time_us` to `target_time_us`,
    /// consuming the inbox and returning the outbox.
    fn advance(
        &mut self,
        current_time_us: u64,
        target_time_us: u64,
        inbox: Vec<Event>,
    ) -> Vec<Event>;
}

/// Protocol loop wrapping a [`Service`].
pub struct ServiceAdapter<S: Service> {
    service: S,
    node_id: String,
    current_time_us: u64,
}

impl<S: Service> ServiceAdapter<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            node_id: "node".into(),
            current_time_us: 0,
        }
    }

    /// Runs the protocol loop over stdin/stdout until SHUTDOWN or EOF.
    pub fn run(&mut self) -> std::io::Result<()> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        self.run_with(stdin.lock(), stdout.lock())
    }

    /// Runs the protocol loop over arbitrary streams. Split out from
    /// [`ServiceAdapter::run`] so tests can drive the loop in memory.
    pub fn run_with<R: BufRead, W: Write>(
        &mut self,
        mut reader: R,
        mut writer: W,
    ) -> std::io::Result<()> {
        info!("protocol loop started");

        loop {
            let Some(line) = read_trimmed_line(&mut reader)? else {
                info!("EOF on stdin, shutting down");
                break;
            };
            if line.is_empty() {
                continue;
            }

            let (command, rest) = match line.split_once(' ') {
                Some((command, rest)) => (command, rest),
                None => (line.as_str(), ""),
            };

            match command {
                "INIT" => {
                    let config: Value =
                        serde_json::from_str(rest.trim()).unwrap_or_else(|_| Value::Object(Default::default()));
                    if let Some(id) = config.get("node_id").and_then(Value::as_str) {
                        self.node_id = id.to_string();
                    }
                    self.current_time_us = 0;
                    self.service.init(&config);
                    write_line(&mut writer, wire::READY)?;
                    info!(node = %self.node_id, "initialized, sent READY");
                }
                "ADVANCE" => {
                    // Events arrive on the rest of the line or, in the usual
                    // two-frame form, on the following line.
                    let (target, inline_events) = match rest.trim().split_once(' ') {
                        Some((target, events)) => (target, Some(events.to_string())),
                        None => (rest.trim(), None),
                    };
                    let Ok(target_time_us) = target.parse::<u64>() else {
                        write_line(&mut writer, &format!("{}invalid ADVANCE target: {target}", wire::ERROR_PREFIX))?;
                        return Ok(());
                    };

                    let events_body = match inline_events {
                        Some(body) => body,
                        None => read_trimmed_line(&mut reader)?.unwrap_or_else(|| "[]".into()),
                    };

                    let inbox = match wire::decode_events(&events_body, &self.node_id) {
                        Ok(events) => events,
                        Err(e) => {
                            error!("failed to parse inbox JSON: {e}");
                            Vec::new()
                        }
                    };

                    debug!(
                        node = %self.node_id,
                        "advancing {} -> {}us with {} events",
                        self.current_time_us,
                        target_time_us,
                        inbox.len()
                    );
                    let mut outbox =
                        self.service
                            .advance(self.current_time_us, target_time_us, inbox);
                    for event in &mut outbox {
                        if event.src.is_empty() {
                            event.src = self.node_id.clone();
                        }
                    }
                    self.current_time_us = target_time_us;

                    write_line(&mut writer, wire::DONE)?;
                    write_line(&mut writer, &wire::encode_events_container(&outbox))?;
                }
                "SHUTDOWN" => {
                    info!(node = %self.node_id, "received SHUTDOWN");
                    break;
                }
                unknown => {
                    error!("unknown command: {unknown}");
                    write_line(
                        &mut writer,
                        &format!("{}unknown command: {unknown}", wire::ERROR_PREFIX),
                    )?;
                    break;
                }
            }
        }

        Ok(())
    }
}

fn read_trimmed_line<R: BufRead>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end().to_string()))
}

fn write_line<W: Write>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}
