//! Stdio-pipe adapter: child processes driven over stdin/stdout.
//!
//! Same protocol grammar as the socket adapter, but in the container field
//! dialect and transported through pipes. Both stdout and stderr are drained
//! by dedicated reader tasks into bounded queues: a child that fills its
//! stderr pipe would otherwise block mid-write and deadlock the whole run.
//! The accumulated stderr tail is attached to every protocol and timeout
//! error so the offending child's last words survive teardown.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taktsim_core::error::SimulationError;
use taktsim_core::event::Event;
use taktsim_core::wire;

use crate::adapter::NodeAdapter;

const QUEUE_DEPTH: usize = 1024;
const STDERR_TAIL_LINES: usize = 200;
const LINE_TIMEOUT: Duration = Duration::from_secs(10);
const ADVANCE_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Drives a child process over stdin/stdout pipes.
pub struct StdioAdapter {
    node_id: String,
    command: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout_rx: Option<mpsc::Receiver<String>>,
    stderr_rx: Option<mpsc::Receiver<String>>,
    stderr_tail: VecDeque<String>,
    reader_tasks: Vec<JoinHandle<()>>,
    last_target_us: Option<u64>,
}

impl StdioAdapter {
    /// `command` is the argv of the child; it must run unbuffered and speak
    /// the stdio protocol on its standard streams.
    pub fn new(node_id: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            node_id: node_id.into(),
            command,
            child: None,
            stdin: None,
            stdout_rx: None,
            stderr_rx: None,
            stderr_tail: VecDeque::new(),
            reader_tasks: Vec::new(),
            last_target_us: None,
        }
    }

    /// Pulls everything the stderr reader has queued into the bounded tail.
    fn drain_stderr(&mut self) {
        if let Some(rx) = self.stderr_rx.as_mut() {
            while let Ok(line) = rx.try_recv() {
                if self.stderr_tail.len() == STDERR_TAIL_LINES {
                    self.stderr_tail.pop_front();
                }
                self.stderr_tail.push_back(line);
            }
        }
    }

    fn stderr_snapshot(&mut self) -> Option<String> {
        self.drain_stderr();
        if self.stderr_tail.is_empty() {
            None
        } else {
            Some(
                self.stderr_tail
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), SimulationError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| SimulationError::Connect {
            node: self.node_id.clone(),
            reason: "child not spawned".into(),
        })?;

        let result = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                let stderr = self.stderr_snapshot();
                Err(SimulationError::Protocol {
                    node: self.node_id.clone(),
                    detail: format!("child stdin closed: {e}"),
                    stderr,
                })
            }
        }
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, SimulationError> {
        let rx = self.stdout_rx.as_mut().ok_or_else(|| SimulationError::Connect {
            node: self.node_id.clone(),
            reason: "child not spawned".into(),
        })?;

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => {
                // Reader task ended: the child closed stdout, almost always
                // because it exited.
                let status = match self.child.as_mut() {
                    Some(child) => child
                        .try_wait()
                        .ok()
                        .flatten()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "still running".into()),
                    None => "unknown".into(),
                };
                let stderr = self.stderr_snapshot();
                Err(SimulationError::Protocol {
                    node: self.node_id.clone(),
                    detail: format!("child closed stdout unexpectedly ({status})"),
                    stderr,
                })
            }
            Err(_) => {
                let stderr = self.stderr_snapshot();
                Err(SimulationError::Timeout {
                    node: self.node_id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                    stderr,
                })
            }
        }
    }

    async fn reap(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!(node = %self.node_id, "child did not exit, terminating");
                if let Some(pid) = child.id() {
                    let _ = nix::sys::signal::kill(
                        nix::unistd::Pid::from_raw(pid as i32),
                        nix::sys::signal::Signal::SIGTERM,
                    );
                }
                if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_err() {
                    warn!(node = %self.node_id, "child ignored SIGTERM, killing");
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }
        }
    }
}

#[async_trait]
impl NodeAdapter for StdioAdapter {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn connect(&mut self) -> Result<(), SimulationError> {
        if self.child.is_some() {
            return Ok(());
        }

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| SimulationError::Connect {
                node: self.node_id.clone(),
                reason: "empty command".into(),
            })?;

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SimulationError::Connect {
                node: self.node_id.clone(),
                reason: format!("failed to spawn {program}: {e}"),
            })?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let (stdout_tx, stdout_rx) = mpsc::channel(QUEUE_DEPTH);
        self.reader_tasks.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stdout_tx.send(line).await.is_err() {
                    break;
                }
            }
        }));

        let (stderr_tx, stderr_rx) = mpsc::channel(QUEUE_DEPTH);
        self.reader_tasks.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tx.send(line).await.is_err() {
                    break;
                }
            }
        }));

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout_rx = Some(stdout_rx);
        self.stderr_rx = Some(stderr_rx);

        info!(node = %self.node_id, "spawned child: {}", self.command.join(" "));
        Ok(())
    }

    async fn send_init(&mut self, config: &Value) -> Result<(), SimulationError> {
        // The stdio dialect carries the node id inside the config body.
        let mut config = config.clone();
        if let Some(map) = config.as_object_mut() {
            map.insert("node_id".into(), Value::String(self.node_id.clone()));
        }
        self.write_line(&format!("INIT {config}")).await?;

        let response = self.read_line(LINE_TIMEOUT).await?;
        if response == wire::READY {
            debug!(node = %self.node_id, "child ready");
            Ok(())
        } else {
            let stderr = self.stderr_snapshot();
            Err(SimulationError::Protocol {
                node: self.node_id.clone(),
                detail: format!("expected {}, got: {response}", wire::READY),
                stderr,
            })
        }
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

        self.write_line(&format!("ADVANCE {target_time_us}")).await?;
        self.write_line(&wire::encode_events_container(inbox)).await
    }

    async fn wait_done(&mut self) -> Result<Vec<Event>, SimulationError> {
        let response = self.read_line(ADVANCE_TIMEOUT).await?;
        if response != wire::DONE {
            let stderr = self.stderr_snapshot();
            return Err(SimulationError::Protocol {
                node: self.node_id.clone(),
                detail: format!("expected {}, got: {response}", wire::DONE),
                stderr,
            });
        }

        let body = self.read_line(LINE_TIMEOUT).await?;
        match wire::decode_events(&body, &self.node_id) {
            Ok(events) => Ok(events),
            Err(e) => {
                let stderr = self.stderr_snapshot();
                Err(SimulationError::Protocol {
                    node: self.node_id.clone(),
                    detail: format!("malformed outbox JSON: {e}"),
                    stderr,
                })
            }
        }
    }

    async fn send_shutdown(&mut self) {
        if self.child.is_none() {
            return;
        }

        if let Err(e) = self.write_line(wire::SHUTDOWN).await {
            debug!(node = %self.node_id, "shutdown write failed: {e}");
        }
        // Closing stdin releases a child blocked on a read.
        self.stdin = None;

        self.reap().await;

        for task in self.reader_tasks.drain(..) {
            task.abort();
        }
        self.stdout_rx = None;
        self.stderr_rx = None;
        debug!(node = %self.node_id, "stdio adapter shut down");
    }
}
