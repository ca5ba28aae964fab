//! Socket adapter: TCP transport for externally launched nodes.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use taktsim_core::error::SimulationError;
use taktsim_core::event::Event;
use taktsim_core::wire;

use crate::adapter::NodeAdapter;

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);
const LINE_TIMEOUT: Duration = Duration::from_secs(10);

/// Drives a node over TCP with the line-framed core-dialect protocol.
///
/// Connection is retried to give externally launched processes time to bind
/// their listening socket.
pub struct SocketAdapter {
    node_id: String,
    host: String,
    port: u16,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
    last_target_us: Option<u64>,
}

impl SocketAdapter {
    pub fn new(node_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            host: host.into(),
            port,
            reader: None,
            writer: None,
            last_target_us: None,
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), SimulationError> {
        let writer = self.writer.as_mut().ok_or_else(|| SimulationError::Connect {
            node: self.node_id.clone(),
            reason: "not connected".into(),
        })?;

        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;

        result.map_err(|e| SimulationError::Protocol {
            node: self.node_id.clone(),
            detail: format!("channel broken while writing: {e}"),
            stderr: None,
        })
    }

    async fn read_line(&mut self) -> Result<String, SimulationError> {
        let reader = self.reader.as_mut().ok_or_else(|| SimulationError::Connect {
            node: self.node_id.clone(),
            reason: "not connected".into(),
        })?;

        let mut line = String::new();
        let read = tokio::time::timeout(LINE_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| SimulationError::Timeout {
                node: self.node_id.clone(),
                timeout_ms: LINE_TIMEOUT.as_millis() as u64,
                stderr: None,
            })?;

        match read {
            Ok(0) => Err(SimulationError::Protocol {
                node: self.node_id.clone(),
                detail: "connection closed by node".into(),
                stderr: None,
            }),
            Ok(_) => Ok(line.trim_end().to_string()),
            Err(e) => Err(SimulationError::Protocol {
                node: self.node_id.clone(),
                detail: format!("channel broken while reading: {e}"),
                stderr: None,
            }),
        }
    }
}

#[async_trait]
impl NodeAdapter for SocketAdapter {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn connect(&mut self) -> Result<(), SimulationError> {
        let mut last_error = String::new();

        for attempt in 1..=CONNECT_ATTEMPTS {
            match TcpStream::connect((self.host.as_str(), self.port)).await {
                Ok(stream) => {
                    let (read_half, write_half) = stream.into_split();
                    self.reader = Some(BufReader::new(read_half));
                    self.writer = Some(write_half);
                    info!(
                        node = %self.node_id,
                        "connected to {}:{}", self.host, self.port
                    );
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < CONNECT_ATTEMPTS {
                        debug!(
                            node = %self.node_id,
                            attempt, "connection failed, retrying: {last_error}"
                        );
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(SimulationError::Connect {
            node: self.node_id.clone(),
            reason: format!("{last_error} (after {CONNECT_ATTEMPTS} attempts)"),
        })
    }

    async fn send_init(&mut self, config: &Value) -> Result<(), SimulationError> {
        let line = format!("INIT {} {}", self.node_id, config);
        self.write_line(&line).await?;

        let response = self.read_line().await?;
        if response == wire::READY {
            debug!(node = %self.node_id, "node ready");
            Ok(())
        } else {
            Err(SimulationError::Protocol {
                node: self.node_id.clone(),
                detail: format!("expected {}, got: {response}", wire::READY),
                stderr: None,
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
        self.write_line(&wire::encode_events(inbox)).await
    }

    async fn wait_done(&mut self) -> Result<Vec<Event>, SimulationError> {
        let response = self.read_line().await?;
        if response != wire::DONE {
            return Err(SimulationError::Protocol {
                node: self.node_id.clone(),
                detail: format!("expected {}, got: {response}", wire::DONE),
                stderr: None,
            });
        }

        let body = self.read_line().await?;
        wire::decode_events(&body, &self.node_id).map_err(|e| SimulationError::Protocol {
            node: self.node_id.clone(),
            detail: format!("malformed outbox JSON: {e}"),
            stderr: None,
        })
    }

    async fn send_shutdown(&mut self) {
        if self.writer.is_none() {
            return;
        }
        if let Err(e) = self.write_line(wire::SHUTDOWN).await {
            warn!(node = %self.node_id, "shutdown write failed: {e}");
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.reader = None;
        debug!(node = %self.node_id, "socket adapter shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader};
    use tokio::net::TcpListener;

    /// Minimal in-test node speaking the socket protocol for one quantum.
    async fn fake_node(listener: TcpListener, outbox_json: &str) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = TokioBufReader::new(read_half).lines();

        // INIT <id> <config>
        let init = lines.next_line().await.unwrap().unwrap();
        assert!(init.starts_with("INIT "), "got: {init}");
        write_half.write_all(b"READY\n").await.unwrap();

        // ADVANCE <t> + inbox
        let advance = lines.next_line().await.unwrap().unwrap();
        assert!(advance.starts_with("ADVANCE "), "got: {advance}");
        let _inbox = lines.next_line().await.unwrap().unwrap();

        write_half.write_all(b"DONE\n").await.unwrap();
        write_half
            .write_all(format!("{outbox_json}\n").as_bytes())
            .await
            .unwrap();

        // SHUTDOWN
        let shutdown = lines.next_line().await.unwrap().unwrap();
        assert_eq!(shutdown, "SHUTDOWN");
    }

    #[tokio::test]
    async fn full_quantum_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let outbox = r#"[{"time_us": 500, "type": "sample", "src": "sensor1", "dst": "gateway"}]"#;
        let node = tokio::spawn(fake_node(listener, outbox));

        let mut adapter = SocketAdapter::new("sensor1", "127.0.0.1", port);
        adapter.connect().await.unwrap();
        adapter
            .send_init(&serde_json::json!({"seed": 42}))
            .await
            .unwrap();
        adapter.send_advance(1_000, &[]).await.unwrap();

        let events = adapter.wait_done().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "sample");
        assert_eq!(events[0].dst.as_deref(), Some("gateway"));

        adapter.send_shutdown().await;
        node.await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_init_reply_is_a_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = TokioBufReader::new(read_half).lines();
            let _ = lines.next_line().await;
            write_half.write_all(b"ERROR bad\n").await.unwrap();
        });

        let mut adapter = SocketAdapter::new("sensor1", "127.0.0.1", port);
        adapter.connect().await.unwrap();
        let err = adapter
            .send_init(&serde_json::json!({"seed": 42}))
            .await
            .unwrap_err();
        assert!(matches!(err, SimulationError::Protocol { .. }));
        assert!(err.to_string().contains("ERROR bad"));
    }

    #[tokio::test]
    async fn backwards_advance_is_rejected_before_any_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            // Hold the connection open; no protocol traffic expected.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut adapter = SocketAdapter::new("sensor1", "127.0.0.1", port);
        adapter.connect().await.unwrap();
        adapter.send_advance(2_000, &[]).await.unwrap();

        let err = adapter.send_advance(1_000, &[]).await.unwrap_err();
        assert!(matches!(err, SimulationError::BackwardsTime { .. }));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let mut adapter = SocketAdapter::new("sensor1", "127.0.0.1", 1);
        // Never connected: both calls must be harmless no-ops.
        adapter.send_shutdown().await;
        adapter.send_shutdown().await;
    }
}
