//! Driver for a headless microcontroller emulator.
//!
//! The emulator runs as a child process with an external-clock discipline:
//! virtual time only moves when this driver issues an explicit `RunFor`
//! command over the emulator's TCP monitor. Firmware output arrives as JSON
//! lines on a UART whose bytes the emulator mirrors into a log file; input
//! events are injected back into the firmware one UART character at a time.
//!
//! Monitor framing is line-oriented with a prompt terminator: every command
//! is answered by text ending in either the bare `(monitor)` prompt or the
//! machine-named `(<machine>)` prompt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use taktsim_core::error::SimulationError;
use taktsim_core::event::Event;

use crate::inprocess::InProcessNode;

const BOOT_DELAY: Duration = Duration::from_millis(500);
const MONITOR_DELAY: Duration = Duration::from_secs(2);
const MONITOR_ATTEMPTS: u32 = 3;
const MONITOR_RETRY_DELAY: Duration = Duration::from_secs(1);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const RUN_FOR_TIMEOUT: Duration = Duration::from_secs(30);
const QUIT_TIMEOUT: Duration = Duration::from_secs(5);
const LOG_SETTLE: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for one emulator-backed node.
#[derive(Clone, Debug)]
pub struct EmulatorConfig {
    /// Platform description file loaded into the machine.
    pub platform: PathBuf,
    /// Firmware ELF image.
    pub firmware: PathBuf,
    /// TCP port of the emulator monitor.
    pub monitor_port: u16,
    /// Emulator executable.
    pub emulator_path: PathBuf,
    /// Working directory for the generated script and the UART log.
    pub working_dir: PathBuf,
    /// UART device whose traffic carries events.
    pub uart_device: String,
    /// Emulator-internal scheduling quantum in microseconds.
    pub time_quantum_us: u64,
}

impl EmulatorConfig {
    pub fn new(node_id: &str, platform: impl Into<PathBuf>, firmware: impl Into<PathBuf>) -> Self {
        Self {
            platform: platform.into(),
            firmware: firmware.into(),
            monitor_port: 1234,
            emulator_path: PathBuf::from("renode"),
            working_dir: PathBuf::from("/tmp/taktsim").join(node_id),
            uart_device: "sysbus.uart0".into(),
            time_quantum_us: 10,
        }
    }
}

/// Converts integer microseconds to the emulator's float-second interface.
/// This is the single place virtual time leaves integer representation.
fn us_to_virtual_seconds(time_us: u64) -> f64 {
    time_us as f64 / 1_000_000.0
}

/// Renders the emulator init script for one node.
fn render_script(node_id: &str, config: &EmulatorConfig, log_path: &Path) -> String {
    format!(
        r#"# taktsim emulator script - {node_id}
# Auto-generated; removed on shutdown
# Created: {created}

mach create "{node_id}"

machine LoadPlatformDescription @{platform}

sysbus LoadELF @{firmware}

showAnalyzer {uart}

# Mirror UART bytes into a file, flushed immediately
{uart} CreateFileBackend @{log_path} true

# External clock discipline: nothing advances without an explicit RunFor
emulation SetGlobalQuantum "{quantum}"

# Boot the firmware, then pause for time-stepped control
start
pause
"#,
        node_id = node_id,
        created = chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        platform = config.platform.display(),
        firmware = config.firmware.display(),
        uart = config.uart_device,
        log_path = log_path.display(),
        quantum = us_to_virtual_seconds(config.time_quantum_us),
    )
}

/// Monitor commands that inject one event into the firmware UART: the
/// compact JSON frame character by character, then a terminating newline.
fn writechar_commands(uart_device: &str, event: &Event) -> Vec<String> {
    let frame = json!({
        "type": event.kind,
        "src": event.src,
        "dst": event.dst.as_deref().unwrap_or(""),
        "payload": event.payload.clone().unwrap_or_else(|| json!({})),
        "time": event.time_us,
    });
    let text = frame.to_string();

    let mut commands: Vec<String> = text
        .chars()
        .map(|c| format!("{uart_device} WriteChar {}", c as u32))
        .collect();
    commands.push(format!("{uart_device} WriteChar 10"));
    commands
}

/// Accumulates UART text across advances and extracts one event per complete
/// JSON line. Partial lines are carried to the next call; lines without a
/// JSON object are emulator noise and ignored; malformed JSON is logged and
/// skipped without failing the advance.
struct UartParser {
    buffer: String,
    json_pattern: Regex,
}

impl UartParser {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            json_pattern: Regex::new(r"\{.*\}").expect("static pattern compiles"),
        }
    }

    fn push(&mut self, chunk: &str, node_id: &str, current_time_us: u64) -> Vec<Event> {
        self.buffer.push_str(chunk);

        let mut lines: Vec<String> = self.buffer.split('\n').map(str::to_string).collect();
        self.buffer = lines.pop().unwrap_or_default();

        let mut events = Vec::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some(found) = self.json_pattern.find(line) else {
                continue;
            };

            match serde_json::from_str::<Value>(found.as_str()) {
                Ok(data) => {
                    let kind = data
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("UART")
                        .to_string();
                    let time_us = data
                        .get("time")
                        .and_then(Value::as_u64)
                        .unwrap_or(current_time_us);
                    let dst = data
                        .get("dst")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string);

                    let mut event = Event::new(time_us, kind, node_id)
                        .with_payload(data)
                        .with_size(line.len() as u64);
                    event.dst = dst;
                    events.push(event);
                }
                Err(e) => {
                    warn!(node = %node_id, "malformed JSON in UART output: {line} ({e})");
                }
            }
        }

        events
    }
}

/// Emulator-backed in-process node.
pub struct EmulatorNode {
    node_id: String,
    config: EmulatorConfig,
    current_time_us: u64,
    process: Option<tokio::process::Child>,
    monitor: Option<TcpStream>,
    script_path: Option<PathBuf>,
    log_path: PathBuf,
    log_offset: u64,
    parser: UartParser,
}

impl EmulatorNode {
    pub fn new(node_id: impl Into<String>, config: EmulatorConfig) -> Self {
        let node_id = node_id.into();
        let log_path = config.working_dir.join("uart_data.txt");
        Self {
            node_id,
            config,
            current_time_us: 0,
            process: None,
            monitor: None,
            script_path: None,
            log_path,
            log_offset: 0,
            parser: UartParser::new(),
        }
    }

    fn connect_error(&self, reason: impl Into<String>) -> SimulationError {
        SimulationError::Connect {
            node: self.node_id.clone(),
            reason: reason.into(),
        }
    }

    async fn connect_monitor(&mut self) -> Result<(), SimulationError> {
        let port = self.config.monitor_port;
        let mut last_error = String::new();

        for attempt in 1..=MONITOR_ATTEMPTS {
            match TcpStream::connect(("localhost", port)).await {
                Ok(stream) => {
                    info!(node = %self.node_id, "connected to emulator monitor on port {port}");
                    self.monitor = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < MONITOR_ATTEMPTS {
                        debug!(node = %self.node_id, attempt, "monitor connect failed, retrying");
                        tokio::time::sleep(MONITOR_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(self.connect_error(format!(
            "monitor port {port} unreachable after {MONITOR_ATTEMPTS} attempts: {last_error}"
        )))
    }

    /// Sends one monitor command and reads until the prompt appears.
    async fn send_command(&mut self, cmd: &str, timeout: Duration) -> Result<String, SimulationError> {
        let node_id = self.node_id.clone();
        let machine_prompt = format!("({node_id})");

        let monitor = self
            .monitor
            .as_mut()
            .ok_or_else(|| SimulationError::Connect {
                node: node_id.clone(),
                reason: "monitor not connected".into(),
            })?;

        monitor
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| SimulationError::Protocol {
                node: node_id.clone(),
                detail: format!("monitor write failed: {e}"),
                stderr: None,
            })?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut response = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(SimulationError::Timeout {
                    node: node_id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                    stderr: None,
                });
            }

            match tokio::time::timeout(deadline - now, monitor.read(&mut chunk)).await {
                Err(_) => {
                    return Err(SimulationError::Timeout {
                        node: node_id.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                        stderr: None,
                    });
                }
                Ok(Ok(0)) => {
                    return Err(SimulationError::Protocol {
                        node: node_id.clone(),
                        detail: "monitor connection closed unexpectedly".into(),
                        stderr: None,
                    });
                }
                Ok(Ok(n)) => {
                    response.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&response);
                    if text.contains("(monitor)") || text.contains(&machine_prompt) {
                        return Ok(text.into_owned());
                    }
                }
                Ok(Err(e)) => {
                    return Err(SimulationError::Protocol {
                        node: node_id.clone(),
                        detail: format!("monitor read failed: {e}"),
                        stderr: None,
                    });
                }
            }
        }
    }

    /// Reads UART log content appended since the last call.
    async fn read_log_increment(&mut self) -> String {
        // Give the emulator's file backend a moment to flush.
        tokio::time::sleep(LOG_SETTLE).await;

        let content = match tokio::fs::read(&self.log_path).await {
            Ok(bytes) => bytes,
            Err(_) => return String::new(), // Not written yet
        };

        let offset = self.log_offset.min(content.len() as u64) as usize;
        self.log_offset = content.len() as u64;
        String::from_utf8_lossy(&content[offset..]).into_owned()
    }
}

#[async_trait]
impl InProcessNode for EmulatorNode {
    async fn start(&mut self) -> Result<(), SimulationError> {
        if !self.config.platform.exists() {
            return Err(
                self.connect_error(format!("platform file not found: {}", self.config.platform.display()))
            );
        }
        if !self.config.firmware.exists() {
            return Err(
                self.connect_error(format!("firmware file not found: {}", self.config.firmware.display()))
            );
        }

        tokio::fs::create_dir_all(&self.config.working_dir)
            .await
            .map_err(SimulationError::Io)?;

        let script = render_script(&self.node_id, &self.config, &self.log_path);
        let script_path = self
            .config
            .working_dir
            .join(format!("taktsim_{}.resc", self.node_id));
        tokio::fs::write(&script_path, script)
            .await
            .map_err(SimulationError::Io)?;
        self.script_path = Some(script_path.clone());

        info!(node = %self.node_id, "starting emulator: {}", self.config.emulator_path.display());
        let mut child = tokio::process::Command::new(&self.config.emulator_path)
            .arg("--disable-xwt")
            .arg("--port")
            .arg(self.config.monitor_port.to_string())
            .arg(&script_path)
            .current_dir(&self.config.working_dir)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SimulationError::Connect {
                node: self.node_id.clone(),
                reason: format!("failed to start emulator: {e}"),
            })?;

        // Lifecycle waits, not simulated time: let the process come up and
        // open its monitor port before dialing.
        tokio::time::sleep(BOOT_DELAY).await;
        if let Ok(Some(status)) = child.try_wait() {
            return Err(self.connect_error(format!("emulator exited during startup ({status})")));
        }
        tokio::time::sleep(MONITOR_DELAY).await;

        self.process = Some(child);
        self.connect_monitor().await?;

        info!(node = %self.node_id, "emulator ready for time-stepped execution");
        Ok(())
    }

    async fn inject(&mut self, inbox: &[Event]) -> Result<(), SimulationError> {
        let uart = self.config.uart_device.clone();
        for event in inbox {
            debug!(node = %self.node_id, kind = %event.kind, "injecting event via UART");
            for cmd in writechar_commands(&uart, event) {
                self.send_command(&cmd, COMMAND_TIMEOUT).await?;
            }
        }
        Ok(())
    }

    async fn advance(&mut self, target_time_us: u64) -> Result<Vec<Event>, SimulationError> {
        if target_time_us < self.current_time_us {
            return Err(SimulationError::BackwardsTime {
                node: self.node_id.clone(),
                current_us: self.current_time_us,
                target_us: target_time_us,
            });
        }
        if target_time_us == self.current_time_us {
            return Ok(Vec::new());
        }

        let delta_us = target_time_us - self.current_time_us;
        let seconds = us_to_virtual_seconds(delta_us);
        debug!(node = %self.node_id, "advancing {delta_us}us ({seconds}s virtual)");

        self.send_command(&format!("emulation RunFor @{seconds}"), RUN_FOR_TIMEOUT)
            .await?;

        let output = self.read_log_increment().await;
        if !output.is_empty() {
            debug!(node = %self.node_id, "captured {} bytes from UART", output.len());
        }
        let node_id = self.node_id.clone();
        let events = self.parser.push(&output, &node_id, target_time_us);

        self.current_time_us = target_time_us;
        debug!(node = %self.node_id, "advanced to {target_time_us}us, {} events", events.len());
        Ok(events)
    }

    async fn stop(&mut self) {
        if self.monitor.is_some() {
            if let Err(e) = self.send_command("quit", QUIT_TIMEOUT).await {
                debug!(node = %self.node_id, "quit command failed during stop: {e}");
            }
            self.monitor = None;
        }

        if let Some(mut child) = self.process.take() {
            if let Some(pid) = child.id() {
                let _ = nix::sys::signal::kill(
                    nix::unistd::Pid::from_raw(pid as i32),
                    nix::sys::signal::Signal::SIGTERM,
                );
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await.is_err() {
                warn!(node = %self.node_id, "emulator ignored SIGTERM, killing");
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }

        if let Some(script_path) = self.script_path.take() {
            let _ = tokio::fs::remove_file(script_path).await;
        }

        info!(node = %self.node_id, "emulator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;

    fn test_config(dir: &Path) -> EmulatorConfig {
        let mut config = EmulatorConfig::new("dev1", dir.join("board.repl"), dir.join("fw.elf"));
        config.working_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn script_contains_machine_and_clock_discipline() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let script = render_script("dev1", &config, &dir.path().join("uart_data.txt"));

        assert!(script.contains("mach create \"dev1\""));
        assert!(script.contains("LoadPlatformDescription"));
        assert!(script.contains("LoadELF"));
        assert!(script.contains("CreateFileBackend"));
        // 10us quantum in virtual seconds.
        assert!(script.contains("SetGlobalQuantum \"0.00001\""));
        assert!(script.contains("start\npause"));
    }

    #[test]
    fn microsecond_conversion_is_exact_at_boundaries() {
        assert_eq!(us_to_virtual_seconds(1_000_000), 1.0);
        assert_eq!(us_to_virtual_seconds(1_000), 0.001);
        assert_eq!(us_to_virtual_seconds(100), 0.0001);
    }

    #[test]
    fn writechar_commands_spell_out_the_frame() {
        let event = Event::new(1_000, "TEST", "coordinator")
            .with_dst("dev1")
            .with_payload(json!({"value": 42}));
        let commands = writechar_commands("sysbus.uart0", &event);

        // Last command is the newline terminator.
        assert_eq!(commands.last().unwrap(), "sysbus.uart0 WriteChar 10");

        // Reassembling the character codes yields the injected JSON frame.
        let frame: String = commands[..commands.len() - 1]
            .iter()
            .map(|cmd| {
                let code: u32 = cmd.rsplit(' ').next().unwrap().parse().unwrap();
                char::from_u32(code).unwrap()
            })
            .collect();
        let data: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(data["type"], "TEST");
        assert_eq!(data["src"], "coordinator");
        assert_eq!(data["dst"], "dev1");
        assert_eq!(data["payload"]["value"], 42);
        assert_eq!(data["time"], 1_000);
    }

    #[test]
    fn uart_parser_extracts_json_lines_and_skips_noise() {
        let mut parser = UartParser::new();
        let events = parser.push(
            "boot banner\n{\"type\":\"SAMPLE\",\"value\":25.3,\"time\":1000000}\nnot json\n",
            "dev1",
            2_000_000,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "SAMPLE");
        assert_eq!(events[0].time_us, 1_000_000);
        assert_eq!(events[0].src, "dev1");
        assert_eq!(events[0].payload.as_ref().unwrap()["value"], 25.3);
    }

    #[test]
    fn uart_parser_buffers_partial_lines_across_calls() {
        let mut parser = UartParser::new();
        assert!(parser
            .push("{\"type\":\"SAMPLE\",", "dev1", 1_000)
            .is_empty());
        let events = parser.push("\"time\":500}\n", "dev1", 1_000);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time_us, 500);
    }

    #[test]
    fn uart_parser_defaults_time_to_current_and_skips_malformed() {
        let mut parser = UartParser::new();
        let events = parser.push(
            "{\"type\":\"PING\"}\n{\"type\": broken}\n",
            "dev1",
            7_777,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time_us, 7_777);
    }

    #[tokio::test]
    async fn start_fails_fast_when_files_are_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut node = EmulatorNode::new("dev1", config);

        let err = node.start().await.unwrap_err();
        assert!(matches!(err, SimulationError::Connect { .. }));
        assert!(err.to_string().contains("platform file not found"));
    }

    #[tokio::test]
    async fn send_command_waits_for_machine_prompt() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = tokio::io::BufReader::new(read_half).lines();
            let cmd = lines.next_line().await.unwrap().unwrap();
            assert_eq!(cmd, "emulation RunFor @0.001");
            // Response split across writes, prompt only in the second one.
            write_half.write_all(b"running...\n").await.unwrap();
            write_half.write_all(b"(dev1) ").await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.monitor_port = port;
        let mut node = EmulatorNode::new("dev1", config);
        node.monitor = Some(TcpStream::connect(("127.0.0.1", port)).await.unwrap());

        let response = node
            .send_command("emulation RunFor @0.001", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(response.contains("running"));
        assert!(response.contains("(dev1)"));
    }

    #[tokio::test]
    async fn advance_to_same_target_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut node = EmulatorNode::new("dev1", test_config(dir.path()));
        // No monitor needed: Δ=0 returns before any command is sent.
        let events = node.advance(0).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn backwards_advance_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut node = EmulatorNode::new("dev1", test_config(dir.path()));
        node.current_time_us = 2_000;
        let err = node.advance(1_000).await.unwrap_err();
        assert!(matches!(err, SimulationError::BackwardsTime { .. }));
    }

    #[tokio::test]
    async fn log_reads_are_incremental_by_offset() {
        let dir = tempfile::tempdir().unwrap();
        let mut node = EmulatorNode::new("dev1", test_config(dir.path()));

        tokio::fs::write(&node.log_path, "first\n").await.unwrap();
        assert_eq!(node.read_log_increment().await, "first\n");

        tokio::fs::write(&node.log_path, "first\nsecond\n")
            .await
            .unwrap();
        assert_eq!(node.read_log_increment().await, "second\n");
        assert_eq!(node.read_log_increment().await, "");
    }
}
