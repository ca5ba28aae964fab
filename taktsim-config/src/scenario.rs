//! Scenario schema.
//!
//! The YAML layout mirrors the conversational structure of a run:
//!
//! ```yaml
//! simulation:
//!   duration_s: 2.0
//!   seed: 123
//!   time_quantum_us: 1000
//!
//! network:
//!   model: latency
//!   default_latency_us: 10000
//!   default_loss_rate: 0.0
//!   links:
//!     - { src: sensor1, dst: gateway, latency_us: 5000, loss_rate: 0.01 }
//!
//! nodes:
//!   - id: sensor1
//!     type: sensor
//!     implementation: socket
//!     port: 5001
//!   - id: dev1
//!     type: device
//!     implementation: inprocess
//!     platform: platforms/nrf52840.repl
//!     firmware: firmware/sensor.elf
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation;

/// Top-level validated scenario record.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct ScenarioConfig {
    #[validate(nested)]
    pub simulation: SimulationConfig,

    /// Participating nodes, in the order they will be registered with the
    /// coordinator. That order is part of the determinism contract.
    #[validate(length(min = 1, message = "at least one node is required"))]
    #[validate(nested)]
    pub nodes: Vec<NodeSpec>,

    /// Optional network emulation. Absent means zero-latency direct routing.
    #[serde(default)]
    #[validate(nested)]
    pub network: Option<NetworkConfig>,

    /// Optional ML placement record. Opaque to the harness except for the
    /// model-file existence check during pre-launch validation.
    #[serde(default)]
    pub ml_inference: Option<MlPlacementConfig>,
}

/// Virtual-time parameters of the run.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct SimulationConfig {
    /// Run duration in virtual seconds. Converted to integer microseconds at
    /// this boundary and never used as a float again.
    #[validate(range(exclusive_min = 0.0, message = "duration_s must be positive"))]
    pub duration_s: f64,

    /// Seed for every deterministic stream in the run.
    pub seed: u64,

    /// Coordination quantum in microseconds.
    #[serde(default = "default_time_quantum_us")]
    #[validate(range(min = 1, message = "time_quantum_us must be positive"))]
    pub time_quantum_us: u64,
}

fn default_time_quantum_us() -> u64 {
    1_000
}

/// Which execution substrate backs a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeImplementation {
    /// Driven inside the coordinator's process (emulator-backed nodes).
    InProcess,
    /// Externally launched process reached over TCP.
    Socket,
    /// Child process attached via stdin/stdout pipes.
    Stdio,
}

/// One participating node.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct NodeSpec {
    /// Stable identifier, unique within the run.
    #[validate(custom(function = validation::validate_node_id))]
    pub id: String,

    /// Free-form role label (sensor, gateway, ...). The harness never
    /// interprets it.
    #[serde(rename = "type")]
    pub kind: String,

    pub implementation: NodeImplementation,

    // Socket nodes
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Optional container backing a socket node; started and stopped by the
    /// launcher's process supervisor.
    #[serde(default)]
    pub container: Option<ContainerConfig>,

    // Stdio nodes
    /// Argv of the child process speaking the stdio protocol.
    #[serde(default)]
    pub command: Option<Vec<String>>,

    // In-process (emulator-backed) nodes
    #[serde(default)]
    pub platform: Option<PathBuf>,
    #[serde(default)]
    pub firmware: Option<PathBuf>,
    #[serde(default)]
    pub monitor_port: Option<u16>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub uart_device: Option<String>,
    #[serde(default)]
    pub emulator_path: Option<PathBuf>,
    #[serde(default)]
    pub time_quantum_us: Option<u64>,
}

impl NodeSpec {
    /// Host a socket adapter should dial.
    pub fn host_or_default(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }
}

/// Container configuration for socket nodes backed by an image.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub image: String,
    /// Build the image from this context before starting it.
    #[serde(default)]
    pub build_context: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// host port -> container port
    #[serde(default)]
    pub ports: BTreeMap<u16, u16>,
}

/// Which network model routes cross-node events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkModelKind {
    #[default]
    Direct,
    Latency,
}

/// Network emulation parameters.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct NetworkConfig {
    #[serde(default)]
    pub model: NetworkModelKind,

    /// Latency applied to links without an explicit entry.
    #[serde(default = "default_latency_us")]
    pub default_latency_us: u64,

    /// Loss rate applied to links without an explicit entry.
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0, message = "loss rate must be in [0, 1]"))]
    pub default_loss_rate: f64,

    #[serde(default)]
    #[validate(nested)]
    pub links: Vec<NetworkLink>,
}

fn default_latency_us() -> u64 {
    10_000
}

/// A directed link with its own delay and loss parameters.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct NetworkLink {
    pub src: String,
    pub dst: String,
    pub latency_us: u64,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0, message = "loss rate must be in [0, 1]"))]
    pub loss_rate: f64,
}

/// Where ML inference is placed. The harness only checks that the referenced
/// model file exists; node code interprets the rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MlPlacement {
    Edge,
    Cloud,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MlPlacementConfig {
    pub placement: MlPlacement,
    pub model_path: PathBuf,
}

impl ScenarioConfig {
    /// Run duration in integer microseconds. The only place float seconds
    /// are converted.
    pub fn duration_us(&self) -> u64 {
        (self.simulation.duration_s * 1_000_000.0) as u64
    }

    /// Cross-field checks that `validator` field attributes cannot express.
    /// Accumulates every failure instead of stopping at the first.
    pub fn validate_semantics(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut seen_ids = HashSet::new();
        for node in &self.nodes {
            if !seen_ids.insert(node.id.as_str()) {
                errors.push(format!("duplicate node id: '{}'", node.id));
            }

            match node.implementation {
                NodeImplementation::Socket => {
                    if node.port.is_none() {
                        errors.push(format!(
                            "node '{}': 'port' is required for socket nodes",
                            node.id
                        ));
                    }
                }
                NodeImplementation::Stdio => match &node.command {
                    Some(command) if !command.is_empty() => {}
                    _ => errors.push(format!(
                        "node '{}': non-empty 'command' is required for stdio nodes",
                        node.id
                    )),
                },
                NodeImplementation::InProcess => {
                    if node.platform.is_none() {
                        errors.push(format!(
                            "node '{}': 'platform' is required for inprocess nodes",
                            node.id
                        ));
                    }
                    if node.firmware.is_none() {
                        errors.push(format!(
                            "node '{}': 'firmware' is required for inprocess nodes",
                            node.id
                        ));
                    }
                }
            }
        }

        if let Some(network) = &self.network {
            let mut seen_links = HashSet::new();
            for link in &network.links {
                if !seen_links.insert((link.src.as_str(), link.dst.as_str())) {
                    errors.push(format!("duplicate link: {} -> {}", link.src, link.dst));
                }
            }
        }

        errors
    }
}
