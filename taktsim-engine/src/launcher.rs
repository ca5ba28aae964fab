//! Scenario lifecycle: validate, bring up, execute, always tear down.
//!
//! Fail-fast during setup, graceful during execution, and always clean on
//! the way out: whatever path a run takes, teardown shuts every adapter
//! down, stops every supervised process, and leaves nothing registered.

use std::path::Path;
use std::time::Instant;

use tracing::{error, info, warn};

use taktsim_adapters::{EmulatorConfig, EmulatorNode, StdioAdapter};
use taktsim_config::{
    NetworkModelKind, NodeImplementation, NodeSpec, ScenarioConfig,
};
use taktsim_core::error::SimulationError;
use taktsim_network::{DirectNetworkModel, LatencyNetworkModel, NetworkModel};

use crate::coordinator::Coordinator;
use crate::supervisor::{CommandSupervisor, ProcessHandle, ProcessSpec, ProcessSupervisor};

/// Outcome of one complete simulation run.
#[derive(Clone, Debug)]
pub struct SimulationResult {
    pub success: bool,
    /// Wall-clock duration of the run.
    pub duration_sec: f64,
    /// Virtual time reached; zero for failed runs.
    pub virtual_time_sec: f64,
    pub step_count: u64,
    pub error_message: Option<String>,
}

/// Manages the lifecycle of every component of one scenario run.
pub struct SimulationLauncher {
    scenario: ScenarioConfig,
    supervisor: Box<dyn ProcessSupervisor>,
    handles: Vec<ProcessHandle>,
    coordinator: Option<Coordinator>,
}

impl SimulationLauncher {
    pub fn new(scenario: ScenarioConfig) -> Self {
        Self::with_supervisor(scenario, Box::new(CommandSupervisor::new()))
    }

    /// Injects an alternative process supervisor (tests, other runtimes).
    pub fn with_supervisor(scenario: ScenarioConfig, supervisor: Box<dyn ProcessSupervisor>) -> Self {
        Self {
            scenario,
            supervisor,
            handles: Vec::new(),
            coordinator: None,
        }
    }

    pub fn scenario(&self) -> &ScenarioConfig {
        &self.scenario
    }

    /// Pre-launch validation pass. Pure: no side effects, accumulates every
    /// failure instead of stopping at the first.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for node in &self.scenario.nodes {
            if node.implementation == NodeImplementation::InProcess {
                match &node.platform {
                    Some(platform) if !platform.exists() => errors.push(format!(
                        "node '{}': platform not found: {}",
                        node.id,
                        platform.display()
                    )),
                    _ => {}
                }
                match &node.firmware {
                    Some(firmware) if !firmware.exists() => errors.push(format!(
                        "node '{}': firmware not found: {}",
                        node.id,
                        firmware.display()
                    )),
                    _ => {}
                }
            }
        }

        if let Some(ml) = &self.scenario.ml_inference {
            if !ml.model_path.exists() {
                errors.push(format!(
                    "ML model not found: {}",
                    ml.model_path.display()
                ));
            }
        }

        errors
    }

    /// Launches and runs the complete simulation, tearing everything down on
    /// every exit path.
    pub async fn run(&mut self) -> SimulationResult {
        let start_wall = Instant::now();

        let outcome = self.execute().await;
        self.shutdown().await;

        let duration_sec = start_wall.elapsed().as_secs_f64();
        match outcome {
            Ok(()) => {
                info!("run succeeded in {duration_sec:.2}s wall time");
                SimulationResult {
                    success: true,
                    duration_sec,
                    virtual_time_sec: self.scenario.simulation.duration_s,
                    step_count: self
                        .coordinator
                        .as_ref()
                        .map(Coordinator::step_count)
                        .unwrap_or(0),
                    error_message: None,
                }
            }
            Err(e) => {
                error!("run failed: {e}");
                SimulationResult {
                    success: false,
                    duration_sec,
                    virtual_time_sec: 0.0,
                    step_count: self
                        .coordinator
                        .as_ref()
                        .map(Coordinator::step_count)
                        .unwrap_or(0),
                    error_message: Some(e.to_string()),
                }
            }
        }
    }

    async fn execute(&mut self) -> Result<(), SimulationError> {
        // Phase 1: validation, before any external side effect.
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(SimulationError::Validation(errors));
        }
        info!("scenario validation passed");

        // Phase 2: external processes backing socket nodes.
        let container_specs: Vec<ProcessSpec> = self
            .scenario
            .nodes
            .iter()
            .filter(|node| node.implementation == NodeImplementation::Socket)
            .filter_map(|node| {
                node.container.as_ref().map(|container| ProcessSpec {
                    name: node.id.clone(),
                    image: Some(container.image.clone()),
                    build_context: container.build_context.clone(),
                    command: Vec::new(),
                    env: container.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    ports: container.ports.iter().map(|(h, c)| (*h, *c)).collect(),
                })
            })
            .collect();
        for spec in &container_specs {
            let handle = self.supervisor.start(spec).await?;
            self.handles.push(handle);
        }

        // Phase 3: coordinator with the configured network model.
        let network = build_network_model(&self.scenario);
        let mut coordinator = Coordinator::new(self.scenario.simulation.time_quantum_us, network);

        // Phase 4: adapter registration, in scenario order.
        for node in &self.scenario.nodes {
            register_node(&mut coordinator, node)?;
        }
        info!("registered {} node(s)", coordinator.node_count());

        // Stored before bring-up so teardown reaches the adapters even when
        // connect or init fails partway through.
        let coordinator = self.coordinator.insert(coordinator);

        // Phase 5: bring-up.
        coordinator.connect_all().await?;
        coordinator
            .initialize_all(self.scenario.simulation.seed)
            .await?;

        // Phase 6: execute.
        let duration_us = self.scenario.duration_us();
        coordinator.run(duration_us).await
    }

    /// Tears down every component. Idempotent; never raises.
    pub async fn shutdown(&mut self) {
        if let Some(coordinator) = self.coordinator.as_mut() {
            coordinator.shutdown_all().await;
        }

        for handle in self.handles.drain(..) {
            self.supervisor.stop(&handle).await;
        }

        let leftover = self.supervisor.active();
        if leftover > 0 {
            warn!("{leftover} supervised process(es) still registered after teardown");
        } else {
            info!("clean shutdown, no orphaned processes");
        }
    }
}

fn build_network_model(scenario: &ScenarioConfig) -> Box<dyn NetworkModel> {
    match &scenario.network {
        None => Box::new(DirectNetworkModel),
        Some(config) => match config.model {
            NetworkModelKind::Direct => Box::new(DirectNetworkModel),
            NetworkModelKind::Latency => Box::new(LatencyNetworkModel::new(
                config,
                scenario.simulation.seed,
            )),
        },
    }
}

fn register_node(coordinator: &mut Coordinator, node: &NodeSpec) -> Result<(), SimulationError> {
    match node.implementation {
        NodeImplementation::Socket => {
            let port = node.port.ok_or_else(|| {
                SimulationError::Config(format!("node '{}': missing port", node.id))
            })?;
            coordinator.add_socket_node(&node.id, node.host_or_default(), port);
        }
        NodeImplementation::Stdio => {
            let command = node.command.clone().ok_or_else(|| {
                SimulationError::Config(format!("node '{}': missing command", node.id))
            })?;
            coordinator.add_adapter(&node.id, Box::new(StdioAdapter::new(&node.id, command)));
        }
        NodeImplementation::InProcess => {
            let platform = node.platform.clone().ok_or_else(|| {
                SimulationError::Config(format!("node '{}': missing platform", node.id))
            })?;
            let firmware = node.firmware.clone().ok_or_else(|| {
                SimulationError::Config(format!("node '{}': missing firmware", node.id))
            })?;

            let mut config = EmulatorConfig::new(&node.id, platform, firmware);
            if let Some(port) = node.monitor_port {
                config.monitor_port = port;
            }
            if let Some(dir) = &node.working_dir {
                config.working_dir = dir.clone();
            }
            if let Some(uart) = &node.uart_device {
                config.uart_device = uart.clone();
            }
            if let Some(path) = &node.emulator_path {
                config.emulator_path = path.clone();
            }
            if let Some(quantum) = node.time_quantum_us {
                config.time_quantum_us = quantum;
            }

            coordinator.add_inprocess_node(&node.id, Box::new(EmulatorNode::new(&node.id, config)));
        }
    }
    Ok(())
}

/// Loads, optionally re-seeds, and runs a scenario file.
pub async fn run_scenario_file(
    path: &Path,
    seed_override: Option<u64>,
) -> Result<SimulationResult, SimulationError> {
    let mut scenario = ScenarioConfig::load_from_path(path)
        .map_err(|e| SimulationError::Config(e.to_string()))?;

    if let Some(seed) = seed_override {
        info!("overriding seed: {} -> {seed}", scenario.simulation.seed);
        scenario.simulation.seed = seed;
    }

    let mut launcher = SimulationLauncher::new(scenario);
    Ok(launcher.run().await)
}
