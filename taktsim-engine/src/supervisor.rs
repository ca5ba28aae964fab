//! External process supervision.
//!
//! The launcher never talks to a container runtime or spawns a process
//! directly; it goes through [`ProcessSupervisor`], which has exactly two
//! operations. That keeps lifecycle management testable without a container
//! daemon and confines all process-wide state to one registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use taktsim_core::error::SimulationError;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// What to start: either a container image (with optional build context) or
/// a plain command line.
#[derive(Clone, Debug, Default)]
pub struct ProcessSpec {
    /// Node id the process backs; used in logs and handles.
    pub name: String,
    /// Container image to run. When set, `command` is ignored.
    pub image: Option<String>,
    /// Build the image from this context before running it.
    pub build_context: Option<PathBuf>,
    /// Argv for plain processes.
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    /// host port -> container port
    pub ports: Vec<(u16, u16)>,
}

/// Opaque handle to a supervised process.
#[derive(Clone, Debug)]
pub struct ProcessHandle {
    pub id: u64,
    pub description: String,
}

#[async_trait]
pub trait ProcessSupervisor: Send {
    async fn start(&mut self, spec: &ProcessSpec) -> Result<ProcessHandle, SimulationError>;

    /// Stops and reclaims the process behind `handle`. Best-effort: logs
    /// failures, never raises.
    async fn stop(&mut self, handle: &ProcessHandle);

    /// Number of processes still registered. Zero after a clean teardown.
    fn active(&self) -> usize;
}

enum Supervised {
    Child(Child),
    Container(String),
}

/// Default supervisor: spawns plain commands directly and containers through
/// the `docker` CLI.
#[derive(Default)]
pub struct CommandSupervisor {
    next_id: u64,
    processes: HashMap<u64, Supervised>,
}

impl CommandSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    async fn start_container(&mut self, spec: &ProcessSpec, image: &str) -> Result<Supervised, SimulationError> {
        if let Some(context) = &spec.build_context {
            info!(node = %spec.name, "building image {image} from {}", context.display());
            let status = Command::new("docker")
                .arg("build")
                .arg("-t")
                .arg(image)
                .arg(context)
                .status()
                .await
                .map_err(|e| SimulationError::Connect {
                    node: spec.name.clone(),
                    reason: format!("docker build failed to start: {e}"),
                })?;
            if !status.success() {
                return Err(SimulationError::Connect {
                    node: spec.name.clone(),
                    reason: format!("docker build failed ({status})"),
                });
            }
        }

        let mut command = Command::new("docker");
        command.arg("run").arg("-d");
        for (key, value) in &spec.env {
            command.arg("-e").arg(format!("{key}={value}"));
        }
        for (host, container) in &spec.ports {
            command.arg("-p").arg(format!("{host}:{container}"));
        }
        command.arg(image);

        let output = command.output().await.map_err(|e| SimulationError::Connect {
            node: spec.name.clone(),
            reason: format!("docker run failed to start: {e}"),
        })?;
        if !output.status.success() {
            return Err(SimulationError::Connect {
                node: spec.name.clone(),
                reason: format!(
                    "docker run failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(node = %spec.name, "started container {container_id}");
        Ok(Supervised::Container(container_id))
    }

    fn start_command(&mut self, spec: &ProcessSpec) -> Result<Supervised, SimulationError> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| SimulationError::Connect {
                node: spec.name.clone(),
                reason: "empty command".into(),
            })?;

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let child = command.spawn().map_err(|e| SimulationError::Connect {
            node: spec.name.clone(),
            reason: format!("failed to spawn {program}: {e}"),
        })?;
        info!(node = %spec.name, "started process {program} (pid {:?})", child.id());
        Ok(Supervised::Child(child))
    }
}

#[async_trait]
impl ProcessSupervisor for CommandSupervisor {
    async fn start(&mut self, spec: &ProcessSpec) -> Result<ProcessHandle, SimulationError> {
        let supervised = match &spec.image {
            Some(image) => {
                let image = image.clone();
                self.start_container(spec, &image).await?
            }
            None => self.start_command(spec)?,
        };

        let id = self.next_id;
        self.next_id += 1;
        let description = match &supervised {
            Supervised::Child(child) => format!("{} (pid {:?})", spec.name, child.id()),
            Supervised::Container(container) => format!("{} (container {container})", spec.name),
        };
        self.processes.insert(id, supervised);
        Ok(ProcessHandle { id, description })
    }

    async fn stop(&mut self, handle: &ProcessHandle) {
        let Some(supervised) = self.processes.remove(&handle.id) else {
            debug!("stop for unknown handle {}: already reclaimed", handle.id);
            return;
        };

        match supervised {
            Supervised::Container(container_id) => {
                debug!("stopping container {container_id}");
                let result = Command::new("docker")
                    .arg("stop")
                    .arg(&container_id)
                    .output()
                    .await;
                if let Err(e) = result {
                    warn!("failed to stop container {container_id}: {e}");
                }
                let _ = Command::new("docker")
                    .arg("rm")
                    .arg("-f")
                    .arg(&container_id)
                    .output()
                    .await;
            }
            Supervised::Child(mut child) => {
                if let Some(pid) = child.id() {
                    debug!("terminating pid {pid}");
                    let _ = nix::sys::signal::kill(
                        nix::unistd::Pid::from_raw(pid as i32),
                        nix::sys::signal::Signal::SIGTERM,
                    );
                }
                if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_err() {
                    warn!("{} ignored SIGTERM, killing", handle.description);
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }
        }
    }

    fn active(&self) -> usize {
        self.processes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_command_starts_and_stops_cleanly() {
        let mut supervisor = CommandSupervisor::new();
        let spec = ProcessSpec {
            name: "sleeper".into(),
            command: vec!["sleep".into(), "30".into()],
            ..Default::default()
        };

        let handle = supervisor.start(&spec).await.unwrap();
        assert_eq!(supervisor.active(), 1);

        supervisor.stop(&handle).await;
        assert_eq!(supervisor.active(), 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent_per_handle() {
        let mut supervisor = CommandSupervisor::new();
        let spec = ProcessSpec {
            name: "true".into(),
            command: vec!["true".into()],
            ..Default::default()
        };
        let handle = supervisor.start(&spec).await.unwrap();
        supervisor.stop(&handle).await;
        supervisor.stop(&handle).await;
        assert_eq!(supervisor.active(), 0);
    }

    #[tokio::test]
    async fn unknown_program_is_a_connect_error() {
        let mut supervisor = CommandSupervisor::new();
        let spec = ProcessSpec {
            name: "ghost".into(),
            command: vec!["/definitely/not/here".into()],
            ..Default::default()
        };
        let err = supervisor.start(&spec).await.unwrap_err();
        assert!(matches!(err, SimulationError::Connect { .. }));
        assert_eq!(supervisor.active(), 0);
    }
}
