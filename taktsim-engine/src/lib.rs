//! # taktsim-engine
//!
//! The coordination engine: the conservative synchronous time coordinator,
//! and the launcher that brings a whole scenario graph up and tears it down
//! without leaks.
//!
//! The [`Coordinator`] owns the run clock and the per-node inboxes and drives
//! every registered adapter forward in fixed virtual-time quanta. The
//! [`SimulationLauncher`] wraps one full run: validation, external process
//! bring-up through an injected [`ProcessSupervisor`], adapter registration,
//! execution, and teardown on every exit path.

mod coordinator;
mod launcher;
mod supervisor;

pub use coordinator::Coordinator;
pub use launcher::{run_scenario_file, SimulationLauncher, SimulationResult};
pub use supervisor::{CommandSupervisor, ProcessHandle, ProcessSpec, ProcessSupervisor};
