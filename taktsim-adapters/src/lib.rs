//! # taktsim-adapters
//!
//! The node adapter layer: one contract, three execution substrates.
//!
//! Every node the coordinator drives sits behind a [`NodeAdapter`]:
//!
//! - [`SocketAdapter`]: externally launched processes reached over TCP with
//!   the line-framed text protocol.
//! - [`StdioAdapter`]: child processes attached via stdin/stdout pipes,
//!   speaking the same protocol grammar in the container field dialect.
//! - [`InProcessAdapter`]: nodes executing inside the coordinator's address
//!   space behind the [`InProcessNode`] trait — most importantly
//!   [`EmulatorNode`], the driver for a headless microcontroller emulator
//!   under external-clock discipline.
//!
//! Adapters are the only suspension points of a run: the coordinator's time
//! loop stays single-task and blocks inside `wait_done` while a node works.

mod adapter;
mod emulator;
mod inprocess;
mod socket;
mod stdio;

pub use adapter::NodeAdapter;
pub use emulator::{EmulatorConfig, EmulatorNode};
pub use inprocess::{InProcessAdapter, InProcessNode};
pub use socket::SocketAdapter;
pub use stdio::StdioAdapter;
