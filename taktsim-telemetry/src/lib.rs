//! # taktsim-telemetry
//!
//! Observability layer for the harness.
//!
//! ### Components:
//! - `logging/`: tracing subscriber setup and structured run events
//! - `metrics/`: Prometheus counters for coordination progress
//!
//! Telemetry observes the run; it never participates in virtual time.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
