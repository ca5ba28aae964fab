//! Error taxonomy for the harness.
//!
//! Every fatal condition an adapter or the coordinator can hit maps to one of
//! these variants and unwinds to the launcher, which runs teardown and folds
//! the error into the run result. Non-fatal anomalies (events without a
//! routable destination, malformed firmware output lines) are logged where
//! they occur and never appear here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    /// Invalid or missing scenario field, caught before any bring-up.
    #[error("configuration error: {0}")]
    Config(String),

    /// Accumulated pre-launch validation failures (missing firmware,
    /// platform or model files). Reported in bulk, one line each.
    #[error("scenario validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<String>),

    /// A node channel could not be established within its retry budget.
    #[error("cannot reach node '{node}': {reason}")]
    Connect { node: String, reason: String },

    /// Unexpected frame or malformed body on an established channel.
    #[error("protocol violation from '{node}': {detail}{}", stderr_suffix(.stderr))]
    Protocol {
        node: String,
        detail: String,
        /// Stderr accumulated from the offending child, when available.
        stderr: Option<String>,
    },

    /// A node did not acknowledge DONE within its advance deadline.
    #[error("node '{node}' did not reply within {timeout_ms}ms{}", stderr_suffix(.stderr))]
    Timeout {
        node: String,
        timeout_ms: u64,
        stderr: Option<String>,
    },

    /// An adapter was asked to advance to a target behind its current time.
    /// Always a coordinator bug; aborts the run immediately.
    #[error("backwards time advance for '{node}': target {target_us}us < current {current_us}us")]
    BackwardsTime {
        node: String,
        current_us: u64,
        target_us: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_validation_errors(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn stderr_suffix(stderr: &Option<String>) -> String {
    match stderr {
        Some(text) if !text.is_empty() => format!("\nnode stderr:\n{text}"),
        _ => String::new(),
    }
}
