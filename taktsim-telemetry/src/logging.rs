//! Structured logging with tracing.
//!
//! The coordinator and the adapters log through ordinary `tracing` macros;
//! this module owns subscriber installation and the handful of structured
//! run-lifecycle events (`run_started`, `run_complete`, `run_failed`) that
//! operators grep for.

use opentelemetry::KeyValue;
use tracing::{info_span, Instrument};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global tracing subscriber. `RUST_LOG` overrides the
    /// default `info` filter.
    pub fn init() {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let fmt_layer = fmt::layer().with_target(false);

        let filter_layer = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info"))
            .unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    }

    /// Records a run-lifecycle event with structured metadata.
    #[inline]
    pub async fn log_event(event_type: &str, metadata: Vec<KeyValue>) {
        let span = info_span!("run_event", event_type = event_type);

        async {
            tracing::info!(metadata = ?metadata, "Run lifecycle event");
        }
        .instrument(span)
        .await
    }
}
