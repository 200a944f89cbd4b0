#![deny(unused)]
//! Logging and metrics setup for Launchpad.
//!
//! - [`configure_tracing`]: `tracing` subscriber with human or JSON output
//!   and an optional OTLP exporter.
//! - [`setup_metrics_recorder`]: Prometheus recorder backing `GET /metrics`.

pub mod metrics;
pub mod tracing_layer;

pub use metrics::setup_metrics_recorder;
pub use tracing_layer::configure_tracing;
