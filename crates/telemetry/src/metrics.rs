//! Prometheus metrics.

use launchpad_core::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::telemetry(format!("Failed to install Prometheus recorder: {}", e)))?;

    describe_metrics();
    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Register help text for the pipeline's metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "launchpad_jobs_total",
        "Jobs taken off the queue, by outcome"
    );
    metrics::describe_counter!(
        "launchpad_events_published_total",
        "Pipeline events broadcast to observers, by kind"
    );
    metrics::describe_gauge!("launchpad_ports_available", "Free host ports in the pool");
    metrics::describe_gauge!("launchpad_observers", "Connected event-stream observers");
    metrics::describe_counter!(
        "launchpad_observers_dropped_total",
        "Observers dropped because their event buffer filled up"
    );
    metrics::describe_histogram!(
        "launchpad_provision_duration_seconds",
        metrics::Unit::Seconds,
        "Time from dequeue to a launched build/run pipeline"
    );
}
