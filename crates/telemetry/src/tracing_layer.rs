//! Log and trace subscriber configuration.

use launchpad_core::{config::TelemetryConfig, Error, Result};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info,launchpad=debug";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default filter. Spans are exported over OTLP
/// when `otlp_endpoint` is set.
pub fn configure_tracing(config: &TelemetryConfig) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()),
    );

    // Exactly one of these is Some.
    let json_layer = config
        .json_logs
        .then(|| tracing_subscriber::fmt::layer().json().with_current_span(true));
    let fmt_layer = (!config.json_logs).then(tracing_subscriber::fmt::layer);

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint.clone()),
                )
                .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", config.service_name.clone()),
                ])))
                .install_batch(runtime::Tokio)
                .map_err(|e| {
                    Error::telemetry(format!("Failed to install OTLP pipeline: {}", e))
                })?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| Error::telemetry(format!("Failed to install subscriber: {}", e)))?;

    if let Some(endpoint) = &config.otlp_endpoint {
        tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_an_error() {
        let config = TelemetryConfig {
            json_logs: true,
            otlp_endpoint: None,
            service_name: "launchpad-test".into(),
        };
        configure_tracing(&config).unwrap();
        assert!(matches!(configure_tracing(&config), Err(Error::Telemetry(_))));
    }
}
