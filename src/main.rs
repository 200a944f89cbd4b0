#![deny(unused)]
//! Launchpad - on-demand development sandboxes
//!
//! Accepts repository submissions, provisions a Docker sandbox per job,
//! exposes it through a Cloudflare quick tunnel and streams the build
//! output to connected observers.

use std::sync::Arc;

use launchpad_controller::{IntakeGate, IntakeLoop};
use launchpad_core::{config::AppConfig, traits::SandboxRuntime, EventHub};
use launchpad_gateway::{GatewayConfig, GatewayServer};
use launchpad_sandbox::{DockerRuntime, SandboxManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // Initialize tracing
    launchpad_telemetry::configure_tracing(&config.telemetry)?;
    let metrics_handle = launchpad_telemetry::setup_metrics_recorder()?;

    tracing::info!("Starting Launchpad v{}", env!("CARGO_PKG_VERSION"));

    // =========================================================================
    // Queue & event hub
    // =========================================================================
    let queue = launchpad_store::connect(&config.queue).await?;
    let hub = EventHub::new();
    let gate = IntakeGate::new();

    // =========================================================================
    // Sandbox runtime
    // =========================================================================
    let runtime: Option<Arc<dyn SandboxRuntime>> = match DockerRuntime::new() {
        Ok(engine) => {
            if engine.is_available().await {
                tracing::info!("Docker runtime available");
                Some(Arc::new(engine))
            } else {
                tracing::warn!("Docker daemon not reachable; jobs will stay queued");
                None
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Docker not available; jobs will stay queued");
            None
        }
    };

    let manager = runtime.map(|runtime| {
        Arc::new(SandboxManager::new(
            runtime,
            Arc::new(hub.clone()),
            config.sandbox.clone(),
        ))
    });

    // =========================================================================
    // Intake loop & reaper
    // =========================================================================
    let intake = match &manager {
        Some(manager) => {
            let _reaper = manager.clone().spawn_reaper();
            let intake = IntakeLoop::new(queue.clone(), manager.clone(), gate.clone());
            tracing::info!(
                queue = %config.queue.name,
                start_port = config.sandbox.start_port,
                max_ports = config.sandbox.max_ports,
                "Intake loop initialized"
            );
            Some(tokio::spawn(async move { intake.run().await }))
        }
        None => None,
    };

    // =========================================================================
    // Gateway
    // =========================================================================
    let mut server = GatewayServer::new(GatewayConfig::from(&config.server), queue, hub)
        .with_gate(gate.clone())
        .with_metrics(metrics_handle);
    if let Some(manager) = &manager {
        server = server.with_manager(manager.clone());
    }

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Gateway initialized"
    );

    let intake_done = async {
        match intake {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = server.run() => result?,
        result = intake_done => {
            result??;
            tracing::warn!("Intake loop stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    gate.close();
    Ok(())
}
