//! Sandbox lifecycle manager.
//!
//! Drives one job from validation to a running, publicly reachable sandbox:
//! lease a host port, create and start the sandbox, open the tunnel, announce
//! it, then launch the build/run pipeline. Provisioned sandboxes are tracked
//! with their port lease until they are stopped or their TTL runs out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use launchpad_core::{
    config::SandboxSettings,
    traits::{EventSink, SandboxRuntime, SandboxSpec},
    Error, Job, JobRequest, PipelineEvent, ProjectKind, Result, SandboxId, TunnelUrl,
};

use crate::build::{BuildOutcome, BuildRunner};
use crate::ports::{PortAllocator, PortLease};
use crate::tunnel::TunnelDiscovery;

/// Placeholder process that keeps an idle sandbox alive for later execs.
const IDLE_COMMAND: &str = "while true; do sleep 1000; done";

/// Result of a successful provisioning run.
#[derive(Debug)]
pub struct Provisioned {
    pub sandbox: SandboxId,
    pub host_port: u16,
    pub tunnel_url: TunnelUrl,
    /// Resolves when the build/run pipeline ends.
    pub build: JoinHandle<BuildOutcome>,
}

/// Public view of a tracked sandbox.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInfo {
    pub name: String,
    pub host_port: u16,
    pub tunnel_url: TunnelUrl,
    pub project_type: ProjectKind,
    pub repo_url: String,
    pub created_at: DateTime<Utc>,
}

struct ActiveSandbox {
    info: SandboxInfo,
    expires_at: Instant,
    build: AbortHandle,
    // Released when the entry is dropped.
    _lease: PortLease,
}

/// Creates, exposes and tears down sandboxes.
pub struct SandboxManager {
    runtime: Arc<dyn SandboxRuntime>,
    sink: Arc<dyn EventSink>,
    ports: PortAllocator,
    tunnels: TunnelDiscovery,
    builder: BuildRunner,
    settings: SandboxSettings,
    active: Mutex<HashMap<SandboxId, ActiveSandbox>>,
    // Sandboxes abandoned mid-provisioning whose removal failed.
    stranded: Mutex<Vec<(SandboxId, PortLease)>>,
}

impl SandboxManager {
    /// Create a manager with a port pool built from `settings`.
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        sink: Arc<dyn EventSink>,
        settings: SandboxSettings,
    ) -> Self {
        let ports = PortAllocator::new(settings.start_port, settings.max_ports);
        Self {
            tunnels: TunnelDiscovery::new(runtime.clone()),
            builder: BuildRunner::new(runtime.clone(), sink.clone(), settings.workdir.clone()),
            runtime,
            sink,
            ports,
            settings,
            active: Mutex::new(HashMap::new()),
            stranded: Mutex::new(Vec::new()),
        }
    }

    /// Replace the tunnel discovery (e.g. a different URL strategy).
    pub fn with_tunnels(mut self, tunnels: TunnelDiscovery) -> Self {
        self.tunnels = tunnels;
        self
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Check if the sandbox runtime is reachable.
    pub async fn is_available(&self) -> bool {
        self.runtime.is_available().await
    }

    fn spec_for(&self, name: &SandboxId, kind: ProjectKind, host_port: u16) -> SandboxSpec {
        SandboxSpec {
            name: name.clone(),
            image: self.settings.image.clone(),
            internal_port: kind.internal_port(),
            host_port,
            network: self.settings.network.clone(),
            workdir: self.settings.workdir.clone(),
            command: vec!["sh".into(), "-c".into(), IDLE_COMMAND.into()],
        }
    }

    /// Run the full provisioning sequence for one job request.
    ///
    /// Returns once the tunnel is announced and the build/run pipeline has
    /// been launched; the pipeline's output keeps streaming in the background.
    pub async fn provision(&self, request: &JobRequest) -> Result<Provisioned> {
        let started = std::time::Instant::now();
        let job = Job::from_request(request)?;
        let lease = self.ports.lease()?;
        let host_port = lease.port();
        let sandbox = SandboxId::generate();
        let kind = job.project_kind;

        tracing::info!(
            job_id = %job.id,
            sandbox = %sandbox,
            host_port,
            project_type = %kind,
            "Provisioning sandbox"
        );

        let spec = self.spec_for(&sandbox, kind, host_port);
        self.runtime.create(&spec).await.map_err(|e| match e {
            Error::SandboxCreate(_) => e,
            other => Error::sandbox_create(other.to_string()),
        })?;

        if let Err(e) = self.runtime.start(&sandbox).await {
            self.discard(&sandbox, lease).await;
            return Err(match e {
                Error::SandboxStart(_) => e,
                other => Error::sandbox_start(other.to_string()),
            });
        }
        tracing::info!(sandbox = %sandbox, host_port, "Sandbox started");

        let tunnel_url = match self.tunnels.open(&sandbox, kind.internal_port()).await {
            Ok(url) => url,
            Err(e) => {
                self.discard(&sandbox, lease).await;
                return Err(e);
            }
        };

        self.sink.publish(PipelineEvent::tunnel(tunnel_url.as_str()));
        self.sink.publish(PipelineEvent::logs(format!(
            "Access it at {}. Note: the server takes a couple of minutes to spin up.",
            tunnel_url
        )));

        let exec = match self.builder.start(&sandbox, &job).await {
            Ok(exec) => exec,
            Err(e) => {
                self.discard(&sandbox, lease).await;
                return Err(e);
            }
        };

        let build = {
            let builder = self.builder.clone();
            let sink = self.sink.clone();
            let sandbox = sandbox.clone();
            let tunnel_url = tunnel_url.clone();
            tokio::spawn(async move {
                let outcome = builder.forward(&sandbox, exec, &tunnel_url).await;
                sink.publish(PipelineEvent::status(outcome.summary()));
                outcome
            })
        };

        let info = SandboxInfo {
            name: sandbox.0.clone(),
            host_port,
            tunnel_url: tunnel_url.clone(),
            project_type: kind,
            repo_url: job.repo_url.clone(),
            created_at: Utc::now(),
        };
        self.active.lock().await.insert(
            sandbox.clone(),
            ActiveSandbox {
                info,
                expires_at: Instant::now() + Duration::from_secs(self.settings.ttl_secs),
                build: build.abort_handle(),
                _lease: lease,
            },
        );

        metrics::histogram!("launchpad_provision_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            job_id = %job.id,
            sandbox = %sandbox,
            host_port,
            tunnel_url = %tunnel_url,
            "Sandbox provisioned"
        );

        Ok(Provisioned {
            sandbox,
            host_port,
            tunnel_url,
            build,
        })
    }

    /// Remove a sandbox that never made it to the registry.
    ///
    /// The port stays leased until removal succeeds; the reaper retries.
    async fn discard(&self, sandbox: &SandboxId, lease: PortLease) {
        if let Err(e) = self.runtime.destroy(sandbox).await {
            tracing::warn!(
                sandbox = %sandbox,
                host_port = lease.port(),
                error = %e,
                "Failed to remove abandoned sandbox"
            );
            self.stranded.lock().await.push((sandbox.clone(), lease));
        }
    }

    async fn retry_stranded(&self) {
        let stranded = std::mem::take(&mut *self.stranded.lock().await);
        for (sandbox, lease) in stranded {
            self.discard(&sandbox, lease).await;
        }
    }

    /// Sandboxes currently tracked, oldest first.
    pub async fn list(&self) -> Vec<SandboxInfo> {
        let mut sandboxes: Vec<SandboxInfo> = self
            .active
            .lock()
            .await
            .values()
            .map(|active| active.info.clone())
            .collect();
        sandboxes.sort_by_key(|info| info.created_at);
        sandboxes
    }

    /// Stop a provisioned sandbox and return its port to the pool.
    ///
    /// If the runtime cannot remove the sandbox, it stays tracked with its
    /// port leased and the reaper retries on its next pass.
    pub async fn teardown(&self, sandbox: &SandboxId) -> Result<()> {
        let active = self
            .active
            .lock()
            .await
            .remove(sandbox)
            .ok_or_else(|| Error::SandboxNotFound(sandbox.to_string()))?;
        self.stop(sandbox, active).await
    }

    async fn stop(&self, sandbox: &SandboxId, mut active: ActiveSandbox) -> Result<()> {
        active.build.abort();
        if let Err(e) = self.runtime.destroy(sandbox).await {
            tracing::warn!(
                sandbox = %sandbox,
                host_port = active.info.host_port,
                error = %e,
                "Sandbox removal failed; keeping its port leased"
            );
            active.expires_at = Instant::now();
            self.active.lock().await.insert(sandbox.clone(), active);
            return Err(e);
        }
        tracing::info!(
            sandbox = %sandbox,
            host_port = active.info.host_port,
            "Sandbox torn down"
        );
        Ok(())
    }

    /// Tear down every sandbox whose TTL has passed. Returns how many were removed.
    pub async fn reap_expired(&self) -> usize {
        self.retry_stranded().await;
        let now = Instant::now();
        let expired: Vec<(SandboxId, ActiveSandbox)> = {
            let mut active = self.active.lock().await;
            let ids: Vec<SandboxId> = active
                .iter()
                .filter(|(_, entry)| entry.expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| active.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let mut reaped = 0;
        for (sandbox, entry) in expired {
            match self.stop(&sandbox, entry).await {
                Ok(()) => reaped += 1,
                Err(e) => {
                    tracing::warn!(sandbox = %sandbox, error = %e, "Failed to reap expired sandbox")
                }
            }
        }
        if reaped > 0 {
            tracing::info!(reaped, "Expired sandboxes reclaimed");
        }
        reaped
    }

    /// Periodically reclaim expired sandboxes.
    pub fn spawn_reaper(self: Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.settings.reap_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.reap_expired().await;
            }
        })
    }
}
