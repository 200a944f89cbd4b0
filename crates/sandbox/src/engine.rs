//! Sandbox runtime backends.
//!
//! `DockerRuntime` drives a local Docker daemon through `bollard`;
//! `MockRuntime` is a scripted in-memory stand-in for tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use launchpad_core::{
    traits::{ExecHandle, SandboxRuntime, SandboxSpec},
    Error, Result, SandboxId,
};

/// Label applied to every container we create.
const MANAGED_BY_LABEL: &str = "managed-by";
const MANAGED_BY_VALUE: &str = "launchpad";

// =============================================================================
// Docker Runtime
// =============================================================================

/// Docker-backed runtime using the `bollard` crate.
pub struct DockerRuntime {
    docker: bollard::Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            Error::runtime(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;
        Ok(Self { docker })
    }

    /// Create from an existing bollard Docker client.
    pub fn from_client(docker: bollard::Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn create(&self, spec: &SandboxSpec) -> Result<()> {
        use bollard::container::{Config, CreateContainerOptions};
        use bollard::models::{HostConfig, PortBinding};

        let port_key = format!("{}/tcp", spec.internal_port);

        let host_config = HostConfig {
            port_bindings: Some(HashMap::from([(
                port_key.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(spec.host_port.to_string()),
                }]),
            )])),
            network_mode: Some(spec.network.clone()),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            tty: Some(true),
            working_dir: Some(spec.workdir.clone()),
            exposed_ports: Some(HashMap::from([(port_key, HashMap::new())])),
            host_config: Some(host_config),
            labels: Some(HashMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGED_BY_VALUE.to_string(),
            )])),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.0.clone(),
            platform: None,
        };

        self.docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| Error::sandbox_create(e.to_string()))?;

        tracing::info!(
            sandbox = %spec.name,
            image = %spec.image,
            internal_port = spec.internal_port,
            host_port = spec.host_port,
            network = %spec.network,
            "Sandbox container created"
        );
        Ok(())
    }

    async fn start(&self, id: &SandboxId) -> Result<()> {
        self.docker
            .start_container::<String>(&id.0, None)
            .await
            .map_err(|e| Error::sandbox_start(e.to_string()))?;

        tracing::info!(sandbox = %id, "Sandbox container started");
        Ok(())
    }

    async fn exec(&self, id: &SandboxId, command: &str) -> Result<ExecHandle> {
        use bollard::exec::{CreateExecOptions, StartExecResults};

        let exec_options = CreateExecOptions {
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&id.0, exec_options)
            .await
            .map_err(|e| Error::runtime(format!("Failed to create exec in sandbox: {}", e)))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::runtime(format!("Failed to start exec in sandbox: {}", e)))?;

        match started {
            StartExecResults::Attached { output, .. } => {
                let output = output
                    .map(|item| {
                        item.map(|log| log.into_bytes())
                            .map_err(|e| Error::runtime(format!("Sandbox output error: {}", e)))
                    })
                    .boxed();
                Ok(ExecHandle {
                    exec_id: exec.id,
                    output,
                })
            }
            StartExecResults::Detached => Err(Error::runtime(
                "Exec started detached; output is not available",
            )),
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        let inspect = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| Error::runtime(format!("Failed to inspect exec result: {}", e)))?;

        if inspect.running.unwrap_or(false) {
            return Ok(None);
        }
        Ok(inspect.exit_code)
    }

    async fn destroy(&self, id: &SandboxId) -> Result<()> {
        use bollard::container::{RemoveContainerOptions, StopContainerOptions};

        // Stop the container (with 5s grace period)
        let _ = self
            .docker
            .stop_container(&id.0, Some(StopContainerOptions { t: 5 }))
            .await;

        self.docker
            .remove_container(
                &id.0,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| Error::runtime(format!("Failed to remove sandbox container: {}", e)))?;

        tracing::info!(sandbox = %id, "Sandbox container destroyed");
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

// =============================================================================
// Mock Runtime (for testing without Docker)
// =============================================================================

/// Output script for one kind of exec.
#[derive(Clone, Default)]
struct ExecScript {
    chunks: Vec<Bytes>,
    exit_code: Option<i64>,
    hang: bool,
}

#[derive(Default)]
struct MockState {
    created: Vec<SandboxSpec>,
    started: Vec<SandboxId>,
    destroyed: Vec<SandboxId>,
    commands: Vec<(SandboxId, String)>,
    exit_codes: HashMap<String, Option<i64>>,
}

/// In-memory runtime that replays scripted output.
///
/// Commands that launch `cloudflared` get the tunnel script; everything else
/// gets the build script.
pub struct MockRuntime {
    tunnel: ExecScript,
    build: ExecScript,
    fail_create: bool,
    fail_start: bool,
    // Remaining destroy calls that fail.
    fail_destroy: AtomicUsize,
    state: Mutex<MockState>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self {
            tunnel: ExecScript {
                chunks: vec![
                    "INF Requesting new quick Tunnel on trycloudflare.com...\n".into(),
                    "INF |  https://quiet-river-demo.trycloudflare.com  |\n".into(),
                ],
                exit_code: None,
                hang: false,
            },
            build: ExecScript {
                chunks: vec![
                    "Cloning into '/app'...\n".into(),
                    "added 120 packages in 3s\n".into(),
                    "VITE ready in 312 ms\n".into(),
                ],
                exit_code: Some(0),
                hang: false,
            },
            fail_create: false,
            fail_start: false,
            fail_destroy: AtomicUsize::new(0),
            state: Mutex::new(MockState::default()),
        }
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tunnel process output.
    pub fn with_tunnel_output(mut self, chunks: Vec<&str>) -> Self {
        self.tunnel.chunks = chunks.into_iter().map(|c| Bytes::from(c.to_string())).collect();
        self
    }

    /// Replace the build/run output and its exit code.
    pub fn with_build_output(self, chunks: Vec<&str>, exit_code: i64) -> Self {
        let chunks = chunks.into_iter().map(|c| Bytes::from(c.to_string())).collect();
        self.with_build_bytes(chunks, exit_code)
    }

    /// Replace the build/run output with raw byte chunks.
    pub fn with_build_bytes(mut self, chunks: Vec<Bytes>, exit_code: i64) -> Self {
        self.build.chunks = chunks;
        self.build.exit_code = Some(exit_code);
        self
    }

    /// Keep the build/run stream open after its output, like a live server.
    pub fn with_hanging_build(mut self) -> Self {
        self.build.hang = true;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Fail the next `times` destroy calls, as if the container would not stop.
    pub fn failing_destroy(self, times: usize) -> Self {
        self.fail_destroy.store(times, Ordering::SeqCst);
        self
    }

    pub fn created(&self) -> Vec<SandboxSpec> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn started(&self) -> Vec<SandboxId> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn destroyed(&self) -> Vec<SandboxId> {
        self.state.lock().unwrap().destroyed.clone()
    }

    /// Every command run through `exec`, in order.
    pub fn commands(&self) -> Vec<(SandboxId, String)> {
        self.state.lock().unwrap().commands.clone()
    }
}

#[async_trait]
impl SandboxRuntime for MockRuntime {
    async fn create(&self, spec: &SandboxSpec) -> Result<()> {
        if self.fail_create {
            return Err(Error::sandbox_create("mock: image not found"));
        }
        self.state.lock().unwrap().created.push(spec.clone());
        Ok(())
    }

    async fn start(&self, id: &SandboxId) -> Result<()> {
        if self.fail_start {
            return Err(Error::sandbox_start("mock: port already allocated"));
        }
        self.state.lock().unwrap().started.push(id.clone());
        Ok(())
    }

    async fn exec(&self, id: &SandboxId, command: &str) -> Result<ExecHandle> {
        let script = if command.starts_with("cloudflared") {
            self.tunnel.clone()
        } else {
            self.build.clone()
        };

        let exec_id = format!("mock-exec-{}", uuid::Uuid::new_v4());
        {
            let mut state = self.state.lock().unwrap();
            state.commands.push((id.clone(), command.to_string()));
            state.exit_codes.insert(exec_id.clone(), script.exit_code);
        }

        let chunks = futures::stream::iter(
            script
                .chunks
                .into_iter()
                .map(Ok)
                .collect::<Vec<Result<Bytes>>>(),
        );
        let output = if script.hang {
            chunks.chain(futures::stream::pending()).boxed()
        } else {
            chunks.boxed()
        };

        Ok(ExecHandle { exec_id, output })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .exit_codes
            .get(exec_id)
            .copied()
            .flatten())
    }

    async fn destroy(&self, id: &SandboxId) -> Result<()> {
        let failing = self
            .fail_destroy
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::runtime("mock: container did not stop"));
        }
        self.state.lock().unwrap().destroyed.push(id.clone());
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
