use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::SandboxId;

/// Combined stdout/stderr of a command, chunk by chunk.
pub type OutputStream = BoxStream<'static, Result<Bytes>>;

/// Everything the runtime needs to create a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub name: SandboxId,
    pub image: String,
    /// Port exposed inside the sandbox.
    pub internal_port: u16,
    /// Host port the internal port is published on.
    pub host_port: u16,
    pub network: String,
    pub workdir: String,
    /// Long-running placeholder process keeping the sandbox alive.
    pub command: Vec<String>,
}

/// A command started inside a sandbox.
pub struct ExecHandle {
    /// Runtime id of the exec, used to query its exit code.
    pub exec_id: String,
    pub output: OutputStream,
}

impl std::fmt::Debug for ExecHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecHandle")
            .field("exec_id", &self.exec_id)
            .finish_non_exhaustive()
    }
}

/// Container runtime contract: create, start, exec with streamed output.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Create (but do not start) a sandbox.
    async fn create(&self, spec: &SandboxSpec) -> Result<()>;

    /// Start a created sandbox.
    async fn start(&self, id: &SandboxId) -> Result<()>;

    /// Run `sh -c <command>` inside the sandbox, attached to stdout and stderr.
    async fn exec(&self, id: &SandboxId, command: &str) -> Result<ExecHandle>;

    /// Exit code of a finished exec, `None` while still running or unknown.
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>>;

    /// Stop and remove the sandbox.
    async fn destroy(&self, id: &SandboxId) -> Result<()>;

    /// Check if the runtime backend is reachable.
    async fn is_available(&self) -> bool;
}
