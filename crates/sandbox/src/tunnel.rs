//! Public tunnel discovery.
//!
//! Starts `cloudflared` inside a running sandbox and scrapes the quick-tunnel
//! URL from its output. The scraping strategy sits behind [`UrlDiscovery`] so
//! it can change without touching the lifecycle manager.

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use std::sync::{Arc, LazyLock};

use launchpad_core::{
    traits::{OutputStream, SandboxRuntime},
    Error, Result, SandboxId, TunnelUrl,
};

static TRYCLOUDFLARE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.trycloudflare\.com")
        .expect("trycloudflare pattern is valid")
});

/// Command that opens a quick tunnel to `port` inside the sandbox.
pub fn tunnel_command(port: u16) -> String {
    format!("cloudflared tunnel --url http://localhost:{}", port)
}

/// Extracts a public URL from a process output stream.
#[async_trait]
pub trait UrlDiscovery: Send + Sync {
    async fn discover(&self, output: OutputStream) -> Result<TunnelUrl>;
}

/// Progress of a discovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelState {
    Running,
    Found(TunnelUrl),
    Terminated,
}

/// Line-oriented scanner for `https://<token>.trycloudflare.com` URLs.
///
/// Chunks may split lines anywhere; a trailing line without a newline is
/// still checked when the stream ends.
pub struct LineScanner {
    buffer: String,
    state: TunnelState,
}

impl Default for LineScanner {
    fn default() -> Self {
        Self {
            buffer: String::new(),
            state: TunnelState::Running,
        }
    }
}

impl LineScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TunnelState {
        &self.state
    }

    /// Feed a chunk of output. Returns the state after consuming it.
    pub fn feed(&mut self, chunk: &[u8]) -> &TunnelState {
        if self.state != TunnelState::Running {
            return &self.state;
        }
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            tracing::trace!(line = %line.trim_end(), "cloudflared");
            if let Some(url) = match_line(&line) {
                self.state = TunnelState::Found(url);
                self.buffer.clear();
                break;
            }
        }
        &self.state
    }

    /// Signal end of output.
    pub fn finish(&mut self) -> &TunnelState {
        if self.state == TunnelState::Running {
            self.state = match match_line(&self.buffer) {
                Some(url) => TunnelState::Found(url),
                None => TunnelState::Terminated,
            };
            self.buffer.clear();
        }
        &self.state
    }
}

fn match_line(line: &str) -> Option<TunnelUrl> {
    TRYCLOUDFLARE_URL
        .find(line)
        .map(|m| TunnelUrl::new(m.as_str()))
}

/// Discovery for Cloudflare quick tunnels.
#[derive(Default)]
pub struct TryCloudflareDiscovery;

#[async_trait]
impl UrlDiscovery for TryCloudflareDiscovery {
    async fn discover(&self, mut output: OutputStream) -> Result<TunnelUrl> {
        let mut scanner = LineScanner::new();

        while let Some(chunk) = output.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(error = %e, "Tunnel output stream failed");
                    break;
                }
            };

            if let TunnelState::Found(url) = scanner.feed(&chunk) {
                let url = url.clone();
                // The tunnel keeps running; keep its output drained.
                tokio::spawn(async move { while output.next().await.is_some() {} });
                return Ok(url);
            }
        }

        match scanner.finish() {
            TunnelState::Found(url) => Ok(url.clone()),
            _ => Err(Error::TunnelNotFound),
        }
    }
}

/// Opens a tunnel for a sandbox port and waits for its public URL.
pub struct TunnelDiscovery {
    runtime: Arc<dyn SandboxRuntime>,
    strategy: Arc<dyn UrlDiscovery>,
}

impl TunnelDiscovery {
    pub fn new(runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self {
            runtime,
            strategy: Arc::new(TryCloudflareDiscovery),
        }
    }

    /// Swap the URL matching strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn UrlDiscovery>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Start the tunnel process and resolve its URL.
    ///
    /// No timeout: this waits until a URL shows up or the process exits.
    pub async fn open(&self, sandbox: &SandboxId, internal_port: u16) -> Result<TunnelUrl> {
        let command = tunnel_command(internal_port);
        tracing::info!(sandbox = %sandbox, command = %command, "Starting tunnel");

        let exec = self.runtime.exec(sandbox, &command).await?;
        let url = self.strategy.discover(exec.output).await?;

        tracing::info!(sandbox = %sandbox, tunnel_url = %url, "Tunnel available");
        Ok(url)
    }
}
