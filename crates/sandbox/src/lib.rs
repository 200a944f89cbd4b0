#![deny(unused)]
//! Sandbox provisioning for launchpad.
//!
//! This crate turns a job into a running, publicly reachable sandbox.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  SandboxManager (provision / teardown) │
//! │    ↓ leases          ↓ composes        │
//! ├───────────────┬────────────────────────┤
//! │ PortAllocator │ TunnelDiscovery        │
//! │               │ BuildRunner            │
//! ├───────────────┴────────────────────────┤
//! │  SandboxRuntime (DockerRuntime)        │
//! │    ↓ Docker API via bollard            │
//! ├────────────────────────────────────────┤
//! │  Container (custom-node-cloudflared)   │
//! │    cloudflared → localhost:<port>      │
//! │    git clone / npm install / serve     │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use launchpad_sandbox::{DockerRuntime, SandboxManager};
//!
//! let runtime = Arc::new(DockerRuntime::new()?);
//! let manager = Arc::new(SandboxManager::new(runtime, hub, config.sandbox));
//! let provisioned = manager.provision(&request).await?;
//! println!("{}", provisioned.tunnel_url);
//! ```

pub mod build;
pub mod engine;
pub mod manager;
pub mod ports;
pub mod tunnel;

pub use build::{build_command, BuildOutcome, BuildRunner};
pub use engine::{DockerRuntime, MockRuntime};
pub use manager::{Provisioned, SandboxInfo, SandboxManager};
pub use ports::{PortAllocator, PortLease};
pub use tunnel::{TryCloudflareDiscovery, TunnelDiscovery, UrlDiscovery};
