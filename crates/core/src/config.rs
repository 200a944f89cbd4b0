use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub sandbox: SandboxSettings,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub url: String,
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SandboxSettings {
    pub image: String,
    pub network: String,
    pub workdir: String,
    pub start_port: u16,
    pub max_ports: u16,
    /// Lifetime of a provisioned sandbox before the reaper removes it.
    pub ttl_secs: u64,
    pub reap_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TelemetryConfig {
    pub json_logs: bool,
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let env = std::env::var("LAUNCHPAD_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map LAUNCHPAD__SANDBOX__MAX_PORTS=20 to sandbox.max_ports
            .add_source(
                Environment::with_prefix("LAUNCHPAD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sandbox.max_ports == 0 {
            return Err(Error::config("sandbox.max_ports must be at least 1"));
        }
        if u32::from(self.sandbox.start_port) + u32::from(self.sandbox.max_ports) > u32::from(u16::MAX) + 1 {
            return Err(Error::config(format!(
                "port range {}+{} exceeds 65535",
                self.sandbox.start_port, self.sandbox.max_ports
            )));
        }
        if self.queue.name.trim().is_empty() {
            return Err(Error::config("queue.name must not be empty"));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 3001,
                allowed_origins: vec!["*".into()],
            },
            queue: QueueConfig::default(),
            sandbox: SandboxSettings::default(),
            telemetry: TelemetryConfig {
                json_logs: false,
                otlp_endpoint: None,
                service_name: "launchpad".into(),
            },
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            url: "redis://127.0.0.1:6379".into(),
            name: "project_queue".into(),
        }
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: "custom-node-cloudflared".into(),
            network: "my_custom_network".into(),
            workdir: "/app".into(),
            start_port: 3005,
            max_ports: 10,
            ttl_secs: 3600,
            reap_interval_secs: 60,
        }
    }
}
