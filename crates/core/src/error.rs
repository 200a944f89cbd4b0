//! Error types for launchpad.

use thiserror::Error;

/// Result type alias using launchpad's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for launchpad.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Job Errors
    // =========================================================================
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Malformed job payload: {0}")]
    MalformedJob(String),

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    #[error("No host ports available")]
    PortsExhausted,

    #[error("Failed to create sandbox: {0}")]
    SandboxCreate(String),

    #[error("Failed to start sandbox: {0}")]
    SandboxStart(String),

    #[error("Tunnel process ended before a public URL was found")]
    TunnelNotFound,

    #[error("Sandbox not found: {0}")]
    SandboxNotFound(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Sandbox runtime error: {0}")]
    Runtime(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl Error {
    /// Create an invalid job error.
    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    /// Create a malformed job error.
    pub fn malformed_job(msg: impl Into<String>) -> Self {
        Self::MalformedJob(msg.into())
    }

    /// Create a sandbox creation error.
    pub fn sandbox_create(msg: impl Into<String>) -> Self {
        Self::SandboxCreate(msg.into())
    }

    /// Create a sandbox start error.
    pub fn sandbox_start(msg: impl Into<String>) -> Self {
        Self::SandboxStart(msg.into())
    }

    /// Create a runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create a queue error.
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    /// Create a gateway error.
    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a telemetry error.
    pub fn telemetry(msg: impl Into<String>) -> Self {
        Self::Telemetry(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failure is transient, i.e. the same job could succeed later.
    ///
    /// Nothing retries automatically; the intake loop logs this.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PortsExhausted | Self::Queue(_))
    }

    /// Short stable label, used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidJob(_) => "invalid_job",
            Self::MalformedJob(_) => "malformed_job",
            Self::PortsExhausted => "ports_exhausted",
            Self::SandboxCreate(_) => "sandbox_create",
            Self::SandboxStart(_) => "sandbox_start",
            Self::TunnelNotFound => "tunnel_not_found",
            Self::SandboxNotFound(_) => "sandbox_not_found",
            Self::Runtime(_) => "runtime",
            Self::Queue(_) => "queue",
            Self::Gateway(_) => "gateway",
            Self::Config(_) => "config",
            Self::Telemetry(_) => "telemetry",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::PortsExhausted.is_retryable());
        assert!(!Error::TunnelNotFound.is_retryable());
        assert!(!Error::invalid_job("missing repoUrl").is_retryable());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Error::PortsExhausted.kind(), "ports_exhausted");
        assert_eq!(Error::sandbox_start("boom").kind(), "sandbox_start");
        assert_eq!(Error::malformed_job("eof").kind(), "malformed_job");
    }

    #[test]
    fn test_config_errors_convert() {
        let err: Error = config::ConfigError::Message("bad port".into()).into();
        assert!(matches!(&err, Error::Config(msg) if msg == "bad port"));
        assert_eq!(err.kind(), "config");
    }
}
