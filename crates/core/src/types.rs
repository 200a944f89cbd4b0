//! Domain types shared by every layer of the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

// =============================================================================
// Project Kind
// =============================================================================

/// Kind of project a job asks to build and serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    /// Vite project, served by the dev server.
    Vite,
    /// Create-React-App style project, served by `npm start`.
    React,
}

impl ProjectKind {
    /// Port the project listens on inside the sandbox.
    pub fn internal_port(self) -> u16 {
        match self {
            Self::Vite => 5173,
            Self::React => 3000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vite => "vite",
            Self::React => "react",
        }
    }
}

impl fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vite" => Ok(Self::Vite),
            "react" => Ok(Self::React),
            other => Err(Error::invalid_job(format!(
                "unsupported project type '{}' (expected 'vite' or 'react')",
                other
            ))),
        }
    }
}

// =============================================================================
// Job
// =============================================================================

/// Wire form of a job as it travels through the queue.
///
/// Missing fields decode to empty strings so that they are reported as
/// invalid jobs rather than malformed payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub project_type: String,
}

impl JobRequest {
    pub fn new(repo_url: impl Into<String>, project_type: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            project_type: project_type.into(),
        }
    }

    /// Decode a queue payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::malformed_job(e.to_string()))
    }

    /// Encode for the queue.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A validated provisioning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Correlation id used in logs; not part of the wire format.
    pub id: String,
    pub repo_url: String,
    pub project_kind: ProjectKind,
}

const ALLOWED_REPO_SCHEMES: &[&str] = &["http", "https", "ssh", "git"];

impl Job {
    /// Validate a wire request into a job.
    pub fn from_request(request: &JobRequest) -> Result<Self> {
        let repo_url = request.repo_url.trim();
        let project_type = request.project_type.trim();

        if repo_url.is_empty() || project_type.is_empty() {
            return Err(Error::invalid_job(
                "repository URL and project type are required",
            ));
        }

        let project_kind: ProjectKind = project_type.parse()?;

        let parsed = url::Url::parse(repo_url)
            .map_err(|e| Error::invalid_job(format!("invalid repository URL: {}", e)))?;
        if !ALLOWED_REPO_SCHEMES.contains(&parsed.scheme()) {
            return Err(Error::invalid_job(format!(
                "unsupported repository URL scheme '{}'",
                parsed.scheme()
            )));
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            repo_url: repo_url.to_string(),
            project_kind,
        })
    }
}

// =============================================================================
// Sandbox identity
// =============================================================================

/// Name of a sandbox instance (`container_<uuid>`).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SandboxId(pub String);

impl SandboxId {
    /// Generate a fresh sandbox name.
    pub fn generate() -> Self {
        Self(format!("container_{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public URL of a sandbox's tunnel.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TunnelUrl(String);

impl TunnelUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TunnelUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_kind_ports() {
        assert_eq!(ProjectKind::Vite.internal_port(), 5173);
        assert_eq!(ProjectKind::React.internal_port(), 3000);
        assert_eq!("react".parse::<ProjectKind>().unwrap(), ProjectKind::React);
        assert!("angular".parse::<ProjectKind>().is_err());
    }

    #[test]
    fn test_job_request_wire_format() {
        let req = JobRequest::decode(br#"{"repoUrl":"https://example.com/r.git","projectType":"vite"}"#)
            .unwrap();
        assert_eq!(req.repo_url, "https://example.com/r.git");
        assert_eq!(req.project_type, "vite");

        let encoded = String::from_utf8(req.encode().unwrap()).unwrap();
        assert!(encoded.contains("\"repoUrl\""));
        assert!(encoded.contains("\"projectType\""));
    }

    #[test]
    fn test_missing_fields_are_invalid_not_malformed() {
        let req = JobRequest::decode(br#"{"repoUrl":"https://example.com/r.git"}"#).unwrap();
        let err = Job::from_request(&req).unwrap_err();
        assert!(matches!(err, Error::InvalidJob(_)));

        let err = JobRequest::decode(b"not json").unwrap_err();
        assert!(matches!(err, Error::MalformedJob(_)));
    }

    #[test]
    fn test_job_validation() {
        let job = Job::from_request(&JobRequest::new("https://example.com/r.git", "vite")).unwrap();
        assert_eq!(job.project_kind, ProjectKind::Vite);

        let err = Job::from_request(&JobRequest::new("https://example.com/r.git", "unknown"));
        assert!(matches!(err, Err(Error::InvalidJob(_))));

        let err = Job::from_request(&JobRequest::new("file:///etc/passwd", "vite"));
        assert!(matches!(err, Err(Error::InvalidJob(_))));

        let err = Job::from_request(&JobRequest::new("not a url", "react"));
        assert!(matches!(err, Err(Error::InvalidJob(_))));
    }

    #[test]
    fn test_sandbox_id_shape() {
        let id = SandboxId::generate();
        assert!(id.as_str().starts_with("container_"));
        assert_ne!(id, SandboxId::generate());
    }
}
