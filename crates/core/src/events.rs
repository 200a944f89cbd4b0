use serde::{Deserialize, Serialize};

/// Greeting sent to every observer as soon as it subscribes.
pub const CONNECTION_MESSAGE: &str = "Connected to SSE";

/// Event fanned out to observers.
///
/// Serializes to the `{type, message}` frame observers consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "lowercase")]
pub enum PipelineEvent {
    /// Stream is live. Only ever sent by the hub on subscribe.
    Connection(String),
    /// Public URL of a freshly provisioned sandbox.
    Tunnel(String),
    /// Raw build/run output, forwarded verbatim.
    Logs(String),
    /// Build/run pipeline finished.
    Status(String),
}

impl PipelineEvent {
    pub fn connection() -> Self {
        Self::Connection(CONNECTION_MESSAGE.to_string())
    }

    pub fn tunnel(url: impl Into<String>) -> Self {
        Self::Tunnel(url.into())
    }

    pub fn logs(text: impl Into<String>) -> Self {
        Self::Logs(text.into())
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self::Status(text.into())
    }

    /// Event kind as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Tunnel(_) => "tunnel",
            Self::Logs(_) => "logs",
            Self::Status(_) => "status",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Connection(m) | Self::Tunnel(m) | Self::Logs(m) | Self::Status(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_shape() {
        let json = serde_json::to_value(PipelineEvent::tunnel("https://a-b.trycloudflare.com")).unwrap();
        assert_eq!(json["type"], "tunnel");
        assert_eq!(json["message"], "https://a-b.trycloudflare.com");

        let json = serde_json::to_value(PipelineEvent::connection()).unwrap();
        assert_eq!(json["type"], "connection");
        assert_eq!(json["message"], CONNECTION_MESSAGE);
    }

    #[test]
    fn test_kind_matches_tag() {
        for event in [
            PipelineEvent::connection(),
            PipelineEvent::tunnel("u"),
            PipelineEvent::logs("l"),
            PipelineEvent::status("s"),
        ] {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.kind());
        }
    }
}
