//! Axum-based HTTP server for the gateway.

use axum::{
    extract::{Json, Path, State},
    http::{HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Router,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use launchpad_controller::IntakeGate;
use launchpad_core::{
    config::ServerConfig,
    traits::JobQueue,
    Error, EventHub, JobRequest, PipelineEvent, Result, SandboxId,
};
use launchpad_sandbox::{SandboxInfo, SandboxManager};

/// Returned when a submission lacks either field.
pub const MISSING_FIELDS: &str = "Repository URL and project type are required";

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Origins allowed by CORS; `"*"` allows any.
    pub allowed_origins: Vec<String>,
    /// Enable request tracing.
    pub enable_tracing: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            allowed_origins: vec!["*".to_string()],
            enable_tracing: true,
        }
    }
}

impl From<&ServerConfig> for GatewayConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            allowed_origins: server.allowed_origins.clone(),
            enable_tracing: true,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Queue that submissions are published to.
    pub queue: Arc<dyn JobQueue>,
    /// Observer registry for the event stream.
    pub hub: EventHub,
    /// Lifecycle manager (absent when this process only accepts submissions).
    pub manager: Option<Arc<SandboxManager>>,
    /// Intake gate, reported as `busy` by the health check.
    pub gate: Option<IntakeGate>,
}

/// Gateway server.
pub struct GatewayServer {
    config: GatewayConfig,
    state: AppState,
    metrics_handle: Option<PrometheusHandle>,
}

impl GatewayServer {
    /// Create a new gateway server.
    pub fn new(config: GatewayConfig, queue: Arc<dyn JobQueue>, hub: EventHub) -> Self {
        Self {
            config,
            state: AppState {
                queue,
                hub,
                manager: None,
                gate: None,
            },
            metrics_handle: None,
        }
    }

    /// Expose sandbox listing and teardown.
    pub fn with_manager(mut self, manager: Arc<SandboxManager>) -> Self {
        self.state.manager = Some(manager);
        self
    }

    /// Report intake activity in `/health`.
    pub fn with_gate(mut self, gate: IntakeGate) -> Self {
        self.state.gate = Some(gate);
        self
    }

    /// Set metrics handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/run", post(submit_handler).get(events_handler))
            .route("/events", get(events_handler))
            .route("/tunnel", post(tunnel_handler))
            .route("/broadcast", post(broadcast_handler))
            .route("/sandboxes", get(list_sandboxes_handler))
            .route("/sandboxes/:name", delete(teardown_handler))
            .with_state(Arc::new(self.state.clone()));

        if let Some(handle) = &self.metrics_handle {
            let handle = handle.clone();
            router = router.route("/metrics", get(move || async move { handle.render() }));
        }

        router = router.layer(cors_layer(&self.config.allowed_origins));

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Run the server.
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::gateway(format!("Failed to bind: {}", e)))?;

        tracing::info!(addr = %addr, "Gateway server starting");

        axum::serve(listener, self.build_router())
            .await
            .map_err(|e| Error::gateway(format!("Server error: {}", e)))?;

        Ok(())
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Tunnel announcement posted by a worker.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelCallback {
    #[serde(default)]
    pub container_name: String,
    pub tunnel_url: String,
}

/// Echo of an accepted tunnel announcement.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelAck {
    pub tunnel_url: String,
}

/// Free-form message to push to every observer.
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status.
    pub status: String,
    /// Version.
    pub version: String,
    /// Free ports in the pool, when this process provisions sandboxes.
    pub ports_available: Option<usize>,
    /// Whether a job is currently being provisioned.
    pub busy: bool,
    /// Connected event-stream observers.
    pub observers: usize,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
}

/// Maps pipeline errors onto HTTP responses.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidJob(_) | Error::MalformedJob(_) => StatusCode::BAD_REQUEST,
            Error::SandboxNotFound(_) => StatusCode::NOT_FOUND,
            Error::PortsExhausted => StatusCode::SERVICE_UNAVAILABLE,
            Error::Queue(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                code: self.0.kind().to_uppercase(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ports_available: state.manager.as_ref().map(|m| m.ports().available()),
        busy: state.gate.as_ref().is_some_and(|g| g.is_busy()),
        observers: state.hub.observer_count(),
    })
}

/// Accept a job and put it on the queue.
///
/// Only presence of both fields is checked here; kind and URL are validated
/// when the job is processed.
async fn submit_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JobRequest>,
) -> std::result::Result<Response, ApiError> {
    if request.repo_url.trim().is_empty() || request.project_type.trim().is_empty() {
        return Ok((StatusCode::BAD_REQUEST, MISSING_FIELDS).into_response());
    }

    let payload = request.encode()?;
    state.queue.enqueue(Bytes::from(payload)).await?;

    tracing::info!(
        queue = %state.queue.name(),
        repo_url = %request.repo_url,
        project_type = %request.project_type,
        "Job submitted"
    );
    Ok("Project details added to queue".into_response())
}

/// Open an event stream for one observer.
async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let subscription = state.hub.subscribe();
    tracing::info!(observer = %subscription.id(), "Event stream opened");

    // Dropping the stream on disconnect drops the subscription, which
    // unregisters the observer.
    let stream = subscription.map(|event: PipelineEvent| Event::default().json_data(&event));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Relay a tunnel URL announced by a worker to every observer.
async fn tunnel_handler(
    State(state): State<Arc<AppState>>,
    Json(callback): Json<TunnelCallback>,
) -> impl IntoResponse {
    tracing::info!(
        sandbox = %callback.container_name,
        tunnel_url = %callback.tunnel_url,
        "Received tunnel URL"
    );
    state.hub.broadcast(PipelineEvent::tunnel(callback.tunnel_url.clone()));
    Json(TunnelAck {
        tunnel_url: callback.tunnel_url,
    })
}

/// Push a log line to every observer.
async fn broadcast_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BroadcastRequest>,
) -> impl IntoResponse {
    state.hub.broadcast(PipelineEvent::logs(request.message));
    "Message broadcasted to SSE clients"
}

fn manager(state: &AppState) -> std::result::Result<&Arc<SandboxManager>, Response> {
    state.manager.as_ref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                code: "NO_MANAGER".to_string(),
                message: "This instance does not manage sandboxes".to_string(),
            }),
        )
            .into_response()
    })
}

/// List tracked sandboxes.
async fn list_sandboxes_handler(State(state): State<Arc<AppState>>) -> Response {
    match manager(&state) {
        Ok(manager) => Json::<Vec<SandboxInfo>>(manager.list().await).into_response(),
        Err(response) => response,
    }
}

/// Tear down a sandbox and release its port.
async fn teardown_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> std::result::Result<Response, ApiError> {
    let manager = match manager(&state) {
        Ok(manager) => manager,
        Err(response) => return Ok(response),
    };
    manager.teardown(&SandboxId(name)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
