//! Provisioning pipeline tests.
//!
//! Drives SandboxManager against MockRuntime; no Docker required.

use std::sync::Arc;

use launchpad_core::{
    config::SandboxSettings, mocks::RecordingSink, Error, JobRequest, PipelineEvent,
};
use launchpad_sandbox::{MockRuntime, SandboxManager};

// =============================================================================
// Helpers
// =============================================================================

fn settings(max_ports: u16) -> SandboxSettings {
    SandboxSettings {
        max_ports,
        ..SandboxSettings::default()
    }
}

fn manager(
    runtime: MockRuntime,
    settings: SandboxSettings,
) -> (SandboxManager, Arc<MockRuntime>, Arc<RecordingSink>) {
    let runtime = Arc::new(runtime);
    let sink = Arc::new(RecordingSink::new());
    let manager = SandboxManager::new(runtime.clone(), sink.clone(), settings);
    (manager, runtime, sink)
}

fn vite_job() -> JobRequest {
    JobRequest::new("https://example.com/r.git", "vite")
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_vite_job_end_to_end() {
    let (manager, runtime, sink) = manager(MockRuntime::new(), settings(1));

    let provisioned = manager.provision(&vite_job()).await.unwrap();
    assert_eq!(provisioned.host_port, 3005);
    assert_eq!(
        provisioned.tunnel_url.as_str(),
        "https://quiet-river-demo.trycloudflare.com"
    );

    let created = runtime.created();
    assert_eq!(created.len(), 1, "exactly one sandbox");
    assert_eq!(created[0].internal_port, 5173);
    assert_eq!(created[0].host_port, 3005);
    assert_eq!(created[0].network, "my_custom_network");
    assert!(created[0].name.as_str().starts_with("container_"));
    assert_eq!(runtime.started(), vec![provisioned.sandbox.clone()]);

    let outcome = provisioned.build.await.unwrap();
    assert!(outcome.success());

    let events = sink.events();
    assert_eq!(
        events[0],
        PipelineEvent::tunnel("https://quiet-river-demo.trycloudflare.com"),
        "tunnel event comes before any build output"
    );
    assert!(sink.of_kind("tunnel").len() == 1);
    assert!(sink.log_text().contains("VITE ready"));
    assert_eq!(
        events.last(),
        Some(&PipelineEvent::status("Build/run pipeline finished successfully"))
    );

    let commands = runtime.commands();
    assert_eq!(commands[0].1, "cloudflared tunnel --url http://localhost:5173");
    assert!(commands[1].1.contains("git clone 'https://example.com/r.git'"));

    // Port stays leased while the sandbox lives.
    assert_eq!(manager.ports().available(), 0);
    assert_eq!(manager.list().await.len(), 1);
}

#[tokio::test]
async fn test_react_job_exposes_port_3000() {
    let (manager, runtime, _sink) = manager(MockRuntime::new(), settings(2));

    let provisioned = manager
        .provision(&JobRequest::new("https://example.com/app.git", "react"))
        .await
        .unwrap();
    provisioned.build.await.unwrap();

    assert_eq!(runtime.created()[0].internal_port, 3000);
    assert!(runtime.commands()[1].1.ends_with("npm start"));
}

// =============================================================================
// Validation & exhaustion
// =============================================================================

#[tokio::test]
async fn test_unknown_project_type_is_dropped() {
    let (manager, runtime, sink) = manager(MockRuntime::new(), settings(1));

    let err = manager
        .provision(&JobRequest::new("https://example.com/r.git", "unknown"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidJob(_)));
    assert!(runtime.created().is_empty(), "no sandbox created");
    assert!(sink.events().is_empty(), "no events emitted");
    assert_eq!(manager.ports().available(), 1);
}

#[tokio::test]
async fn test_missing_fields_are_invalid() {
    let (manager, runtime, _sink) = manager(MockRuntime::new(), settings(1));

    let err = manager
        .provision(&JobRequest::new("", "vite"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidJob(_)));
    assert!(runtime.created().is_empty());
}

#[tokio::test]
async fn test_pool_exhausted() {
    let (manager, runtime, _sink) = manager(MockRuntime::new().with_hanging_build(), settings(1));

    let first = manager.provision(&vite_job()).await.unwrap();
    let err = manager.provision(&vite_job()).await.unwrap_err();

    assert!(matches!(err, Error::PortsExhausted));
    assert_eq!(runtime.created().len(), 1, "no second sandbox");
    assert_eq!(first.host_port, 3005);
    first.build.abort();
}

// =============================================================================
// Failure paths release the port
// =============================================================================

#[tokio::test]
async fn test_create_failure_releases_port() {
    let (manager, _runtime, sink) = manager(MockRuntime::new().failing_create(), settings(1));

    let err = manager.provision(&vite_job()).await.unwrap_err();
    assert!(matches!(err, Error::SandboxCreate(_)));
    assert_eq!(manager.ports().available(), 1);
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_start_failure_releases_port_and_removes_container() {
    let (manager, runtime, _sink) = manager(MockRuntime::new().failing_start(), settings(1));

    let err = manager.provision(&vite_job()).await.unwrap_err();
    assert!(matches!(err, Error::SandboxStart(_)));
    assert_eq!(manager.ports().available(), 1);
    assert_eq!(runtime.destroyed().len(), 1);
}

#[tokio::test]
async fn test_tunnel_not_found() {
    let runtime = MockRuntime::new().with_tunnel_output(vec![
        "INF Requesting new quick Tunnel on trycloudflare.com...\n",
        "ERR Error requesting tunnel\n",
    ]);
    let (manager, runtime, sink) = manager(runtime, settings(1));

    let err = manager.provision(&vite_job()).await.unwrap_err();
    assert!(matches!(err, Error::TunnelNotFound));
    assert!(sink.events().is_empty(), "no tunnel event without a URL");
    assert_eq!(manager.ports().available(), 1);
    assert_eq!(runtime.destroyed(), vec![runtime.created()[0].name.clone()]);
    assert!(manager.list().await.is_empty());
}

// =============================================================================
// Teardown & TTL reclamation
// =============================================================================

#[tokio::test]
async fn test_teardown_releases_port() {
    let (manager, runtime, _sink) = manager(MockRuntime::new().with_hanging_build(), settings(1));

    let provisioned = manager.provision(&vite_job()).await.unwrap();
    assert_eq!(manager.ports().available(), 0);

    manager.teardown(&provisioned.sandbox).await.unwrap();
    assert_eq!(manager.ports().available(), 1);
    assert_eq!(runtime.destroyed(), vec![provisioned.sandbox.clone()]);
    assert!(provisioned.build.await.unwrap_err().is_cancelled());

    let err = manager.teardown(&provisioned.sandbox).await.unwrap_err();
    assert!(matches!(err, Error::SandboxNotFound(_)));

    // The freed port can be leased again.
    let again = manager.provision(&vite_job()).await.unwrap();
    assert_eq!(again.host_port, 3005);
    again.build.abort();
}

#[tokio::test]
async fn test_failed_removal_keeps_port_leased() {
    let runtime = MockRuntime::new().with_hanging_build().failing_destroy(1);
    let (manager, runtime, _sink) = manager(runtime, settings(1));

    let provisioned = manager.provision(&vite_job()).await.unwrap();
    let err = manager.teardown(&provisioned.sandbox).await.unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));

    // Still tracked and still holding its port, so no new job can claim it.
    assert_eq!(manager.ports().available(), 0);
    assert_eq!(manager.list().await.len(), 1);
    assert!(matches!(
        manager.provision(&vite_job()).await.unwrap_err(),
        Error::PortsExhausted
    ));

    // The next reaper pass retries the removal.
    assert_eq!(manager.reap_expired().await, 1);
    assert_eq!(manager.ports().available(), 1);
    assert_eq!(runtime.destroyed(), vec![provisioned.sandbox]);
    assert!(manager.list().await.is_empty());
}

#[tokio::test]
async fn test_failed_cleanup_after_start_failure_keeps_port_leased() {
    let runtime = MockRuntime::new().failing_start().failing_destroy(1);
    let (manager, runtime, _sink) = manager(runtime, settings(1));

    let err = manager.provision(&vite_job()).await.unwrap_err();
    assert!(matches!(err, Error::SandboxStart(_)));
    assert_eq!(manager.ports().available(), 0);
    assert!(runtime.destroyed().is_empty());

    assert_eq!(manager.reap_expired().await, 0);
    assert_eq!(manager.ports().available(), 1);
    assert_eq!(runtime.destroyed().len(), 1);
}

#[tokio::test]
async fn test_reaper_reclaims_expired_sandboxes() {
    let expired = SandboxSettings {
        ttl_secs: 0,
        ..settings(2)
    };
    let (manager, runtime, _sink) = manager(MockRuntime::new(), expired);

    manager.provision(&vite_job()).await.unwrap();
    manager.provision(&vite_job()).await.unwrap();
    assert_eq!(manager.ports().available(), 0);

    assert_eq!(manager.reap_expired().await, 2);
    assert_eq!(manager.ports().available(), 2);
    assert_eq!(runtime.destroyed().len(), 2);
    assert!(manager.list().await.is_empty());
}

#[tokio::test]
async fn test_reaper_keeps_live_sandboxes() {
    let (manager, runtime, _sink) = manager(MockRuntime::new(), settings(1));

    manager.provision(&vite_job()).await.unwrap();
    assert_eq!(manager.reap_expired().await, 0);
    assert_eq!(manager.list().await.len(), 1);
    assert!(runtime.destroyed().is_empty());
}
