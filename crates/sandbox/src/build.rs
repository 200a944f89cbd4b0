//! Build/run executor.
//!
//! Runs the install-and-launch pipeline for a project inside its sandbox and
//! forwards every output chunk, verbatim and in order, as a `logs` event.

use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;

use launchpad_core::{
    traits::{EventSink, ExecHandle, SandboxRuntime},
    Job, PipelineEvent, ProjectKind, Result, SandboxId, TunnelUrl,
};

/// Quote a value for safe use as one `sh` word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shell pipeline that fetches, builds and serves a project.
pub fn build_command(kind: ProjectKind, repo_url: &str, workdir: &str) -> String {
    let serve = match kind {
        ProjectKind::Vite => "npm run dev -- --host",
        ProjectKind::React => "npm start",
    };
    let workdir = shell_quote(workdir);
    format!(
        "npm cache clean --force && apk add git && git clone {repo} {dir} && cd {dir} && npm install && npm run build && {serve}",
        repo = shell_quote(repo_url),
        dir = workdir,
        serve = serve,
    )
}

/// How a build/run pipeline ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildOutcome {
    /// Exit code reported by the runtime, if it could be determined.
    pub exit_code: Option<i64>,
    /// Number of `logs` events forwarded.
    pub chunks: usize,
    /// Whether the output stream ended with an error.
    pub stream_error: bool,
}

impl BuildOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.stream_error
    }

    /// One-line summary for the `status` event.
    pub fn summary(&self) -> String {
        match self.exit_code {
            Some(0) if !self.stream_error => "Build/run pipeline finished successfully".to_string(),
            Some(code) => format!("Build/run pipeline exited with code {}", code),
            None => "Build/run pipeline ended; exit status unknown".to_string(),
        }
    }
}

/// Decodes output chunks whose boundaries may split a UTF-8 character.
///
/// An incomplete trailing sequence is held back until the next chunk;
/// genuinely invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return text;
                        }
                    }
                }
            }
        }
    }

    /// Whatever is still held back, once the stream has ended.
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(rest)
    }
}

/// Runs the build/run pipeline and streams its output.
#[derive(Clone)]
pub struct BuildRunner {
    runtime: Arc<dyn SandboxRuntime>,
    sink: Arc<dyn EventSink>,
    workdir: String,
}

impl BuildRunner {
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        sink: Arc<dyn EventSink>,
        workdir: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            sink,
            workdir: workdir.into(),
        }
    }

    /// Launch the pipeline; output is not consumed yet.
    pub async fn start(&self, sandbox: &SandboxId, job: &Job) -> Result<ExecHandle> {
        tracing::info!(
            job_id = %job.id,
            sandbox = %sandbox,
            project_type = %job.project_kind,
            repo_url = %job.repo_url,
            "Setting up project"
        );
        let command = build_command(job.project_kind, &job.repo_url, &self.workdir);
        self.runtime.exec(sandbox, &command).await
    }

    /// Forward output until the pipeline ends, then collect its exit code.
    ///
    /// `tunnel_url` is only used for logging.
    pub async fn forward(
        &self,
        sandbox: &SandboxId,
        exec: ExecHandle,
        tunnel_url: &TunnelUrl,
    ) -> BuildOutcome {
        let ExecHandle { exec_id, mut output } = exec;
        let mut outcome = BuildOutcome::default();
        let mut decoder = Utf8Carry::default();

        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(bytes) => {
                    let text = decoder.push(&bytes);
                    if !text.is_empty() {
                        self.emit(sandbox, text, &mut outcome);
                    }
                }
                Err(e) => {
                    tracing::warn!(sandbox = %sandbox, error = %e, "Build output stream failed");
                    outcome.stream_error = true;
                    break;
                }
            }
        }
        if let Some(rest) = decoder.finish() {
            self.emit(sandbox, rest, &mut outcome);
        }

        outcome.exit_code = match self.runtime.exec_exit_code(&exec_id).await {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!(sandbox = %sandbox, error = %e, "Could not read build exit code");
                None
            }
        };

        if outcome.success() {
            tracing::info!(sandbox = %sandbox, tunnel_url = %tunnel_url, "Project pipeline finished");
        } else {
            tracing::warn!(
                sandbox = %sandbox,
                tunnel_url = %tunnel_url,
                exit_code = ?outcome.exit_code,
                "Project pipeline ended unsuccessfully"
            );
        }
        outcome
    }

    fn emit(&self, sandbox: &SandboxId, text: String, outcome: &mut BuildOutcome) {
        tracing::debug!(sandbox = %sandbox, output = %text.trim_end(), "build");
        self.sink.publish(PipelineEvent::logs(text));
        outcome.chunks += 1;
    }

    /// Start the pipeline and forward its output to completion.
    pub async fn run(
        &self,
        sandbox: &SandboxId,
        job: &Job,
        tunnel_url: &TunnelUrl,
    ) -> Result<BuildOutcome> {
        let exec = self.start(sandbox, job).await?;
        Ok(self.forward(sandbox, exec, tunnel_url).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockRuntime;
    use bytes::Bytes;
    use launchpad_core::{mocks::RecordingSink, JobRequest};

    fn job(kind: &str) -> Job {
        Job::from_request(&JobRequest::new("https://example.com/r.git", kind)).unwrap()
    }

    #[test]
    fn test_vite_pipeline() {
        let cmd = build_command(ProjectKind::Vite, "https://example.com/r.git", "/app");
        assert_eq!(
            cmd,
            "npm cache clean --force && apk add git && git clone 'https://example.com/r.git' '/app' \
             && cd '/app' && npm install && npm run build && npm run dev -- --host"
        );
    }

    #[test]
    fn test_react_pipeline_ends_with_start() {
        let cmd = build_command(ProjectKind::React, "https://example.com/r.git", "/app");
        assert!(cmd.ends_with("npm run build && npm start"));
        assert!(!cmd.contains("npm run dev"));
    }

    #[test]
    fn test_shell_quote_escapes_quotes() {
        assert_eq!(shell_quote("a'b"), r"'a'\''b'");
        let cmd = build_command(ProjectKind::Vite, "https://x.com/r.git'; rm -rf /", "/app");
        assert!(cmd.contains(r"'https://x.com/r.git'\''; rm -rf /'"));
    }

    #[tokio::test]
    async fn test_forwards_chunks_in_order() {
        let runtime = Arc::new(MockRuntime::new().with_build_output(
            vec!["Cloning into '/app'...\n", "added 3 packages", " in 1s\n"],
            0,
        ));
        let sink = Arc::new(RecordingSink::new());
        let runner = BuildRunner::new(runtime.clone(), sink.clone(), "/app");

        let sandbox = SandboxId::generate();
        let outcome = runner
            .run(&sandbox, &job("vite"), &TunnelUrl::new("https://t.trycloudflare.com"))
            .await
            .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.chunks, 3);
        assert_eq!(
            sink.events(),
            vec![
                PipelineEvent::logs("Cloning into '/app'...\n"),
                PipelineEvent::logs("added 3 packages"),
                PipelineEvent::logs(" in 1s\n"),
            ]
        );

        let (ran_in, command) = &runtime.commands()[0];
        assert_eq!(ran_in, &sandbox);
        assert!(command.contains("npm run dev -- --host"));
    }

    #[test]
    fn test_utf8_carry_rejoins_split_characters() {
        let mut decoder = Utf8Carry::default();
        let check = "✓ built\n".as_bytes();
        assert_eq!(decoder.push(&check[..1]), "");
        assert_eq!(decoder.push(&check[1..]), "✓ built\n");
        assert_eq!(decoder.finish(), None);

        assert_eq!(decoder.push(b"ok \xff then "), "ok \u{FFFD} then ");
        assert_eq!(decoder.push(&"é".as_bytes()[..1]), "");
        assert_eq!(decoder.finish().as_deref(), Some("\u{FFFD}"));
    }

    #[tokio::test]
    async fn test_multibyte_output_split_across_chunks() {
        let bytes = Bytes::from("✓ built\n");
        let runtime = Arc::new(
            MockRuntime::new().with_build_bytes(vec![bytes.slice(..1), bytes.slice(1..)], 0),
        );
        let sink = Arc::new(RecordingSink::new());
        let runner = BuildRunner::new(runtime, sink.clone(), "/app");

        let outcome = runner
            .run(&SandboxId::generate(), &job("vite"), &TunnelUrl::new("https://t.trycloudflare.com"))
            .await
            .unwrap();

        assert_eq!(sink.log_text(), "✓ built\n");
        assert_eq!(outcome.chunks, 1);
    }

    #[tokio::test]
    async fn test_failure_is_reported_in_outcome() {
        let runtime = Arc::new(
            MockRuntime::new().with_build_output(vec!["fatal: repository not found\n"], 128),
        );
        let sink = Arc::new(RecordingSink::new());
        let runner = BuildRunner::new(runtime, sink.clone(), "/app");

        let outcome = runner
            .run(&SandboxId::generate(), &job("react"), &TunnelUrl::new("https://t.trycloudflare.com"))
            .await
            .unwrap();

        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, Some(128));
        assert_eq!(outcome.summary(), "Build/run pipeline exited with code 128");
        assert!(sink.log_text().contains("repository not found"));
    }
}
