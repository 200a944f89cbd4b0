//! Job intake loop.
//!
//! Pulls one delivery at a time from the queue, decodes it, runs it through
//! the processor and acknowledges it. Payloads that cannot be decoded are
//! never acknowledged; they go to the queue's dead-letter list. The gate is
//! taken before the next delivery is pulled, so while a job is in flight
//! every other message stays pending in the broker.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use launchpad_core::{
    traits::{Delivery, JobQueue},
    Error, JobRequest, Result, TunnelUrl,
};
use launchpad_sandbox::SandboxManager;

use crate::gate::IntakeGate;

/// Runs one decoded job to completion.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, request: &JobRequest) -> Result<TunnelUrl>;
}

#[async_trait]
impl JobProcessor for SandboxManager {
    async fn process(&self, request: &JobRequest) -> Result<TunnelUrl> {
        // The build keeps streaming on its own task after provisioning returns.
        let provisioned = self.provision(request).await?;
        Ok(provisioned.tunnel_url)
    }
}

/// What happened to one delivery.
#[derive(Debug)]
pub enum JobOutcome {
    /// Provisioned and acknowledged.
    Provisioned(TunnelUrl),
    /// Processing failed; the delivery was still acknowledged.
    Failed(Error),
    /// Payload could not be decoded; dead-lettered without acknowledgment.
    Malformed(Error),
}

impl JobOutcome {
    /// Label used for the `launchpad_jobs_total` metric.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Provisioned(_) => "provisioned",
            Self::Failed(e) => e.kind(),
            Self::Malformed(_) => "malformed_job",
        }
    }
}

/// Serial consumer of the job queue.
pub struct IntakeLoop {
    queue: Arc<dyn JobQueue>,
    processor: Arc<dyn JobProcessor>,
    gate: IntakeGate,
    retry_delay: Duration,
}

impl IntakeLoop {
    pub fn new(queue: Arc<dyn JobQueue>, processor: Arc<dyn JobProcessor>, gate: IntakeGate) -> Self {
        Self {
            queue,
            processor,
            gate,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Delay before pulling again after a queue error.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn gate(&self) -> &IntakeGate {
        &self.gate
    }

    /// Consume until the queue closes.
    pub async fn run(&self) -> Result<()> {
        tracing::info!(queue = %self.queue.name(), "Waiting for jobs");
        loop {
            match self.run_once().await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::info!(queue = %self.queue.name(), "Queue closed, intake stopped");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(queue = %self.queue.name(), error = %e, "Queue error");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Take the gate, pull one delivery and process it.
    ///
    /// Returns `Ok(None)` once the queue is closed.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>> {
        let _permit = self.gate.acquire().await?;

        let delivery = match self.queue.next_delivery().await? {
            Some(delivery) => delivery,
            None => return Ok(None),
        };
        let _in_flight = self.gate.begin_job();

        let outcome = self.handle(&delivery).await?;
        metrics::counter!("launchpad_jobs_total", "outcome" => outcome.label()).increment(1);
        Ok(Some(outcome))
    }

    async fn handle(&self, delivery: &Delivery) -> Result<JobOutcome> {
        let request = match JobRequest::decode(&delivery.payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(tag = delivery.tag, error = %e, "Skipping undecodable job");
                self.queue.reject(delivery).await?;
                return Ok(JobOutcome::Malformed(e));
            }
        };

        tracing::info!(
            tag = delivery.tag,
            repo_url = %request.repo_url,
            project_type = %request.project_type,
            "Processing job"
        );

        let outcome = match self.processor.process(&request).await {
            Ok(url) => {
                tracing::info!(tag = delivery.tag, tunnel_url = %url, "Job completed");
                JobOutcome::Provisioned(url)
            }
            Err(e) => {
                tracing::error!(
                    tag = delivery.tag,
                    error = %e,
                    kind = e.kind(),
                    retryable = e.is_retryable(),
                    "Job failed"
                );
                JobOutcome::Failed(e)
            }
        };

        // Acknowledged whatever the outcome; failed jobs are not retried.
        self.queue.ack(delivery).await?;
        Ok(outcome)
    }
}
