use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use launchpad_controller::{IntakeGate, IntakeLoop, JobOutcome, JobProcessor};
use launchpad_core::{traits::JobQueue, Error, JobRequest, Result, TunnelUrl};
use launchpad_store::InMemoryJobQueue;

/// Processor that records concurrency and can be held open.
#[derive(Default)]
struct SlowProcessor {
    active: AtomicUsize,
    max_active: AtomicUsize,
    seen: Mutex<Vec<String>>,
    delay: Duration,
    release: Option<Arc<Notify>>,
    fail: bool,
}

impl SlowProcessor {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

#[async_trait]
impl JobProcessor for SlowProcessor {
    async fn process(&self, request: &JobRequest) -> Result<TunnelUrl> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.repo_url.clone());

        if let Some(release) = &self.release {
            release.notified().await;
        }
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            Err(Error::TunnelNotFound)
        } else {
            Ok(TunnelUrl::new("https://job.trycloudflare.com"))
        }
    }
}

fn payload(repo: &str) -> Bytes {
    Bytes::from(JobRequest::new(repo, "vite").encode().unwrap())
}

#[tokio::test]
async fn test_jobs_processed_one_at_a_time() -> anyhow::Result<()> {
    let queue = Arc::new(InMemoryJobQueue::new("project_queue"));
    for i in 0..4 {
        queue.enqueue(payload(&format!("https://example.com/{}.git", i))).await?;
    }
    queue.close();

    let processor = Arc::new(SlowProcessor::with_delay(Duration::from_millis(15)));
    let intake = IntakeLoop::new(queue.clone(), processor.clone(), IntakeGate::new());
    intake.run().await?;

    assert_eq!(processor.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(
        *processor.seen.lock().unwrap(),
        vec![
            "https://example.com/0.git",
            "https://example.com/1.git",
            "https://example.com/2.git",
            "https://example.com/3.git",
        ]
    );
    assert_eq!(queue.unacked_len(), 0, "every processed job is acknowledged");
    Ok(())
}

#[tokio::test]
async fn test_next_message_stays_pending_while_busy() -> anyhow::Result<()> {
    let queue = Arc::new(InMemoryJobQueue::new("project_queue"));
    queue.enqueue(payload("https://example.com/first.git")).await?;
    queue.enqueue(payload("https://example.com/second.git")).await?;

    let release = Arc::new(Notify::new());
    let processor = Arc::new(SlowProcessor {
        release: Some(release.clone()),
        ..Default::default()
    });
    let gate = IntakeGate::new();
    let intake = Arc::new(IntakeLoop::new(queue.clone(), processor.clone(), gate.clone()));

    let first = {
        let intake = intake.clone();
        tokio::spawn(async move { intake.run_once().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(gate.is_busy());
    assert_eq!(queue.pending_len(), 1, "second job not pulled while the first runs");
    assert_eq!(queue.unacked_len(), 1, "first job not acked before it finishes");

    release.notify_one();
    let outcome = first.await??.expect("queue is open");
    assert!(matches!(outcome, JobOutcome::Provisioned(_)));
    assert!(!gate.is_busy());
    assert_eq!(queue.unacked_len(), 0);
    assert_eq!(queue.pending_len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_idle_loop_is_not_busy() -> anyhow::Result<()> {
    let queue = Arc::new(InMemoryJobQueue::new("project_queue"));
    let gate = IntakeGate::new();
    let intake = IntakeLoop::new(queue.clone(), Arc::new(SlowProcessor::default()), gate.clone());

    let running = tokio::spawn(async move { intake.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(gate.is_held(), "loop waits for a delivery while holding the slot");
    assert!(!gate.is_busy(), "waiting on an empty queue is not busy");

    queue.close();
    running.await??;
    Ok(())
}

#[tokio::test]
async fn test_malformed_payload_is_dead_lettered() -> anyhow::Result<()> {
    let queue = Arc::new(InMemoryJobQueue::new("project_queue"));
    queue.enqueue(Bytes::from_static(b"{not json")).await?;
    queue.enqueue(payload("https://example.com/ok.git")).await?;
    queue.close();

    let processor = Arc::new(SlowProcessor::default());
    let intake = IntakeLoop::new(queue.clone(), processor.clone(), IntakeGate::new());

    let outcome = intake.run_once().await?.expect("delivery available");
    match outcome {
        JobOutcome::Malformed(e) => assert!(matches!(e, Error::MalformedJob(_))),
        other => panic!("expected malformed outcome, got {:?}", other),
    }
    assert_eq!(outcome_label_after(&intake).await?, "provisioned");

    assert_eq!(processor.seen.lock().unwrap().len(), 1, "malformed job never processed");
    assert_eq!(queue.unacked_len(), 0, "malformed delivery no longer pending");
    let dead = queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].payload, Bytes::from_static(b"{not json"));
    Ok(())
}

async fn outcome_label_after(intake: &IntakeLoop) -> anyhow::Result<&'static str> {
    Ok(intake.run_once().await?.expect("delivery available").label())
}

#[tokio::test]
async fn test_failed_job_is_acknowledged_and_dropped() -> anyhow::Result<()> {
    let queue = Arc::new(InMemoryJobQueue::new("project_queue"));
    queue.enqueue(payload("https://example.com/broken.git")).await?;
    queue.close();

    let processor = Arc::new(SlowProcessor {
        fail: true,
        ..Default::default()
    });
    let intake = IntakeLoop::new(queue.clone(), processor, IntakeGate::new());

    let outcome = intake.run_once().await?.expect("delivery available");
    assert!(matches!(outcome, JobOutcome::Failed(Error::TunnelNotFound)));
    assert_eq!(outcome.label(), "tunnel_not_found");
    assert_eq!(queue.unacked_len(), 0);
    assert_eq!(queue.pending_len(), 0, "no requeue");

    assert!(intake.run_once().await?.is_none(), "closed queue ends intake");
    Ok(())
}
