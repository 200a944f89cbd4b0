//! RedisJobQueue against a live server.
//!
//! Skipped when no Redis is reachable at `REDIS_URL` (default localhost).

use bytes::Bytes;
use launchpad_core::traits::JobQueue;
use launchpad_store::RedisJobQueue;
use redis::AsyncCommands;
use std::time::Duration;

async fn is_redis_available(url: &str) -> bool {
    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(_) => return false,
    };
    client.get_multiplexed_async_connection().await.is_ok()
}

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn fresh_queue(url: &str) -> anyhow::Result<RedisJobQueue> {
    let name = format!("test_queue_{}", uuid::Uuid::new_v4());
    Ok(RedisJobQueue::new(url, &name)?.with_block_timeout(Duration::from_secs(1)))
}

async fn cleanup(url: &str, name: &str) -> anyhow::Result<()> {
    let mut conn = redis::Client::open(url)?.get_multiplexed_async_connection().await?;
    let keys = [
        name.to_string(),
        format!("{}:processing", name),
        format!("{}:dead", name),
    ];
    let _: () = conn.del(&keys[..]).await?;
    Ok(())
}

#[tokio::test]
async fn test_requeued_jobs_keep_their_order() -> anyhow::Result<()> {
    let url = redis_url();
    if !is_redis_available(&url).await {
        println!("Skipping test_requeued_jobs_keep_their_order: Redis not available at {}", url);
        return Ok(());
    }

    let queue = fresh_queue(&url)?;
    for job in ["a", "b", "c"] {
        queue.enqueue(Bytes::from(job)).await?;
    }

    // A consumer takes two jobs and dies without acknowledging them.
    for expected in ["a", "b"] {
        let delivery = queue.next_delivery().await?.expect("job available");
        assert_eq!(delivery.payload, Bytes::from(expected));
    }

    assert_eq!(queue.requeue_unacked().await?, 2);

    let mut order = Vec::new();
    for _ in 0..3 {
        let delivery = queue.next_delivery().await?.expect("job available");
        queue.ack(&delivery).await?;
        order.push(delivery.payload);
    }
    assert_eq!(order, vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]);

    cleanup(&url, queue.name()).await
}

#[tokio::test]
async fn test_rejected_job_is_not_requeued() -> anyhow::Result<()> {
    let url = redis_url();
    if !is_redis_available(&url).await {
        println!("Skipping test_rejected_job_is_not_requeued: Redis not available at {}", url);
        return Ok(());
    }

    let queue = fresh_queue(&url)?;
    queue.enqueue(Bytes::from("{not json")).await?;

    let delivery = queue.next_delivery().await?.expect("job available");
    queue.reject(&delivery).await?;
    assert_eq!(queue.requeue_unacked().await?, 0, "processing list is empty");

    let mut conn = redis::Client::open(url.as_str())?
        .get_multiplexed_async_connection()
        .await?;
    let dead: Vec<Vec<u8>> = conn.lrange(format!("{}:dead", queue.name()), 0, -1).await?;
    assert_eq!(dead, vec![b"{not json".to_vec()]);

    cleanup(&url, queue.name()).await
}
