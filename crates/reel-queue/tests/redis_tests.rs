//! Redis queue integration tests.

use reel_models::{JobId, RenderJob};
use reel_queue::{JobQueue, QueueConfig, QueueError, QueueJob};

/// Queue on throwaway stream names so runs don't interfere.
async fn scratch_queue() -> JobQueue {
    dotenvy::dotenv().ok();
    let suffix = JobId::new();
    let config = QueueConfig {
        stream_name: format!("reel:test:jobs:{}", suffix),
        dlq_stream_name: format!("reel:test:dlq:{}", suffix),
        key_prefix: format!("reel:test:{}", suffix),
        ..QueueConfig::from_env()
    };
    let queue = JobQueue::new(config).expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");
    queue
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_consume_ack() {
    let queue = scratch_queue().await;

    let job = RenderJob::new("/audio/track.mp3", vec!["city".into()]).with_caption("Nina", "Sunrise");
    let job_id = job.job_id.clone();
    queue.enqueue(job).await.expect("Failed to enqueue");
    assert_eq!(queue.len().await.unwrap(), 1);

    let jobs = queue.consume("test-consumer", 1000, 1).await.expect("Failed to consume");
    assert_eq!(jobs.len(), 1);
    let (message_id, consumed) = &jobs[0];
    assert_eq!(consumed.job_id(), &job_id);

    queue.ack(message_id).await.expect("Failed to ack");
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_rejected() {
    let queue = scratch_queue().await;

    let job = RenderJob::new("/audio/track.mp3", vec!["city".into()]);
    queue.enqueue(job.clone()).await.expect("Failed to enqueue");

    let err = queue.enqueue(job).await.unwrap_err();
    assert!(matches!(err, QueueError::Duplicate(_)));
    assert_eq!(queue.len().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_retry_counter_and_dlq() {
    let queue = scratch_queue().await;

    let job = RenderJob::new("/audio/track.mp3", vec!["city".into()]);
    let message_id = queue.enqueue(job.clone()).await.expect("Failed to enqueue");
    let _ = queue.consume("test-consumer", 1000, 1).await.unwrap();

    assert_eq!(queue.get_retry_count(&message_id).await.unwrap(), 0);
    assert_eq!(queue.increment_retry(&message_id).await.unwrap(), 1);
    assert_eq!(queue.increment_retry(&message_id).await.unwrap(), 2);

    queue
        .dlq(&message_id, &QueueJob::from(job), "encoder crashed")
        .await
        .expect("Failed to move to DLQ");

    assert_eq!(queue.dlq_len().await.unwrap(), 1);
    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(queue.get_retry_count(&message_id).await.unwrap(), 0);
}
