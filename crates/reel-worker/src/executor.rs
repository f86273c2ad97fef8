//! Job executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reel_models::JobResult;
use reel_queue::{JobQueue, QueueJob};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::processor::{render_promo, write_result, ProcessingContext};

/// Max jobs pulled from the stream per read.
const MAX_BATCH: usize = 5;
/// XREADGROUP block time.
const CONSUME_BLOCK_MS: u64 = 1000;

/// What to do with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Leave pending; redelivered after the visibility timeout.
    Retry,
    DeadLetter,
}

/// Dead-letter permanent failures and jobs out of attempts.
pub fn failure_action(retryable: bool, attempts: u32, max_retries: u32) -> FailureAction {
    if !retryable || attempts >= max_retries {
        FailureAction::DeadLetter
    } else {
        FailureAction::Retry
    }
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    ctx: Arc<ProcessingContext>,
    queue: Arc<JobQueue>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(ctx: ProcessingContext, queue: JobQueue) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            ctx: Arc::new(ctx),
            queue: Arc::new(queue),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    fn max_jobs(&self) -> usize {
        self.ctx.config.max_concurrent_jobs
    }

    /// Run until [`JobExecutor::shutdown`] is called, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            consumer = %self.consumer_name,
            max_jobs = self.max_jobs(),
            "Starting job executor"
        );

        self.queue.init().await?;

        let claim_task = self.spawn_claim_task();
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!(error = %e, "Error consuming jobs");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete");
        if tokio::time::timeout(self.ctx.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!("Shutdown timeout reached with jobs still running");
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Periodically claim jobs abandoned by crashed workers.
    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let ctx = Arc::clone(&self.ctx);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let period = self.ctx.config.claim_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let available = semaphore.available_permits();
                        if available == 0 {
                            continue;
                        }
                        match queue.claim_pending(&consumer_name, available.min(MAX_BATCH)).await {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!(count = jobs.len(), "Claimed pending jobs");
                                for (message_id, job) in jobs {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        return;
                                    };
                                    let ctx = Arc::clone(&ctx);
                                    let queue = Arc::clone(&queue);
                                    let semaphore = Arc::clone(&semaphore);
                                    let max_jobs = ctx.config.max_concurrent_jobs;
                                    tokio::spawn(async move {
                                        Self::execute_job(ctx, queue, message_id, job).await;
                                        drop(permit);
                                        metrics::set_jobs_in_flight(max_jobs - semaphore.available_permits());
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "Failed to claim pending jobs"),
                        }
                    }
                }
            }
        })
    }

    /// Consume and dispatch jobs from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, CONSUME_BLOCK_MS, available.min(MAX_BATCH))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!(count = jobs.len(), "Consumed jobs from queue");

        for (message_id, job) in jobs {
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;
            metrics::set_jobs_in_flight(self.max_jobs() - self.job_semaphore.available_permits());

            let ctx = Arc::clone(&self.ctx);
            let queue = Arc::clone(&self.queue);
            let semaphore = Arc::clone(&self.job_semaphore);
            let max_jobs = self.max_jobs();
            tokio::spawn(async move {
                Self::execute_job(ctx, queue, message_id, job).await;
                drop(permit);
                metrics::set_jobs_in_flight(max_jobs - semaphore.available_permits());
            });
        }

        Ok(())
    }

    /// Execute a single job with retry and DLQ handling.
    async fn execute_job(
        ctx: Arc<ProcessingContext>,
        queue: Arc<JobQueue>,
        message_id: String,
        job: QueueJob,
    ) {
        let job_id = job.job_id().clone();
        let started = Instant::now();

        let result = match &job {
            QueueJob::RenderPromo(render) => render_promo(&ctx, render).await,
        };

        match result {
            Ok(_) => {
                metrics::record_job_completed(started.elapsed().as_secs_f64());
                if let Err(e) = queue.ack(&message_id).await {
                    error!(job_id = %job_id, error = %e, "Failed to ack job");
                }
            }
            Err(e) => {
                let retryable = e.is_retryable();
                metrics::record_job_failed(retryable, started.elapsed().as_secs_f64());

                let attempts = match queue.increment_retry(&message_id).await {
                    Ok(n) => n,
                    Err(err) => {
                        warn!(job_id = %job_id, error = %err, "Failed to bump retry counter");
                        u32::MAX
                    }
                };
                let max_retries = queue.max_retries();

                match failure_action(retryable, attempts, max_retries) {
                    FailureAction::Retry => {
                        info!(
                            job_id = %job_id,
                            attempt = attempts,
                            max_retries = max_retries,
                            error = %e,
                            "Job failed, will be retried"
                        );
                    }
                    FailureAction::DeadLetter => {
                        warn!(
                            job_id = %job_id,
                            retryable = retryable,
                            attempts = attempts,
                            error = %e,
                            "Job failed permanently, moving to DLQ"
                        );
                        let message = match &e {
                            WorkerError::Media(media) => media.diagnostic(),
                            other => other.to_string(),
                        };
                        if let Err(dlq_err) = queue.dlq(&message_id, &job, &message).await {
                            error!(job_id = %job_id, error = %dlq_err, "Failed to move job to DLQ");
                        }
                        metrics::record_dead_lettered();

                        let record = JobResult::failure(job_id.clone(), message);
                        if let Err(write_err) = write_result(&ctx.config.output_dir, &record).await {
                            warn!(job_id = %job_id, error = %write_err, "Failed to write failure record");
                        }
                    }
                }
            }
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.max_jobs() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
