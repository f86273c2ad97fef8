//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Source download failed: {0}")]
    DownloadFailed(String),

    #[error("Source pool error: {0}")]
    PoolFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] reel_queue::QueueError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn pool_failed(msg: impl Into<String>) -> Self {
        Self::PoolFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    ///
    /// Validation failures and broken inputs fail the same way on every
    /// attempt; encoder crashes, IO and network errors may not.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::InvalidJob(_) | WorkerError::ConfigError(_) | WorkerError::Json(_) => {
                false
            }
            WorkerError::Media(e) => {
                !(e.is_validation() || matches!(e, reel_media::MediaError::Graph(_)))
            }
            WorkerError::JobFailed(_)
            | WorkerError::DownloadFailed(_)
            | WorkerError::PoolFailed(_)
            | WorkerError::Queue(_)
            | WorkerError::Http(_)
            | WorkerError::Io(_) => true,
        }
    }
}
