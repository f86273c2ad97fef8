//! Job types for the queue.

use serde::{Deserialize, Serialize};

use reel_models::{JobId, RenderJob};

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    /// Render one promotional reel
    RenderPromo(RenderJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::RenderPromo(j) => &j.job_id,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::RenderPromo(j) => j.idempotency_key(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueueJob::RenderPromo(_) => "render_promo",
        }
    }
}

impl From<RenderJob> for QueueJob {
    fn from(job: RenderJob) -> Self {
        QueueJob::RenderPromo(job)
    }
}
