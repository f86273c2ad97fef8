//! Redis Streams job queue.
//!
//! This crate provides:
//! - Render job enqueueing with idempotency keys
//! - Consumer-group consumption, acknowledgement and pending-job claiming
//! - Retry counting and a dead letter stream

pub mod error;
pub mod job;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::QueueJob;
pub use queue::{JobQueue, QueueConfig};
