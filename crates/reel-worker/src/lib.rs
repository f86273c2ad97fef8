//! Render worker for promo reels.
//!
//! This crate provides:
//! - Worker configuration and the fixed reel layout
//! - Job executor with bounded concurrency, retries and dead-lettering
//! - Render processing: source pools, background assembly, composition
//! - Structured job logging and worker metrics

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pools;
pub mod processor;

pub use config::{ReelLayout, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use pools::{list_pools, DirectoryPools, SourcePools, SourceResolver};
pub use reel_media::SourceRef;
pub use processor::{build_layers, render_promo, ProcessingContext};
