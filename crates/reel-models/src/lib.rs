//! Shared data models for the PromoReel backend.
//!
//! This crate provides Serde-serializable types for:
//! - Layers and compositions consumed by the media pipeline
//! - Encoding configuration
//! - Background style presets
//! - Render job requests and result records

pub mod composition;
pub mod encoding;
pub mod job;
pub mod layer;
pub mod style;

// Re-export common types
pub use composition::{Composition, CompositionError, FadeEnvelope};
pub use encoding::EncodingConfig;
pub use job::{render_job_schema, BackgroundOutcome, Canvas, JobId, JobResult, RenderJob};
pub use layer::{
    BlendMode, HorizontalPosition, Layer, LayerKind, LayerSource, Position, Size, TextStyle,
    TimeWindow,
};
pub use style::StylePreset;
