#![deny(unreachable_patterns)]
//! FFmpeg composition engine for promo reels.
//!
//! This crate provides:
//! - Encoder discovery and a multi-input FFmpeg command builder
//! - A process runner that only reports success when an output file exists
//! - A typed filter graph with define-before-use label checking
//! - Layer compositing (overlay, blend, drawtext) with a closing fade envelope
//! - Background assembly from categorized source clips

pub mod command;
pub mod compose;
pub mod encoder;
pub mod error;
pub mod fs_utils;
pub mod graph;
pub mod metrics;
pub mod probe;
pub mod progress;
pub mod segments;

pub use command::{FfmpegCommand, FfmpegInput, FfmpegRunner};
pub use compose::{
    build_command, build_filter_graph, compose, validate_inputs, AudioPolicy, BuiltGraph,
    ComposeOptions, ComposeOutput, InputPlan, LabelFallback, RenderPass,
};
pub use encoder::EncoderConfig;
pub use error::{MediaError, MediaResult};
pub use fs_utils::move_file;
pub use graph::{FilterGraph, GraphError, Label};
pub use probe::{probe_media, MediaInfo, MediaKind};
pub use progress::FfmpegProgress;
pub use segments::{SegmentAssembler, SourceFetcher, SourcePool, SourceRef, DEFAULT_SEGMENT_SECS};
