//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::graph::GraphError;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during composition and encoding.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found (set FFMPEG_PATH or add ffmpeg to PATH)")]
    FfmpegNotFound,

    #[error("FFprobe not found (set FFPROBE_PATH or add ffprobe to PATH)")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Encoder exited cleanly but produced no output at {0}")]
    OutputMissing(PathBuf),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid composition: {0}")]
    InvalidComposition(String),

    #[error("Audio input has no audio stream: {0}")]
    MissingAudioStream(PathBuf),

    #[error("No usable background source in any pool")]
    NoUsableSources,

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Filter graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid media file: {0}")]
    InvalidMedia(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an invalid composition error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidComposition(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Input-validation errors are never worth retrying.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MediaError::InvalidComposition(_)
                | MediaError::FileNotFound(_)
                | MediaError::MissingAudioStream(_)
        )
    }

    /// Short diagnostic excerpt for user-facing failure records.
    pub fn diagnostic(&self) -> String {
        match self {
            MediaError::FfmpegFailed {
                message,
                stderr: Some(stderr),
                ..
            } if !stderr.is_empty() => format!("{}: {}", message, stderr),
            other => other.to_string(),
        }
    }
}

impl From<reel_models::CompositionError> for MediaError {
    fn from(err: reel_models::CompositionError) -> Self {
        MediaError::InvalidComposition(err.to_string())
    }
}
