//! Render job request and result records exchanged with the job queue.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Default reel length in seconds.
pub const DEFAULT_REEL_DURATION_SECS: f64 = 30.0;
/// Default square canvas edge in pixels.
pub const DEFAULT_CANVAS_EDGE: u32 = 720;
/// Longest accepted job ID.
const MAX_JOB_ID_LEN: usize = 128;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the ID is safe to use as a file name component:
    /// `[A-Za-z0-9_-]`, non-empty and bounded.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= MAX_JOB_ID_LEN
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

fn validate_job_id(id: &JobId) -> Result<(), ValidationError> {
    if id.is_valid() {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_job_id"))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output canvas size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct Canvas {
    #[validate(range(min = 16, max = 4096))]
    pub width: u32,
    #[validate(range(min = 16, max = 4096))]
    pub height: u32,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: DEFAULT_CANVAS_EDGE,
            height: DEFAULT_CANVAS_EDGE,
        }
    }
}

/// A request to render one promotional reel.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct RenderJob {
    /// Also names the output and result files.
    #[validate(custom(function = "validate_job_id"))]
    #[serde(default)]
    pub job_id: JobId,

    /// Output duration in seconds.
    #[validate(range(exclusive_min = 0.0, max = 600.0))]
    #[serde(default = "default_duration")]
    pub duration: f64,

    /// Background source categories to draw segments from.
    #[serde(default)]
    pub categories: Vec<String>,

    /// Background style key (see `StylePreset`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,

    /// Ready-to-use local audio file.
    pub audio_path: PathBuf,

    /// Caption line 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,

    /// Caption line 2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default = "default_true")]
    pub include_logo: bool,

    #[serde(default = "default_true")]
    pub include_captions: bool,

    /// Closing logo card that stays visible over the fade.
    #[serde(default = "default_true")]
    pub include_end_card: bool,

    #[validate(nested)]
    #[serde(default)]
    pub canvas: Canvas,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_duration() -> f64 {
    DEFAULT_REEL_DURATION_SECS
}

fn default_true() -> bool {
    true
}

impl RenderJob {
    pub fn new(audio_path: impl Into<PathBuf>, categories: Vec<String>) -> Self {
        Self {
            job_id: JobId::new(),
            duration: DEFAULT_REEL_DURATION_SECS,
            categories,
            style: None,
            audio_path: audio_path.into(),
            artist: None,
            title: None,
            include_logo: true,
            include_captions: true,
            include_end_card: true,
            canvas: Canvas::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_caption(mut self, artist: impl Into<String>, title: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self.title = Some(title.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    /// Caption text, `"artist - title"` or whichever part is present.
    pub fn caption_text(&self) -> Option<String> {
        let artist = self.artist.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let title = self.title.as_deref().map(str::trim).filter(|s| !s.is_empty());
        match (artist, title) {
            (Some(a), Some(t)) => Some(format!("{} - {}", a, t)),
            (Some(a), None) => Some(a.to_string()),
            (None, Some(t)) => Some(t.to_string()),
            (None, None) => None,
        }
    }

    /// Dedup key for the queue.
    pub fn idempotency_key(&self) -> String {
        format!("render:{}", self.job_id)
    }
}

/// JSON schema of [`RenderJob`] for producers validating payloads.
pub fn render_job_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(RenderJob)
}

/// How the background track was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundOutcome {
    /// Assembled from category pool segments.
    Segments,
    /// No usable pool source; static image used instead.
    StaticFallback,
}

/// Result record handed back to the job orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobResult {
    pub job_id: JobId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<BackgroundOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl JobResult {
    pub fn success(
        job_id: JobId,
        output_path: PathBuf,
        size_bytes: u64,
        duration_seconds: f64,
        background: BackgroundOutcome,
    ) -> Self {
        Self {
            job_id,
            success: true,
            output_path: Some(output_path),
            size_bytes,
            duration_seconds,
            background: Some(background),
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(job_id: JobId, error: impl Into<String>) -> Self {
        Self {
            job_id,
            success: false,
            output_path: None,
            size_bytes: 0,
            duration_seconds: 0.0,
            background: None,
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_defaults_from_json() {
        let job: RenderJob =
            serde_json::from_str(r#"{"audio_path": "/tmp/a.mp3", "categories": ["city"]}"#)
                .unwrap();
        assert_eq!(job.duration, DEFAULT_REEL_DURATION_SECS);
        assert_eq!(job.canvas, Canvas::default());
        assert!(job.include_logo && job.include_captions && job.include_end_card);
        assert!(!job.job_id.as_str().is_empty());
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_job_validation() {
        let mut job = RenderJob::new("/tmp/a.mp3", vec![]);
        job.duration = 0.0;
        assert!(job.validate().is_err());
        job.duration = 30.0;
        job.canvas.width = 4;
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_job_id_must_be_a_plain_name() {
        let job: RenderJob = serde_json::from_str(
            r#"{"job_id": "../../../etc/cron.d/x", "audio_path": "/tmp/a.mp3"}"#,
        )
        .unwrap();
        let errors = job.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("job_id"));

        let long = "a".repeat(129);
        for bad in ["", "a/b", "a b", "..", "x\\y", long.as_str()] {
            assert!(!JobId::from_string(bad).is_valid(), "{:?}", bad);
        }
        let generated = JobId::new();
        for good in ["job_42", "Promo-7", generated.as_str()] {
            assert!(JobId::from_string(good).is_valid(), "{:?}", good);
        }
    }

    #[test]
    fn test_caption_text() {
        let job = RenderJob::new("/tmp/a.mp3", vec![]);
        assert_eq!(job.caption_text(), None);
        let job = job.with_caption("Nina", "Sunrise");
        assert_eq!(job.caption_text().as_deref(), Some("Nina - Sunrise"));
        let mut job = job;
        job.title = Some("  ".to_string());
        assert_eq!(job.caption_text().as_deref(), Some("Nina"));
    }

    #[test]
    fn test_render_job_schema() {
        let schema = serde_json::to_value(render_job_schema()).unwrap();
        let properties = &schema["properties"];
        assert!(properties.get("audio_path").is_some());
        assert!(properties.get("canvas").is_some());
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|r| r == "audio_path"));
    }

    #[test]
    fn test_result_records() {
        let ok = JobResult::success(
            JobId::from_string("j1"),
            PathBuf::from("/out/j1.mp4"),
            1024,
            30.0,
            BackgroundOutcome::Segments,
        );
        assert!(ok.success);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["background"], "segments");
        assert!(json.get("error").is_none());

        let failed = JobResult::failure(JobId::from_string("j2"), "boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}
