//! Composition request: the root object consumed by the media pipeline.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

use crate::layer::Layer;

/// Seconds before the end at which the closing fade starts.
pub const DEFAULT_FADE_LEAD_SECS: f64 = 8.0;
/// Length of the closing fade-to-black.
pub const DEFAULT_FADE_DURATION_SECS: f64 = 3.0;
/// Default background filter when no style expression is supplied.
pub const DEFAULT_BACKGROUND_FILTER: &str = "hue=s=0";

/// Closing fade-to-black envelope.
///
/// Layers rendered before the fade are inside the envelope; layers flagged
/// `add_after_fade` are composited on top of it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct FadeEnvelope {
    /// Fade starts `lead` seconds before the end of the output.
    #[validate(range(min = 0.0))]
    pub lead: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub duration: f64,
}

impl Default for FadeEnvelope {
    fn default() -> Self {
        Self {
            lead: DEFAULT_FADE_LEAD_SECS,
            duration: DEFAULT_FADE_DURATION_SECS,
        }
    }
}

impl FadeEnvelope {
    /// Fade start for an output of `total` seconds, or `None` when the output
    /// is too short for the fade to fit.
    pub fn start_for(&self, total: f64) -> Option<f64> {
        let start = total - self.lead;
        (start > 0.0).then_some(start)
    }
}

/// Composition validation failure.
#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("Invalid composition: {0}")]
    Invalid(#[from] ValidationErrors),
}

/// A single render request: background + audio + layers -> output file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct Composition {
    /// Background video or still image (input slot 0).
    pub background: PathBuf,
    /// Audio track (input slot 1).
    pub audio: PathBuf,
    /// Overlay layers in insertion order.
    #[validate(nested)]
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[validate(range(min = 1))]
    pub width: u32,
    #[validate(range(min = 1))]
    pub height: u32,
    /// Total output duration in seconds.
    #[validate(range(exclusive_min = 0.0))]
    pub duration: f64,
    pub output: PathBuf,
    /// Stylistic filter expression applied to the background only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_filter: Option<String>,
    #[validate(nested)]
    #[serde(default)]
    pub fade: FadeEnvelope,
}

impl Composition {
    pub fn new(
        background: impl Into<PathBuf>,
        audio: impl Into<PathBuf>,
        width: u32,
        height: u32,
        duration: f64,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            background: background.into(),
            audio: audio.into(),
            layers: Vec::new(),
            width,
            height,
            duration,
            output: output.into(),
            style_filter: None,
            fade: FadeEnvelope::default(),
        }
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn with_layers(mut self, layers: impl IntoIterator<Item = Layer>) -> Self {
        self.layers.extend(layers);
        self
    }

    pub fn with_style_filter(mut self, filter: impl Into<String>) -> Self {
        self.style_filter = Some(filter.into());
        self
    }

    pub fn with_fade(mut self, fade: FadeEnvelope) -> Self {
        self.fade = fade;
        self
    }

    /// Background filter expression (style or default desaturation).
    pub fn background_filter(&self) -> &str {
        self.style_filter
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(DEFAULT_BACKGROUND_FILTER)
    }

    /// Structural validation (sizes, durations, layer ranges).
    ///
    /// File existence is checked by the media pipeline.
    pub fn check(&self) -> Result<(), CompositionError> {
        self.validate()?;
        Ok(())
    }
}
