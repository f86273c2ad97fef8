//! Timed visual layers composited over the background.
//!
//! A [`Layer`] describes one overlay slot of a reel: what it shows, where,
//! how large, how opaque, when, and whether it survives the closing fade.
//! Layers are plain data; the media crate turns them into filter stages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Default font size for text layers (pixels).
pub const DEFAULT_FONT_SIZE: u32 = 48;
/// Default text color.
pub const DEFAULT_TEXT_COLOR: &str = "white";
/// Default line height multiplier for text layers.
pub const DEFAULT_LINE_HEIGHT: f32 = 1.2;

/// Kind of a layer. Determines scaling behavior and the rendering primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Background,
    Image,
    Video,
    Text,
}

impl LayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Background => "background",
            LayerKind::Image => "image",
            LayerKind::Video => "video",
            LayerKind::Text => "text",
        }
    }

    /// Whether layers of this kind are backed by a file on disk.
    pub fn is_file_backed(&self) -> bool {
        !matches!(self, LayerKind::Text)
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a layer's content comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum LayerSource {
    /// Local file (image or video).
    File(PathBuf),
    /// Literal text content.
    Text(String),
}

impl LayerSource {
    /// File path, if this source is file-backed.
    pub fn path(&self) -> Option<&Path> {
        match self {
            LayerSource::File(path) => Some(path),
            LayerSource::Text(_) => None,
        }
    }

    /// Text content, if this is a text source.
    pub fn text(&self) -> Option<&str> {
        match self {
            LayerSource::Text(text) => Some(text),
            LayerSource::File(_) => None,
        }
    }
}

/// Horizontal placement. `Center` is the canvas-center sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HorizontalPosition {
    /// Literal x coordinate of the left edge.
    At(i32),
    /// Center the layer horizontally on the canvas.
    Center,
}

impl Default for HorizontalPosition {
    fn default() -> Self {
        HorizontalPosition::At(0)
    }
}

/// Top-left coordinate in canvas space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Position {
    pub x: HorizontalPosition,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x: HorizontalPosition::At(x),
            y,
        }
    }

    /// Horizontally centered at the given y.
    pub fn centered(y: i32) -> Self {
        Self {
            x: HorizontalPosition::Center,
            y,
        }
    }
}

/// Target size in pixels, before the layer's uniform scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct Size {
    #[validate(range(min = 1))]
    pub width: u32,
    #[validate(range(min = 1))]
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Apply a uniform scale factor, rounding and clamping to at least 1px.
    pub fn scaled(&self, factor: f32) -> Size {
        let apply = |v: u32| ((v as f32 * factor).round() as i64).max(1) as u32;
        Size {
            width: apply(self.width),
            height: apply(self.height),
        }
    }
}

/// Visibility window `[start, start + duration]` in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct TimeWindow {
    #[validate(range(min = 0.0))]
    pub start: f64,
    #[validate(range(min = 0.0))]
    pub duration: f64,
}

impl TimeWindow {
    pub fn new(start: f64, duration: f64) -> Self {
        Self { start, duration }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Whether `t` falls inside the window (inclusive on both ends).
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end()
    }

    /// Clamp the window to a composition of `total` seconds.
    ///
    /// Returns `None` when the window never becomes visible.
    pub fn clamp_to(&self, total: f64) -> Option<TimeWindow> {
        if self.start >= total || self.duration <= 0.0 {
            return None;
        }
        Some(TimeWindow {
            start: self.start,
            duration: self.duration.min(total - self.start),
        })
    }

    /// Whether the window covers the whole `[0, total]` range.
    pub fn covers(&self, total: f64) -> bool {
        self.start <= 0.0 && self.end() >= total
    }
}

/// Blend operation used by video layers instead of positional overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    Overlay,
    Screen,
    Multiply,
    Softlight,
    Addition,
    Lighten,
    Darken,
}

impl BlendMode {
    /// Name understood by the encoder's blend stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlendMode::Overlay => "overlay",
            BlendMode::Screen => "screen",
            BlendMode::Multiply => "multiply",
            BlendMode::Softlight => "softlight",
            BlendMode::Addition => "addition",
            BlendMode::Lighten => "lighten",
            BlendMode::Darken => "darken",
        }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BlendMode {
    type Err = BlendModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "overlay" => Ok(BlendMode::Overlay),
            "screen" => Ok(BlendMode::Screen),
            "multiply" => Ok(BlendMode::Multiply),
            "softlight" | "soft_light" => Ok(BlendMode::Softlight),
            "addition" | "add" => Ok(BlendMode::Addition),
            "lighten" => Ok(BlendMode::Lighten),
            "darken" => Ok(BlendMode::Darken),
            _ => Err(BlendModeParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown blend mode: {0}")]
pub struct BlendModeParseError(String);

/// Styling for text layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct TextStyle {
    /// Font file; the encoder's default font is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_path: Option<PathBuf>,
    #[validate(range(min = 1))]
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_text_color")]
    pub text_color: String,
    #[validate(range(min = 0.0))]
    #[serde(default = "default_line_height")]
    pub line_height: f32,
}

fn default_font_size() -> u32 {
    DEFAULT_FONT_SIZE
}
fn default_text_color() -> String {
    DEFAULT_TEXT_COLOR.to_string()
}
fn default_line_height() -> f32 {
    DEFAULT_LINE_HEIGHT
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_path: None,
            font_size: DEFAULT_FONT_SIZE,
            text_color: DEFAULT_TEXT_COLOR.to_string(),
            line_height: DEFAULT_LINE_HEIGHT,
        }
    }
}

/// A timed visual element to be composited.
///
/// Build with [`Layer::image`], [`Layer::video`] or [`Layer::text`] and the
/// `with_*` methods:
/// ```
/// use reel_models::{Layer, Position, Size, TimeWindow};
///
/// let logo = Layer::image("/tmp/logo.png")
///     .with_position(Position::new(20, 20))
///     .with_size(Size::new(160, 160))
///     .with_opacity(0.5)
///     .with_stack_order(10);
/// assert!(logo.needs_alpha());
///
/// let caption = Layer::text("Artist - Title")
///     .with_position(Position::centered(600))
///     .with_window(TimeWindow::new(10.0, 12.0))
///     .with_stack_order(400);
/// assert!(caption.is_visible_at(12.0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[validate(schema(function = "validate_layer_shape"))]
pub struct Layer {
    pub kind: LayerKind,
    pub source: LayerSource,
    #[serde(default)]
    pub position: Position,
    #[validate(nested)]
    pub size: Size,
    /// Uniform scale factor applied on top of `size`.
    #[validate(range(exclusive_min = 0.0))]
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    /// Z-index; lower renders first (bottom).
    #[serde(default)]
    pub stack_order: i32,
    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blend_mode: Option<BlendMode>,
    /// Render after the global fade-out instead of inside it.
    #[serde(default)]
    pub add_after_fade: bool,
    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_style: Option<TextStyle>,
}

fn default_scale() -> f32 {
    1.0
}
fn default_opacity() -> f32 {
    1.0
}

fn validate_layer_shape(layer: &Layer) -> Result<(), ValidationError> {
    let consistent = match (layer.kind, &layer.source) {
        (LayerKind::Text, LayerSource::Text(_)) => true,
        (LayerKind::Text, LayerSource::File(_)) => false,
        (_, LayerSource::File(_)) => true,
        (_, LayerSource::Text(_)) => false,
    };
    if !consistent {
        return Err(ValidationError::new("layer_source_mismatch"));
    }
    if layer.kind == LayerKind::Background {
        return Err(ValidationError::new("background_is_not_a_layer"));
    }
    Ok(())
}

impl Layer {
    fn new(kind: LayerKind, source: LayerSource) -> Self {
        Self {
            kind,
            source,
            position: Position::default(),
            size: Size::new(100, 100),
            scale: 1.0,
            opacity: 1.0,
            stack_order: 0,
            time_window: None,
            blend_mode: None,
            add_after_fade: false,
            text_style: None,
        }
    }

    /// Still image overlay (logo, badge).
    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self::new(LayerKind::Image, LayerSource::File(path.into()))
    }

    /// Video overlay.
    pub fn video(path: impl Into<PathBuf>) -> Self {
        Self::new(LayerKind::Video, LayerSource::File(path.into()))
    }

    /// Text overlay with default styling.
    pub fn text(content: impl Into<String>) -> Self {
        let mut layer = Self::new(LayerKind::Text, LayerSource::Text(content.into()));
        layer.text_style = Some(TextStyle::default());
        layer
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn with_size(mut self, size: Size) -> Self {
        self.size = size;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Set opacity (clamped to 0.0..=1.0).
    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    pub fn with_stack_order(mut self, stack_order: i32) -> Self {
        self.stack_order = stack_order;
        self
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }

    pub fn with_blend_mode(mut self, mode: BlendMode) -> Self {
        self.blend_mode = Some(mode);
        self
    }

    pub fn after_fade(mut self, add_after_fade: bool) -> Self {
        self.add_after_fade = add_after_fade;
        self
    }

    pub fn with_text_style(mut self, style: TextStyle) -> Self {
        self.text_style = Some(style);
        self
    }

    pub fn with_font(mut self, font_path: impl Into<PathBuf>) -> Self {
        self.text_style
            .get_or_insert_with(TextStyle::default)
            .font_path = Some(font_path.into());
        self
    }

    pub fn with_font_size(mut self, font_size: u32) -> Self {
        self.text_style.get_or_insert_with(TextStyle::default).font_size = font_size;
        self
    }

    pub fn with_text_color(mut self, color: impl Into<String>) -> Self {
        self.text_style.get_or_insert_with(TextStyle::default).text_color = color.into();
        self
    }

    /// Final rendered size (size x scale).
    pub fn final_size(&self) -> Size {
        self.size.scaled(self.scale)
    }

    /// Opacity below 1.0 needs a separate alpha-remap stage.
    pub fn needs_alpha(&self) -> bool {
        self.opacity < 1.0
    }

    /// Blend is only honoured for video layers.
    pub fn effective_blend(&self) -> Option<BlendMode> {
        match self.kind {
            LayerKind::Video => self.blend_mode,
            _ => None,
        }
    }

    /// Whether the layer is visible at time `t`.
    pub fn is_visible_at(&self, t: f64) -> bool {
        self.time_window.map_or(true, |w| w.contains(t))
    }

    /// Whether the layer can ever appear in a composition of `total` seconds.
    pub fn is_ever_visible(&self, total: f64) -> bool {
        match self.time_window {
            Some(window) => window.clamp_to(total).is_some(),
            None => true,
        }
    }
}
