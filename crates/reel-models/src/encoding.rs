//! Video encoding configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default pixel format (widest player compatibility)
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "medium";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 23;
/// Default peak video bitrate
pub const DEFAULT_VIDEO_BITRATE: &str = "2M";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";
/// Default output frame rate
pub const DEFAULT_FPS: u32 = 30;

/// Video encoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264", "h264_nvenc")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Output pixel format
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,

    /// Encoding preset (e.g., "fast", "medium", "slow")
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Constant Rate Factor (quality, 0-51, lower is better)
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Peak video bitrate (`-maxrate`, with a 2x `-bufsize`)
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,

    /// Output frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Audio codec
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Audio bitrate
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// Additional FFmpeg output arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_pixel_format() -> String {
    DEFAULT_PIXEL_FORMAT.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}
fn default_video_bitrate() -> String {
    DEFAULT_VIDEO_BITRATE.to_string()
}
fn default_fps() -> u32 {
    DEFAULT_FPS
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: default_video_codec(),
            pixel_format: default_pixel_format(),
            preset: default_preset(),
            crf: DEFAULT_CRF,
            video_bitrate: default_video_bitrate(),
            fps: DEFAULT_FPS,
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            extra_args: Vec::new(),
        }
    }
}

impl EncodingConfig {
    /// Create a new encoding configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intermediate segments: fast preset, slightly higher quality so the
    /// final pass does not compound losses.
    pub fn for_segments() -> Self {
        Self {
            preset: "veryfast".to_string(),
            crf: 20,
            ..Default::default()
        }
    }

    /// Returns a new config with updated CRF.
    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    /// Returns a new config with updated preset.
    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    /// `-bufsize` value derived from the peak bitrate.
    pub fn buffer_size(&self) -> String {
        let trimmed = self.video_bitrate.trim();
        let (digits, suffix) = trimmed.split_at(
            trimmed
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .unwrap_or(trimmed.len()),
        );
        match digits.parse::<f64>() {
            Ok(value) => format!("{}{}", format_number(value * 2.0), suffix),
            Err(_) => trimmed.to_string(),
        }
    }

    /// Video encoding arguments (codec, pixel format, rate control).
    pub fn video_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-maxrate".to_string(),
            self.video_bitrate.clone(),
            "-bufsize".to_string(),
            self.buffer_size(),
            "-pix_fmt".to_string(),
            self.pixel_format.clone(),
            "-r".to_string(),
            self.fps.to_string(),
        ]
    }

    /// Audio encoding arguments.
    pub fn audio_args(&self) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
        ]
    }

    /// Convert to FFmpeg command arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = self.video_args();
        args.extend(self.audio_args());
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        args.extend(self.extra_args.clone());
        args
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EncodingConfig::default();
        assert_eq!(config.codec, "libx264");
        assert_eq!(config.pixel_format, "yuv420p");
        assert_eq!(config.crf, 23);
    }

    #[test]
    fn test_ffmpeg_args() {
        let config = EncodingConfig::default();
        let args = config.to_ffmpeg_args();
        assert!(args.contains(&"-c:v".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"-pix_fmt".to_string()));
        assert!(args.contains(&"-maxrate".to_string()));
        assert!(args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn test_buffer_size() {
        assert_eq!(EncodingConfig::default().buffer_size(), "4M");
        let config = EncodingConfig {
            video_bitrate: "2500k".to_string(),
            ..Default::default()
        };
        assert_eq!(config.buffer_size(), "5000k");
        let config = EncodingConfig {
            video_bitrate: "1.5M".to_string(),
            ..Default::default()
        };
        assert_eq!(config.buffer_size(), "3M");
    }

    #[test]
    fn test_segment_config() {
        let config = EncodingConfig::for_segments();
        assert_eq!(config.preset, "veryfast");
        assert_eq!(config.codec, DEFAULT_VIDEO_CODEC);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: EncodingConfig = serde_json::from_str(r#"{"crf": 28}"#).unwrap();
        assert_eq!(config.crf, 28);
        assert_eq!(config.audio_bitrate, DEFAULT_AUDIO_BITRATE);
    }
}
