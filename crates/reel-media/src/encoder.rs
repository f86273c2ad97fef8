//! Encoder binary discovery.
//!
//! The encoder and probe binaries are resolved once, at startup, and passed
//! explicitly to everything that spawns them.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Environment variable overriding the FFmpeg binary.
pub const FFMPEG_PATH_ENV: &str = "FFMPEG_PATH";
/// Environment variable overriding the FFprobe binary.
pub const FFPROBE_PATH_ENV: &str = "FFPROBE_PATH";

/// Paths to the encoder and probe binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub binary_path: PathBuf,
    pub probe_binary_path: PathBuf,
}

impl EncoderConfig {
    /// Use explicit binary paths.
    pub fn new(binary_path: impl Into<PathBuf>, probe_binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            probe_binary_path: probe_binary_path.into(),
        }
    }

    /// Resolve binaries from `FFMPEG_PATH`/`FFPROBE_PATH`, falling back to `PATH`.
    pub fn discover() -> MediaResult<Self> {
        let binary_path = resolve_binary(
            std::env::var_os(FFMPEG_PATH_ENV).map(PathBuf::from),
            "ffmpeg",
        )
        .ok_or(MediaError::FfmpegNotFound)?;
        let probe_binary_path = resolve_binary(
            std::env::var_os(FFPROBE_PATH_ENV).map(PathBuf::from),
            "ffprobe",
        )
        .ok_or(MediaError::FfprobeNotFound)?;

        debug!(
            ffmpeg = %binary_path.display(),
            ffprobe = %probe_binary_path.display(),
            "Resolved encoder binaries"
        );

        Ok(Self {
            binary_path,
            probe_binary_path,
        })
    }

    /// Whether both binaries currently exist.
    pub fn is_available(&self) -> bool {
        self.binary_path.exists() && self.probe_binary_path.exists()
    }
}

/// An explicit override wins when it points at an existing file; a bare
/// command name in the override is looked up on `PATH`.
fn resolve_binary(override_path: Option<PathBuf>, default_name: &str) -> Option<PathBuf> {
    if let Some(path) = override_path.filter(|p| !p.as_os_str().is_empty()) {
        if path.is_file() {
            return Some(path);
        }
        if path.components().count() == 1 {
            return which::which(&path).ok();
        }
        return None;
    }
    which::which(default_name).ok()
}

/// Render a command line for debug logs.
pub(crate) fn display_command(binary: &Path, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(binary.display().to_string());
    for arg in args {
        if arg.contains(' ') || arg.contains(';') {
            parts.push(format!("\"{}\"", arg));
        } else {
            parts.push(arg.clone());
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_override_must_exist() {
        assert!(resolve_binary(Some(PathBuf::from("/definitely/not/ffmpeg")), "ffmpeg").is_none());
    }

    #[test]
    fn test_override_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("ffmpeg-custom");
        std::fs::write(&bin, b"").unwrap();
        assert_eq!(resolve_binary(Some(bin.clone()), "ffmpeg"), Some(bin));
    }

    #[test]
    fn test_display_command_quotes_graph() {
        let rendered = display_command(
            Path::new("/usr/bin/ffmpeg"),
            &["-filter_complex".to_string(), "[0:v]null[a];[a]null[b]".to_string()],
        );
        assert_eq!(
            rendered,
            "/usr/bin/ffmpeg -filter_complex \"[0:v]null[a];[a]null[b]\""
        );
    }
}
