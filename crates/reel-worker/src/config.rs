//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reel_media::{AudioPolicy, DEFAULT_SEGMENT_SECS};
use reel_models::{Size, TimeWindow};

/// Placement of the fixed overlay slots of a reel.
#[derive(Debug, Clone, PartialEq)]
pub struct ReelLayout {
    /// Corner logo, visible for the whole reel
    pub logo_size: Size,
    pub logo_margin: i32,
    pub logo_opacity: f32,
    pub logo_stack: i32,
    /// Caption line
    pub caption_stack: i32,
    pub caption_window: TimeWindow,
    pub caption_font_size: u32,
    /// Distance of the caption baseline from the bottom edge
    pub caption_bottom_margin: i32,
    /// Closing logo card, drawn over the faded frame
    pub end_card_size: Size,
    pub end_card_stack: i32,
    /// Seconds before the end at which the card appears
    pub end_card_lead: f64,
}

impl Default for ReelLayout {
    fn default() -> Self {
        Self {
            logo_size: Size::new(120, 120),
            logo_margin: 20,
            logo_opacity: 0.5,
            logo_stack: 10,
            caption_stack: 400,
            caption_window: TimeWindow::new(10.0, 12.0),
            caption_font_size: 40,
            caption_bottom_margin: 120,
            end_card_size: Size::new(360, 360),
            end_card_stack: 20,
            end_card_lead: 8.0,
        }
    }
}

impl ReelLayout {
    /// Window of the closing card for a reel of `duration` seconds.
    pub fn end_card_window(&self, duration: f64) -> TimeWindow {
        let lead = self.end_card_lead.min(duration);
        TimeWindow::new(duration - lead, lead)
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent render jobs
    pub max_concurrent_jobs: usize,
    /// Scratch space; each job gets a private subdirectory
    pub work_dir: PathBuf,
    /// Where finished reels and their result records are delivered
    pub output_dir: PathBuf,
    /// Root of the category source pools (`<pool_root>/<category>/`)
    pub pool_root: PathBuf,
    /// Seconds per background segment
    pub segment_duration: f64,
    /// Still image used when no pool source is usable
    pub fallback_image: PathBuf,
    pub logo_path: Option<PathBuf>,
    pub font_path: Option<PathBuf>,
    pub audio_policy: AudioPolicy,
    /// Prometheus listener; metrics stay disabled when unset
    pub metrics_addr: Option<SocketAddr>,
    /// How often the worker scans for orphaned pending jobs
    pub claim_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    pub layout: ReelLayout,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            work_dir: PathBuf::from("/tmp/reel"),
            output_dir: PathBuf::from("/tmp/reel/output"),
            pool_root: PathBuf::from("/var/lib/reel/pools"),
            segment_duration: DEFAULT_SEGMENT_SECS,
            fallback_image: PathBuf::from("/var/lib/reel/fallback.png"),
            logo_path: None,
            font_path: None,
            audio_policy: AudioPolicy::Optional,
            metrics_addr: None,
            claim_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(60),
            layout: ReelLayout::default(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// `required` or `optional`; anything else keeps the default.
pub fn parse_audio_policy(value: &str) -> Option<AudioPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "required" => Some(AudioPolicy::Required),
        "optional" => Some(AudioPolicy::Optional),
        _ => None,
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse::<usize>("WORKER_MAX_JOBS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            work_dir: env_path("WORKER_WORK_DIR").unwrap_or(defaults.work_dir),
            output_dir: env_path("WORKER_OUTPUT_DIR").unwrap_or(defaults.output_dir),
            pool_root: env_path("REEL_POOL_ROOT").unwrap_or(defaults.pool_root),
            segment_duration: env_parse::<f64>("REEL_SEGMENT_SECS")
                .filter(|s| *s > 0.0)
                .unwrap_or(defaults.segment_duration),
            fallback_image: env_path("REEL_FALLBACK_IMAGE").unwrap_or(defaults.fallback_image),
            logo_path: env_path("REEL_LOGO_PATH"),
            font_path: env_path("REEL_FONT_PATH"),
            audio_policy: std::env::var("REEL_AUDIO_POLICY")
                .ok()
                .and_then(|v| parse_audio_policy(&v))
                .unwrap_or(defaults.audio_policy),
            metrics_addr: env_parse("METRICS_ADDR"),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            layout: ReelLayout::default(),
        }
    }
}
