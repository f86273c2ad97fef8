//! Composition pipeline: validate, plan inputs, build graph, build command,
//! run, probe the result.

pub mod command_builder;
pub mod graph_builder;
pub mod input_plan;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

use reel_models::{Composition, EncodingConfig};

use crate::command::FfmpegRunner;
use crate::encoder::EncoderConfig;
use crate::error::{MediaError, MediaResult};
use crate::metrics;
use crate::probe::{probe_media, MediaKind};

pub use command_builder::{
    build_command, resolve_output_label, AudioPolicy, AudioTrack, BuiltCommand, LabelFallback,
};
pub use graph_builder::{build_filter_graph, BuiltGraph, RenderPass, RenderStep};
pub use input_plan::{render_order, BackgroundInput, InputPlan, SkipReason, SkippedLayer};

/// Pipeline-wide settings.
#[derive(Debug, Clone)]
pub struct ComposeOptions {
    pub encoder: EncoderConfig,
    pub encoding: EncodingConfig,
    pub audio_policy: AudioPolicy,
}

impl ComposeOptions {
    pub fn new(encoder: EncoderConfig) -> Self {
        Self {
            encoder,
            encoding: EncodingConfig::default(),
            audio_policy: AudioPolicy::default(),
        }
    }

    pub fn with_encoding(mut self, encoding: EncodingConfig) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_audio_policy(mut self, policy: AudioPolicy) -> Self {
        self.audio_policy = policy;
        self
    }
}

/// Result of a successful composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeOutput {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration_seconds: f64,
    pub resolution: (u32, u32),
    /// Set when the output label had to fall back.
    pub label_fallback: Option<LabelFallback>,
    /// Layers left out (missing source or never visible).
    pub skipped_layers: usize,
}

/// Structural validation plus on-disk checks for background and audio.
pub fn validate_inputs(composition: &Composition) -> MediaResult<()> {
    composition.check()?;
    for path in [&composition.background, &composition.audio] {
        if !path.is_file() {
            return Err(MediaError::FileNotFound(path.clone()));
        }
    }
    Ok(())
}

/// Render a composition to its output path.
pub async fn compose(composition: &Composition, options: &ComposeOptions) -> MediaResult<ComposeOutput> {
    let started = Instant::now();
    let result = run_pipeline(composition, options).await;
    let outcome = match &result {
        Ok(_) => "success",
        Err(e) if e.is_validation() => "invalid",
        Err(_) => "failed",
    };
    metrics::record_composition(outcome, started.elapsed().as_secs_f64());
    result
}

async fn run_pipeline(
    composition: &Composition,
    options: &ComposeOptions,
) -> MediaResult<ComposeOutput> {
    validate_inputs(composition)?;

    let background_duration = match MediaKind::from_path(&composition.background) {
        MediaKind::StillImage => None,
        MediaKind::Video => Some(probe_media(&options.encoder, &composition.background).await?.duration),
    };
    let background_input =
        BackgroundInput::detect(&composition.background, background_duration, composition.duration);

    let audio_info = probe_media(&options.encoder, &composition.audio).await?;
    let audio = AudioTrack {
        policy: options.audio_policy,
        present: audio_info.has_audio,
    };
    if !audio.present {
        warn!(audio = %composition.audio.display(), "Audio input has no audio stream");
    }

    let plan = InputPlan::new(composition, background_input);
    let built = build_filter_graph(composition, &plan, &options.encoding)?;
    let command = build_command(composition, &built, &plan, &options.encoding, audio)?;

    if let Some(fallback) = command.fallback {
        metrics::record_label_fallback(fallback);
    }

    info!(
        output = %composition.output.display(),
        layers = composition.layers.len(),
        inputs = plan.input_count(),
        stages = built.graph.stages().len(),
        mapped_label = %command.mapped_label,
        "Starting composition"
    );

    if let Some(parent) = composition.output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let runner = FfmpegRunner::new(options.encoder.clone());
    let total_ms = (composition.duration * 1000.0) as i64;
    let path = runner
        .run_with_progress(&command.command, move |p| {
            debug!(
                percent = p.percentage(total_ms),
                eta_secs = ?p.eta_seconds(total_ms),
                "Composition progress"
            );
        })
        .await?;

    let info = probe_media(&options.encoder, &path).await?;

    Ok(ComposeOutput {
        path,
        size_bytes: info.size,
        duration_seconds: info.duration,
        resolution: (info.width, info.height),
        label_fallback: command.fallback,
        skipped_layers: built.skipped.len(),
    })
}
