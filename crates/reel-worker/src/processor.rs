//! Render job processing.
//!
//! One job: resolve source pools, assemble the background (or fall back to
//! the still image), lay out the fixed overlay slots, compose, deliver the
//! output and its result record.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use validator::Validate;

use reel_media::fs_utils::remove_dir_best_effort;
use reel_media::{
    compose, move_file, ComposeOptions, ComposeOutput, EncoderConfig, MediaError,
    SegmentAssembler,
};
use reel_models::{
    BackgroundOutcome, Composition, JobResult, Layer, Position, RenderJob, Size, StylePreset,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pools::{list_pools, DirectoryPools, SourcePools, SourceResolver};

/// Shared state for all jobs handled by one worker.
pub struct ProcessingContext {
    pub config: WorkerConfig,
    pub encoder: EncoderConfig,
    pub pools: Arc<dyn SourcePools>,
    pub http: reqwest::Client,
}

impl ProcessingContext {
    /// Discover the encoder and open the directory pools from `config`.
    pub fn new(config: WorkerConfig) -> WorkerResult<Self> {
        let encoder = EncoderConfig::discover()?;
        let pools = Arc::new(DirectoryPools::new(config.pool_root.clone()));
        Ok(Self::with_parts(config, encoder, pools))
    }

    pub fn with_parts(
        config: WorkerConfig,
        encoder: EncoderConfig,
        pools: Arc<dyn SourcePools>,
    ) -> Self {
        Self {
            config,
            encoder,
            pools,
            http: reqwest::Client::new(),
        }
    }

    fn compose_options(&self) -> ComposeOptions {
        ComposeOptions::new(self.encoder.clone()).with_audio_policy(self.config.audio_policy)
    }
}

/// Fixed overlay slots for a job: corner logo, caption, closing card.
pub fn build_layers(job: &RenderJob, config: &WorkerConfig) -> Vec<Layer> {
    let layout = &config.layout;
    let canvas = job.canvas;
    let mut layers = Vec::new();

    if let Some(logo) = &config.logo_path {
        if job.include_logo {
            layers.push(
                Layer::image(logo)
                    .with_position(Position::new(layout.logo_margin, layout.logo_margin))
                    .with_size(layout.logo_size)
                    .with_opacity(layout.logo_opacity)
                    .with_stack_order(layout.logo_stack),
            );
        }

        if job.include_end_card {
            let edge = layout
                .end_card_size
                .width
                .min(canvas.width / 2)
                .min(canvas.height / 2);
            let y = (canvas.height.saturating_sub(edge) / 2) as i32;
            layers.push(
                Layer::image(logo)
                    .with_position(Position::centered(y))
                    .with_size(Size::new(edge, edge))
                    .with_stack_order(layout.end_card_stack)
                    .with_window(layout.end_card_window(job.duration))
                    .after_fade(true),
            );
        }
    }

    if job.include_captions {
        if let Some(text) = job.caption_text() {
            let y = (canvas.height as i32 - layout.caption_bottom_margin).max(0);
            let mut caption = Layer::text(text)
                .with_position(Position::centered(y))
                .with_font_size(layout.caption_font_size)
                .with_window(layout.caption_window)
                .with_stack_order(layout.caption_stack);
            if let Some(font) = &config.font_path {
                caption = caption.with_font(font);
            }
            layers.push(caption);
        }
    }

    layers
}

/// Final location of a job's video.
pub fn output_path(output_dir: &Path, job: &RenderJob) -> PathBuf {
    output_dir.join(format!("{}.mp4", job.job_id))
}

/// Result record location; sits next to the video.
pub fn result_path(output_dir: &Path, job_id: &reel_models::JobId) -> PathBuf {
    output_dir.join(format!("{}.json", job_id))
}

/// Write a result record as pretty JSON.
pub async fn write_result(output_dir: &Path, result: &JobResult) -> WorkerResult<PathBuf> {
    if !result.job_id.is_valid() {
        return Err(WorkerError::invalid_job(format!(
            "job id {:?} is not a plain file name",
            result.job_id.as_str()
        )));
    }
    tokio::fs::create_dir_all(output_dir).await?;
    let path = result_path(output_dir, &result.job_id);
    let json = serde_json::to_vec_pretty(result)?;
    tokio::fs::write(&path, json).await?;
    Ok(path)
}

/// Render one promo reel and deliver it to the output directory.
pub async fn render_promo(ctx: &ProcessingContext, job: &RenderJob) -> WorkerResult<JobResult> {
    let logger = JobLogger::new(&job.job_id, "render_promo");
    logger.log_start(&format!(
        "{}s reel, {} categories",
        job.duration,
        job.categories.len()
    ));

    job.validate()
        .map_err(|e| WorkerError::invalid_job(e.to_string()))?;

    let work_dir = ctx.config.work_dir.join(format!(
        "{}_{}",
        job.job_id,
        uuid::Uuid::new_v4().simple()
    ));
    tokio::fs::create_dir_all(&work_dir).await?;

    let result = render_in(ctx, job, &work_dir, &logger).await;
    remove_dir_best_effort(&work_dir).await;

    match &result {
        Ok(r) => logger.log_completion(&format!("{} bytes delivered", r.size_bytes)),
        Err(e) => logger.log_error(&e.to_string()),
    }
    result
}

async fn render_in(
    ctx: &ProcessingContext,
    job: &RenderJob,
    work_dir: &Path,
    logger: &JobLogger,
) -> WorkerResult<JobResult> {
    let (preset, known) = StylePreset::resolve(job.style.as_deref());
    if !known {
        logger.log_warning(&format!(
            "unknown style {:?}, using {}",
            job.style.as_deref().unwrap_or_default(),
            preset
        ));
    }

    let (background, outcome) = prepare_background(ctx, job, work_dir, logger).await?;
    metrics::record_background(outcome);

    let composition = Composition::new(
        &background,
        &job.audio_path,
        job.canvas.width,
        job.canvas.height,
        job.duration,
        work_dir.join("render.mp4"),
    )
    .with_layers(build_layers(job, &ctx.config))
    .with_style_filter(preset.filter_expression());

    logger.log_step("compose", &format!("{} layers", composition.layers.len()));
    let output: ComposeOutput = compose(&composition, &ctx.compose_options()).await?;

    if let Some(fallback) = output.label_fallback {
        logger.log_warning(&format!("output label fell back to {:?}", fallback));
    }
    if output.skipped_layers > 0 {
        logger.log_warning(&format!("{} layers skipped", output.skipped_layers));
    }

    let delivered = move_file(&output.path, output_path(&ctx.config.output_dir, job)).await?;
    let result = JobResult::success(
        job.job_id.clone(),
        delivered,
        output.size_bytes,
        output.duration_seconds,
        outcome,
    );
    write_result(&ctx.config.output_dir, &result).await?;
    Ok(result)
}

/// Background track: segments from the pools, or the still fallback image
/// when no pool source yields a segment.
async fn prepare_background(
    ctx: &ProcessingContext,
    job: &RenderJob,
    work_dir: &Path,
    logger: &JobLogger,
) -> WorkerResult<(PathBuf, BackgroundOutcome)> {
    let pools = list_pools(ctx.pools.as_ref(), &job.categories).await?;

    logger.log_step(
        "segments",
        &format!(
            "{} sources across {} pools",
            pools.iter().map(|p| p.sources.len()).sum::<usize>(),
            pools.len()
        ),
    );

    let resolver = SourceResolver::new(ctx.http.clone(), work_dir.join("sources"));
    let assembler = SegmentAssembler::new(
        ctx.encoder.clone(),
        job.canvas.width,
        job.canvas.height,
        work_dir,
    )
    .with_fetcher(Arc::new(resolver));
    match assembler
        .create_video_from_segments(&pools, job.duration, ctx.config.segment_duration)
        .await
    {
        Ok(path) => Ok((path, BackgroundOutcome::Segments)),
        Err(MediaError::NoUsableSources) => {
            let fallback = &ctx.config.fallback_image;
            if !fallback.is_file() {
                return Err(WorkerError::config_error(format!(
                    "no usable background source and fallback image {} is missing",
                    fallback.display()
                )));
            }
            logger.log_warning("no usable background source, using fallback image");
            Ok((fallback.clone(), BackgroundOutcome::StaticFallback))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{JobId, LayerKind, TimeWindow};
    use tempfile::TempDir;

    fn config_with_logo() -> WorkerConfig {
        WorkerConfig {
            logo_path: Some(PathBuf::from("/assets/logo.png")),
            font_path: Some(PathBuf::from("/assets/font.ttf")),
            ..WorkerConfig::default()
        }
    }

    #[test]
    fn test_build_layers_full_reel() {
        let job = RenderJob::new("/a.mp3", vec!["city".into()]).with_caption("Nina", "Sunrise");
        let layers = build_layers(&job, &config_with_logo());
        assert_eq!(layers.len(), 3);

        let logo = &layers[0];
        assert_eq!(logo.kind, LayerKind::Image);
        assert_eq!(logo.opacity, 0.5);
        assert_eq!(logo.stack_order, 10);
        assert!(logo.time_window.is_none());
        assert!(!logo.add_after_fade);

        let end_card = &layers[1];
        assert_eq!(end_card.stack_order, 20);
        assert_eq!(end_card.time_window, Some(TimeWindow::new(22.0, 8.0)));
        assert!(end_card.add_after_fade);
        assert_eq!(end_card.size, Size::new(360, 360));
        assert_eq!(end_card.position, Position::centered(180));

        let caption = &layers[2];
        assert_eq!(caption.kind, LayerKind::Text);
        assert_eq!(caption.source.text(), Some("Nina - Sunrise"));
        assert_eq!(caption.stack_order, 400);
        assert_eq!(caption.time_window, Some(TimeWindow::new(10.0, 12.0)));
        assert_eq!(
            caption.text_style.as_ref().and_then(|s| s.font_path.clone()),
            Some(PathBuf::from("/assets/font.ttf"))
        );
        assert!(!caption.add_after_fade);
    }

    #[test]
    fn test_build_layers_respects_toggles() {
        let mut job = RenderJob::new("/a.mp3", vec![]).with_caption("Nina", "Sunrise");
        job.include_logo = false;
        job.include_end_card = false;
        let layers = build_layers(&job, &config_with_logo());
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].kind, LayerKind::Text);

        // No caption text, no logo configured
        let job = RenderJob::new("/a.mp3", vec![]);
        assert!(build_layers(&job, &WorkerConfig::default()).is_empty());
    }

    #[test]
    fn test_end_card_fits_small_canvas() {
        let mut job = RenderJob::new("/a.mp3", vec![]);
        job.canvas.width = 400;
        job.canvas.height = 300;
        job.include_logo = false;
        let layers = build_layers(&job, &config_with_logo());
        assert_eq!(layers[0].size, Size::new(150, 150));
        assert_eq!(layers[0].position, Position::centered(75));
    }

    #[tokio::test]
    async fn test_write_result_next_to_output() {
        let dir = TempDir::new().unwrap();
        let job = RenderJob::new("/a.mp3", vec![]);
        let result = JobResult::failure(job.job_id.clone(), "encoder crashed");

        let path = write_result(dir.path(), &result).await.unwrap();
        assert_eq!(path, result_path(dir.path(), &job.job_id));
        assert_eq!(
            output_path(dir.path(), &job).with_extension("json"),
            path
        );

        let stored: JobResult = serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert!(!stored.success);
        assert_eq!(stored.error.as_deref(), Some("encoder crashed"));
    }

    #[tokio::test]
    async fn test_invalid_job_rejected_before_rendering() {
        let dir = TempDir::new().unwrap();
        let config = WorkerConfig {
            work_dir: dir.path().join("work"),
            output_dir: dir.path().join("out"),
            ..WorkerConfig::default()
        };
        let ctx = ProcessingContext::with_parts(
            config,
            EncoderConfig::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe"),
            Arc::new(DirectoryPools::new(dir.path().join("pools"))),
        );

        let mut job = RenderJob::new("/a.mp3", vec!["city".into()]);
        job.duration = -1.0;
        let err = render_promo(&ctx, &job).await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidJob(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_traversal_job_id_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let config = WorkerConfig {
            work_dir: dir.path().join("work"),
            output_dir: dir.path().join("out"),
            ..WorkerConfig::default()
        };
        let ctx = ProcessingContext::with_parts(
            config,
            EncoderConfig::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe"),
            Arc::new(DirectoryPools::new(dir.path().join("pools"))),
        );

        let mut job = RenderJob::new("/a.mp3", vec!["city".into()]);
        job.job_id = JobId::from_string("../../escaped");
        let err = render_promo(&ctx, &job).await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidJob(_)));
        assert!(!dir.path().join("work").exists());

        // The dead-letter record for the same job is refused too
        let record = JobResult::failure(job.job_id.clone(), "invalid job");
        let err = write_result(&dir.path().join("out"), &record).await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidJob(_)));
        assert!(!dir.path().join("out").exists());
        assert!(!dir.path().parent().unwrap().join("escaped.json").exists());
    }

    #[tokio::test]
    async fn test_empty_pools_without_fallback_is_config_error() {
        let dir = TempDir::new().unwrap();
        let config = WorkerConfig {
            work_dir: dir.path().join("work"),
            output_dir: dir.path().join("out"),
            fallback_image: dir.path().join("missing.png"),
            ..WorkerConfig::default()
        };
        let ctx = ProcessingContext::with_parts(
            config,
            EncoderConfig::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe"),
            Arc::new(DirectoryPools::new(dir.path().join("pools"))),
        );

        let job = RenderJob::new("/a.mp3", vec!["city".into()]);
        let err = render_promo(&ctx, &job).await.unwrap_err();
        assert!(matches!(err, WorkerError::ConfigError(_)));

        // Work directories are cleaned up on failure
        let mut entries = tokio::fs::read_dir(dir.path().join("work")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
        assert!(!output_path(&dir.path().join("out"), &job).exists());
    }
}
