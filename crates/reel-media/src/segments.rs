//! Segment assembler.
//!
//! Cuts short random windows out of categorized source clips, normalizes
//! each one to a canonical format and joins them into a single background
//! video of an exact duration.
//!
//! Category selection:
//! - more than two non-empty categories: balanced counts, shuffled order
//! - one or two non-empty categories: strict alternation
//!
//! Within a category unused sources win; a source is only reused once the
//! pool is exhausted. Remote sources are fetched when first picked, so a
//! run only downloads what it cuts from.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use reel_models::EncodingConfig;

use crate::command::{FfmpegCommand, FfmpegInput, FfmpegRunner};
use crate::encoder::EncoderConfig;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{remove_dir_best_effort, remove_file_best_effort};
use crate::metrics;
use crate::probe::probe_media;

/// Default length of one background segment.
pub const DEFAULT_SEGMENT_SECS: f64 = 5.0;

/// Tolerance when comparing accumulated and target durations.
const DURATION_EPSILON: f64 = 0.01;

/// One background source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceRef {
    Local(PathBuf),
    /// Fetched through the assembler's [`SourceFetcher`] on first pick.
    Remote(String),
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Local(path) => write!(f, "{}", path.display()),
            SourceRef::Remote(url) => f.write_str(url),
        }
    }
}

/// Turns a remote source into a local file.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> MediaResult<PathBuf>;
}

/// Source clips for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePool {
    pub category: String,
    pub sources: Vec<SourceRef>,
}

impl SourcePool {
    pub fn new(category: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        Self {
            category: category.into(),
            sources,
        }
    }

    /// Pool of local files only.
    pub fn local(category: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        Self::new(category, paths.into_iter().map(SourceRef::Local).collect())
    }
}

/// A normalized segment on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub path: PathBuf,
    pub source: PathBuf,
    pub category: String,
    pub start: f64,
    pub duration: f64,
}

/// Number of segments needed to cover `total` seconds.
pub fn segments_needed(total: f64, segment: f64) -> usize {
    if total <= 0.0 || segment <= 0.0 {
        return 0;
    }
    (total / segment).ceil() as usize
}

/// Category index per segment slot, over `pool_count` non-empty pools.
pub fn category_sequence<R: Rng + ?Sized>(pool_count: usize, slots: usize, rng: &mut R) -> Vec<usize> {
    if pool_count == 0 {
        return Vec::new();
    }
    if pool_count <= 2 {
        return (0..slots).map(|i| i % pool_count).collect();
    }

    let base = slots / pool_count;
    let mut counts = vec![base; pool_count];
    let mut order: Vec<usize> = (0..pool_count).collect();
    order.shuffle(rng);
    for &category in order.iter().take(slots % pool_count) {
        counts[category] += 1;
    }

    let mut sequence: Vec<usize> = counts
        .iter()
        .enumerate()
        .flat_map(|(category, &n)| std::iter::repeat(category).take(n))
        .collect();
    sequence.shuffle(rng);
    sequence
}

/// Window `(start, length)` to cut from a source of `source_duration`.
pub fn segment_window<R: Rng + ?Sized>(source_duration: f64, segment: f64, rng: &mut R) -> (f64, f64) {
    if source_duration <= segment {
        return (0.0, source_duration);
    }
    let latest = source_duration - segment;
    (rng.random_range(0.0..=latest), segment)
}

/// Tracks which sources of each pool have been handed out, and where
/// fetched remote sources landed.
#[derive(Debug)]
pub(crate) struct SourcePicker {
    pools: Vec<SourcePool>,
    used: Vec<HashSet<SourceRef>>,
    unusable: HashSet<SourceRef>,
    fetched: HashMap<String, PathBuf>,
}

impl SourcePicker {
    pub(crate) fn new(pools: Vec<SourcePool>) -> Self {
        let used = pools.iter().map(|_| HashSet::new()).collect();
        Self {
            pools,
            used,
            unusable: HashSet::new(),
            fetched: HashMap::new(),
        }
    }

    pub(crate) fn category(&self, pool: usize) -> &str {
        &self.pools[pool].category
    }

    /// Pick a source, preferring ones not yet used and never `exclude`.
    pub(crate) fn pick<R: Rng + ?Sized>(
        &mut self,
        pool: usize,
        exclude: Option<&SourceRef>,
        rng: &mut R,
    ) -> Option<SourceRef> {
        let candidates: Vec<&SourceRef> = self.pools[pool]
            .sources
            .iter()
            .filter(|s| !self.unusable.contains(*s) && Some(*s) != exclude)
            .collect();
        let fresh: Vec<&SourceRef> = candidates
            .iter()
            .copied()
            .filter(|s| !self.used[pool].contains(*s))
            .collect();

        let chosen = if fresh.is_empty() {
            candidates.choose(rng)
        } else {
            fresh.choose(rng)
        }
        .map(|s| (*s).clone())?;

        self.used[pool].insert(chosen.clone());
        Some(chosen)
    }

    pub(crate) fn mark_unusable(&mut self, source: &SourceRef) {
        self.unusable.insert(source.clone());
    }

    pub(crate) fn fetched(&self, url: &str) -> Option<&PathBuf> {
        self.fetched.get(url)
    }

    pub(crate) fn record_fetch(&mut self, url: &str, path: PathBuf) {
        self.fetched.insert(url.to_string(), path);
    }

    pub(crate) fn has_usable(&self) -> bool {
        self.pools
            .iter()
            .flat_map(|p| p.sources.iter())
            .any(|s| !self.unusable.contains(s))
    }
}

/// Builds background videos from source pools.
#[derive(Clone)]
pub struct SegmentAssembler {
    encoder: EncoderConfig,
    runner: FfmpegRunner,
    encoding: EncodingConfig,
    width: u32,
    height: u32,
    work_root: PathBuf,
    fetcher: Option<Arc<dyn SourceFetcher>>,
}

impl SegmentAssembler {
    pub fn new(encoder: EncoderConfig, width: u32, height: u32, work_root: impl Into<PathBuf>) -> Self {
        Self {
            runner: FfmpegRunner::new(encoder.clone()),
            encoder,
            encoding: EncodingConfig::for_segments(),
            width,
            height,
            work_root: work_root.into(),
            fetcher: None,
        }
    }

    /// Fetcher for remote sources; without one they count as unusable.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingConfig) -> Self {
        self.encoding = encoding;
        self
    }

    /// Assemble a background of exactly `total_duration` seconds.
    ///
    /// Returns the path of the joined file (inside the work root); the
    /// per-segment files are removed before returning.
    pub async fn create_video_from_segments(
        &self,
        pools: &[SourcePool],
        total_duration: f64,
        segment_duration: f64,
    ) -> MediaResult<PathBuf> {
        if total_duration <= 0.0 || segment_duration <= 0.0 {
            return Err(MediaError::invalid(format!(
                "segment assembly needs positive durations (total {}, segment {})",
                total_duration, segment_duration
            )));
        }

        let pools: Vec<SourcePool> = pools
            .iter()
            .filter(|p| !p.sources.is_empty())
            .cloned()
            .collect();
        if pools.is_empty() {
            return Err(MediaError::NoUsableSources);
        }

        let tag = uuid::Uuid::new_v4().simple().to_string();
        let work_dir = self.work_root.join(format!("segments_{}", tag));
        let output = self.work_root.join(format!("background_{}.mp4", tag));
        tokio::fs::create_dir_all(&work_dir).await?;

        let result = self
            .assemble(pools, total_duration, segment_duration, &work_dir, &output)
            .await;

        remove_dir_best_effort(&work_dir).await;
        if result.is_err() {
            remove_file_best_effort(&output).await;
        }
        result
    }

    async fn assemble(
        &self,
        pools: Vec<SourcePool>,
        total: f64,
        segment: f64,
        work_dir: &Path,
        output: &Path,
    ) -> MediaResult<PathBuf> {
        let mut rng = StdRng::from_rng(&mut rand::rng());
        let needed = segments_needed(total, segment);
        let sequence = category_sequence(pools.len(), needed, &mut rng);
        let pool_count = pools.len();
        let mut picker = SourcePicker::new(pools);

        // Short sources need extra slots; bound the total attempts.
        let max_slots = needed * 3 + pool_count;
        let mut segments: Vec<Segment> = Vec::new();
        let mut accumulated = 0.0;
        let mut slot = 0;

        while accumulated + DURATION_EPSILON < total && slot < max_slots && picker.has_usable() {
            let pool = sequence.get(slot).copied().unwrap_or(slot % pool_count);
            let index = slot;
            slot += 1;

            let Some(source) = picker.pick(pool, None, &mut rng) else {
                continue;
            };

            let extracted = match self
                .segment_from(&mut picker, &source, index, segment, work_dir, &mut rng)
                .await
            {
                Ok(seg) => Some(seg),
                Err(e) => {
                    warn!(
                        source = %source,
                        category = picker.category(pool),
                        error = %e,
                        "Segment extraction failed, retrying with another source"
                    );
                    metrics::record_segment_failure(picker.category(pool));
                    picker.mark_unusable(&source);
                    self.retry(&mut picker, pool, &source, index, segment, work_dir, &mut rng)
                        .await
                }
            };

            if let Some(mut seg) = extracted {
                seg.category = picker.category(pool).to_string();
                accumulated += seg.duration;
                segments.push(seg);
            }
        }

        if segments.is_empty() {
            return Err(MediaError::NoUsableSources);
        }

        info!(
            segments = segments.len(),
            accumulated_secs = accumulated,
            target_secs = total,
            "Extracted background segments"
        );

        self.join(&segments, accumulated, total, work_dir, output).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn retry(
        &self,
        picker: &mut SourcePicker,
        pool: usize,
        failed: &SourceRef,
        index: usize,
        segment: f64,
        work_dir: &Path,
        rng: &mut StdRng,
    ) -> Option<Segment> {
        let source = picker.pick(pool, Some(failed), rng)?;
        match self
            .segment_from(picker, &source, index, segment, work_dir, rng)
            .await
        {
            Ok(seg) => Some(seg),
            Err(e) => {
                warn!(
                    source = %source,
                    error = %e,
                    "Retry extraction failed, skipping slot"
                );
                metrics::record_segment_failure(picker.category(pool));
                picker.mark_unusable(&source);
                None
            }
        }
    }

    /// Fetch `source` if needed, then cut a segment from it.
    async fn segment_from(
        &self,
        picker: &mut SourcePicker,
        source: &SourceRef,
        index: usize,
        segment: f64,
        work_dir: &Path,
        rng: &mut StdRng,
    ) -> MediaResult<Segment> {
        let path = self.local_path(picker, source).await?;
        self.extract(&path, index, segment, work_dir, rng).await
    }

    /// Local file for `source`. Each remote source is fetched at most once
    /// per run.
    async fn local_path(&self, picker: &mut SourcePicker, source: &SourceRef) -> MediaResult<PathBuf> {
        let url = match source {
            SourceRef::Local(path) => return Ok(path.clone()),
            SourceRef::Remote(url) => url,
        };
        if let Some(path) = picker.fetched(url) {
            return Ok(path.clone());
        }
        let fetcher = self.fetcher.as_ref().ok_or_else(|| {
            MediaError::SourceUnavailable(format!("no fetcher for remote source {}", url))
        })?;
        let path = fetcher.fetch(url).await?;
        picker.record_fetch(url, path.clone());
        Ok(path)
    }

    /// Cut and normalize one segment.
    async fn extract(
        &self,
        source: &Path,
        index: usize,
        segment: f64,
        work_dir: &Path,
        rng: &mut StdRng,
    ) -> MediaResult<Segment> {
        let info = probe_media(&self.encoder, source).await?;
        if !info.has_video || info.duration <= 0.0 {
            return Err(MediaError::InvalidMedia(format!(
                "{} has no usable video",
                source.display()
            )));
        }

        let (start, length) = segment_window(info.duration, segment, rng);
        let path = work_dir.join(format!("seg_{:03}.mp4", index));

        let cmd = FfmpegCommand::new(&path)
            .input(FfmpegInput::file(source).seek(start).duration(length))
            .video_filter(self.canonical_filter())
            .output_args(self.encoding.video_args())
            .no_audio();
        self.runner.run(&cmd).await?;

        debug!(
            source = %source.display(),
            start = start,
            length = length,
            segment = %path.display(),
            "Extracted segment"
        );

        Ok(Segment {
            path,
            source: source.to_path_buf(),
            category: String::new(),
            start,
            duration: length,
        })
    }

    /// Scale/crop to the canvas at a constant frame rate.
    fn canonical_filter(&self) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1,fps={fps},format={pix}",
            w = self.width,
            h = self.height,
            fps = self.encoding.fps,
            pix = self.encoding.pixel_format,
        )
    }

    /// Concat in selection order, trimming or loop-padding to `total`.
    async fn join(
        &self,
        segments: &[Segment],
        accumulated: f64,
        total: f64,
        work_dir: &Path,
        output: &Path,
    ) -> MediaResult<PathBuf> {
        let list = work_dir.join("concat.txt");
        tokio::fs::write(&list, concat_list(segments)).await?;

        if accumulated + DURATION_EPSILON >= total {
            let cmd = self.exact_output(FfmpegInput::concat_list(&list), output, total);
            return self.runner.run(&cmd).await;
        }

        info!(
            accumulated_secs = accumulated,
            target_secs = total,
            "Joined segments short of target, looping"
        );
        let joined = work_dir.join("joined.mp4");
        let concat = FfmpegCommand::new(&joined)
            .input(FfmpegInput::concat_list(&list))
            .output_args(["-c", "copy"])
            .no_audio();
        self.runner.run(&concat).await?;

        let cmd = self.exact_output(FfmpegInput::file(&joined).stream_loop(), output, total);
        self.runner.run(&cmd).await
    }

    fn exact_output(&self, input: FfmpegInput, output: &Path, total: f64) -> FfmpegCommand {
        FfmpegCommand::new(output)
            .input(input)
            .output_args(self.encoding.video_args())
            .output_duration(total)
            .no_audio()
    }
}

/// Concat demuxer list, one `file '<path>'` line per segment.
fn concat_list(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| {
            format!(
                "file '{}'\n",
                s.path.to_string_lossy().replace('\'', "'\\''")
            )
        })
        .collect()
}
