//! FFmpeg command builder and runner.
//!
//! [`FfmpegCommand`] is a multi-input argument builder; [`FfmpegRunner`] is
//! the process executor. A run only succeeds when the encoder exits with
//! status 0 *and* the output file exists.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::encoder::{display_command, EncoderConfig};
use crate::error::{MediaError, MediaResult};
use crate::metrics;
use crate::progress::{parse_progress_line, FfmpegProgress};

/// Default number of diagnostic lines kept for error excerpts.
pub const DEFAULT_DIAGNOSTIC_LINES: usize = 8;

/// One encoder input: its input options followed by `-i <source>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegInput {
    args: Vec<String>,
    source: String,
}

impl FfmpegInput {
    /// A file input.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            args: Vec::new(),
            source: path.as_ref().to_string_lossy().to_string(),
        }
    }

    /// A libavfilter virtual input (e.g. `color=c=black:s=720x720`).
    pub fn lavfi(expression: impl Into<String>) -> Self {
        Self {
            args: vec!["-f".to_string(), "lavfi".to_string()],
            source: expression.into(),
        }
    }

    /// Concat demuxer input from a list file.
    pub fn concat_list(list: impl AsRef<Path>) -> Self {
        Self {
            args: vec![
                "-f".to_string(),
                "concat".to_string(),
                "-safe".to_string(),
                "0".to_string(),
            ],
            source: list.as_ref().to_string_lossy().to_string(),
        }
    }

    /// Add an input option (placed before `-i`).
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Seek before decoding.
    pub fn seek(self, seconds: f64) -> Self {
        self.arg("-ss").arg(format!("{:.3}", seconds))
    }

    /// Limit the amount of input read.
    pub fn duration(self, seconds: f64) -> Self {
        self.arg("-t").arg(format!("{:.3}", seconds))
    }

    /// Repeat a still image as a video stream.
    pub fn loop_image(self, fps: u32) -> Self {
        self.arg("-loop")
            .arg("1")
            .arg("-framerate")
            .arg(fps.to_string())
    }

    /// Loop the whole input stream forever (trimmed by the output duration).
    pub fn stream_loop(self) -> Self {
        self.arg("-stream_loop").arg("-1")
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Inputs in slot order
    inputs: Vec<FfmpegInput>,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after the inputs)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a command writing to `output`; add inputs with [`Self::input`].
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Single-input command.
    pub fn single(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self::new(output).input(FfmpegInput::file(input))
    }

    /// Append an input; its slot index is the number of inputs before it.
    pub fn input(mut self, input: FfmpegInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Add output arguments (after the inputs).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set audio filter.
    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-af").output_arg(filter)
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Map a stream or graph label to the output.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Hard-trim the output duration.
    pub fn output_duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.3}", seconds))
    }

    /// Set output resolution.
    pub fn resolution(self, width: u32, height: u32) -> Self {
        self.output_arg("-s").output_arg(format!("{}x{}", width, height))
    }

    /// Drop audio from the output.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn inputs(&self) -> &[FfmpegInput] {
        &self.inputs
    }

    /// The attached filter graph text, if any.
    pub fn filter_graph(&self) -> Option<&str> {
        self.output_args
            .iter()
            .position(|a| a == "-filter_complex")
            .and_then(|i| self.output_args.get(i + 1))
            .map(String::as_str)
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-nostats".to_string());

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress goes to stdout; stderr stays diagnostics-only
        args.push("-progress".to_string());
        args.push("pipe:1".to_string());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        args.extend(self.output_args.iter().cloned());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Keeps the most recent failure-marked stderr lines (and a raw tail as a
/// fallback when nothing matched).
#[derive(Debug)]
pub(crate) struct DiagnosticTail {
    capacity: usize,
    marked: VecDeque<String>,
    raw: VecDeque<String>,
}

const FAILURE_MARKERS: &[&str] = &[
    "error",
    "failed",
    "invalid",
    "no such file",
    "not found",
    "could not",
    "cannot",
    "unable to",
    "does not exist",
    "unknown",
];

impl DiagnosticTail {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            marked: VecDeque::new(),
            raw: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if is_failure_line(line) {
            push_bounded(&mut self.marked, line, self.capacity);
        }
        push_bounded(&mut self.raw, line, self.capacity);
    }

    pub(crate) fn excerpt(&self) -> String {
        let source = if self.marked.is_empty() {
            &self.raw
        } else {
            &self.marked
        };
        source.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

fn push_bounded(buf: &mut VecDeque<String>, line: &str, capacity: usize) {
    if buf.len() == capacity {
        buf.pop_front();
    }
    buf.push_back(line.to_string());
}

pub(crate) fn is_failure_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    FAILURE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Process executor for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    encoder: EncoderConfig,
    diagnostic_lines: usize,
}

impl FfmpegRunner {
    /// Create a runner bound to a resolved encoder.
    pub fn new(encoder: EncoderConfig) -> Self {
        Self {
            encoder,
            diagnostic_lines: DEFAULT_DIAGNOSTIC_LINES,
        }
    }

    /// Number of diagnostic lines surfaced on failure.
    pub fn with_diagnostic_lines(mut self, lines: usize) -> Self {
        self.diagnostic_lines = lines;
        self
    }

    pub fn encoder(&self) -> &EncoderConfig {
        &self.encoder
    }

    /// Run an FFmpeg command; returns the output path on success.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<PathBuf> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<PathBuf>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        let args = cmd.build_args();
        debug!("Running FFmpeg: {}", display_command(&self.encoder.binary_path, &args));

        let started = Instant::now();
        let mut child = Command::new(&self.encoder.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MediaError::FfmpegNotFound,
                _ => MediaError::Io(e),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;

        let progress_handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            let mut current = FfmpegProgress::default();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(progress) = parse_progress_line(&line, &mut current) {
                    progress_callback(progress);
                }
            }
        });

        let capacity = self.diagnostic_lines;
        let diagnostics_handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            let mut tail = DiagnosticTail::new(capacity);
            while let Ok(Some(line)) = reader.next_line().await {
                tail.push(&line);
            }
            tail
        });

        let status = child.wait().await?;

        let _ = progress_handle.await;
        let excerpt = diagnostics_handle
            .await
            .map(|tail| tail.excerpt())
            .unwrap_or_default();

        let elapsed = started.elapsed().as_secs_f64();
        let output = cmd.output();

        if !status.success() {
            metrics::record_encoder_run("failed", elapsed);
            warn!(
                exit_code = ?status.code(),
                output = %output.display(),
                diagnostics = %excerpt,
                "FFmpeg exited with failure"
            );
            return Err(MediaError::ffmpeg_failed(
                match status.code() {
                    Some(code) => format!("FFmpeg exited with status {}", code),
                    None => "FFmpeg terminated by signal".to_string(),
                },
                (!excerpt.is_empty()).then_some(excerpt),
                status.code(),
            ));
        }

        if !output_written(output).await {
            metrics::record_encoder_run("no_output", elapsed);
            warn!(output = %output.display(), "FFmpeg exited cleanly without writing output");
            return Err(MediaError::OutputMissing(output.to_path_buf()));
        }

        metrics::record_encoder_run("ok", elapsed);
        info!(output = %output.display(), elapsed_secs = elapsed, "FFmpeg finished");
        Ok(output.to_path_buf())
    }
}

async fn output_written(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}
