//! Maps a built graph and input plan onto an encoder command line.

use serde::{Deserialize, Serialize};
use tracing::warn;

use reel_models::{Composition, EncodingConfig, LayerKind};

use super::graph_builder::{seconds, BuiltGraph, BASE_LABEL};
use super::input_plan::{BackgroundInput, InputPlan, AUDIO_SLOT};
use crate::command::{FfmpegCommand, FfmpegInput};
use crate::error::{MediaError, MediaResult};
use crate::graph::produced_labels;

/// What to do when the audio input has no audio stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioPolicy {
    /// Map the audio stream optionally; render silent video without it.
    #[default]
    Optional,
    /// Fail before encoding.
    Required,
}

/// Audio track state passed to the command builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTrack {
    pub policy: AudioPolicy,
    /// Whether the probe found an audio stream in the audio input.
    pub present: bool,
}

/// Which label was mapped when the hinted output label was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelFallback {
    LastText,
    LastImage,
    Base,
}

/// A ready-to-run command and the label it maps.
#[derive(Debug, Clone)]
pub struct BuiltCommand {
    pub command: FfmpegCommand,
    pub mapped_label: String,
    /// `Some` when the hint was not produced by the graph.
    pub fallback: Option<LabelFallback>,
}

/// Resolve the video output label against the serialized graph text.
///
/// Falls back to the last text label, then the last image label, then
/// `base`.
pub fn resolve_output_label(text: &str, built: &BuiltGraph) -> (String, Option<LabelFallback>) {
    let produced = produced_labels(text);
    let is_produced = |name: &str| produced.iter().any(|p| p == name);

    let hint = built.final_label.as_str();
    if is_produced(hint) {
        return (hint.to_string(), None);
    }

    let last_of = |kind: LayerKind| {
        built
            .labels_of(kind)
            .filter(|l| is_produced(l.as_str()))
            .last()
            .map(|l| l.as_str().to_string())
    };

    let (label, fallback) = if let Some(label) = last_of(LayerKind::Text) {
        (label, LabelFallback::LastText)
    } else if let Some(label) = last_of(LayerKind::Image) {
        (label, LabelFallback::LastImage)
    } else {
        (BASE_LABEL.to_string(), LabelFallback::Base)
    };

    warn!(
        hint = hint,
        mapped = %label,
        fallback = ?fallback,
        "Output label missing from filter graph, using fallback"
    );
    (label, Some(fallback))
}

/// Build the encoder command for a composition.
pub fn build_command(
    composition: &Composition,
    built: &BuiltGraph,
    plan: &InputPlan,
    encoding: &EncodingConfig,
    audio: AudioTrack,
) -> MediaResult<BuiltCommand> {
    if !audio.present && audio.policy == AudioPolicy::Required {
        return Err(MediaError::MissingAudioStream(plan.audio.clone()));
    }

    let background = FfmpegInput::file(&plan.background);
    let background = match plan.background_input {
        BackgroundInput::StillImage => background.loop_image(encoding.fps),
        BackgroundInput::Video { loop_stream: true } => background.stream_loop(),
        BackgroundInput::Video { loop_stream: false } => background,
    };

    let mut cmd = FfmpegCommand::new(&composition.output)
        .input(background)
        .input(FfmpegInput::file(&plan.audio));

    for slot in plan.layer_slots() {
        let input = FfmpegInput::file(&slot.path);
        cmd = cmd.input(match slot.kind {
            LayerKind::Video => input.stream_loop(),
            _ => input.arg("-loop").arg("1"),
        });
    }

    let text = built.text();
    let (mapped_label, fallback) = resolve_output_label(&text, built);

    cmd = cmd
        .filter_complex(text)
        .map(format!("[{}]", mapped_label));

    cmd = match audio.policy {
        AudioPolicy::Required => cmd.map(format!("{}:a", AUDIO_SLOT)),
        AudioPolicy::Optional => cmd.map(format!("{}:a?", AUDIO_SLOT)),
    };
    if audio.present {
        let fade = composition.fade.duration.min(composition.duration);
        let start = (composition.duration - fade).max(0.0);
        cmd = cmd.audio_filter(format!(
            "afade=t=out:st={}:d={}",
            seconds(start),
            seconds(fade)
        ));
    }

    cmd = cmd
        .output_args(encoding.video_args())
        .output_duration(composition.duration)
        .resolution(composition.width, composition.height);

    if audio.present {
        cmd = cmd.output_args(encoding.audio_args());
    }

    cmd = cmd
        .output_arg("-movflags")
        .output_arg("+faststart")
        .output_args(encoding.extra_args.iter().cloned());

    Ok(BuiltCommand {
        command: cmd,
        mapped_label,
        fallback,
    })
}
