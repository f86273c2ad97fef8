//! Encoder input slot assignment.
//!
//! Slot 0 is the background, slot 1 the audio track. File-backed layers
//! follow: every video layer in render order, then every image layer in
//! render order. Both the graph builder and the command builder read slot
//! numbers from here and nowhere else.

use std::path::{Path, PathBuf};
use tracing::warn;

use reel_models::{Composition, Layer, LayerKind};

use crate::probe::MediaKind;

pub const BACKGROUND_SLOT: usize = 0;
pub const AUDIO_SLOT: usize = 1;
const FIRST_LAYER_SLOT: usize = 2;

/// How the background input is fed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundInput {
    /// Still image repeated at the output frame rate.
    StillImage,
    /// Video; looped when shorter than the output.
    Video { loop_stream: bool },
}

impl BackgroundInput {
    /// Derive the input mode from the probed background.
    pub fn detect(path: &Path, probed_duration: Option<f64>, target: f64) -> Self {
        match MediaKind::from_path(path) {
            MediaKind::StillImage => BackgroundInput::StillImage,
            MediaKind::Video => BackgroundInput::Video {
                loop_stream: probed_duration.map_or(false, |d| d < target),
            },
        }
    }
}

/// Why a layer did not make it into the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingFile(PathBuf),
    NeverVisible,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLayer {
    /// Index into `Composition::layers`.
    pub layer: usize,
    pub reason: SkipReason,
}

/// A file-backed layer bound to an encoder input.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSlot {
    pub slot: usize,
    pub layer: usize,
    pub kind: LayerKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputPlan {
    pub background: PathBuf,
    pub background_input: BackgroundInput,
    pub audio: PathBuf,
    slots: Vec<LayerSlot>,
    before_fade: Vec<usize>,
    after_fade: Vec<usize>,
    skipped: Vec<SkippedLayer>,
}

impl InputPlan {
    /// Plan inputs, checking layer files on disk.
    pub fn new(composition: &Composition, background_input: BackgroundInput) -> Self {
        Self::with_file_check(composition, background_input, |p| p.is_file())
    }

    /// Plan inputs with a custom file existence check.
    pub fn with_file_check(
        composition: &Composition,
        background_input: BackgroundInput,
        file_exists: impl Fn(&Path) -> bool,
    ) -> Self {
        let mut skipped = Vec::new();
        let mut renderable = |idx: &usize| -> bool {
            let layer = &composition.layers[*idx];
            if !layer.is_ever_visible(composition.duration) {
                skipped.push(SkippedLayer {
                    layer: *idx,
                    reason: SkipReason::NeverVisible,
                });
                return false;
            }
            if let Some(path) = layer.source.path() {
                if !file_exists(path) {
                    warn!(
                        layer = *idx,
                        kind = %layer.kind,
                        path = %path.display(),
                        "Layer source missing, skipping"
                    );
                    skipped.push(SkippedLayer {
                        layer: *idx,
                        reason: SkipReason::MissingFile(path.to_path_buf()),
                    });
                    return false;
                }
            }
            true
        };

        let (before, after) = render_order(&composition.layers);
        let before_fade: Vec<usize> = before.into_iter().filter(|i| renderable(i)).collect();
        let after_fade: Vec<usize> = after.into_iter().filter(|i| renderable(i)).collect();
        skipped.sort_by_key(|s| s.layer);

        let ordered = || before_fade.iter().chain(after_fade.iter()).copied();
        let mut slots = Vec::new();
        for kind in [LayerKind::Video, LayerKind::Image] {
            for idx in ordered().filter(|i| composition.layers[*i].kind == kind) {
                if let Some(path) = composition.layers[idx].source.path() {
                    slots.push(LayerSlot {
                        slot: FIRST_LAYER_SLOT + slots.len(),
                        layer: idx,
                        kind,
                        path: path.to_path_buf(),
                    });
                }
            }
        }

        Self {
            background: composition.background.clone(),
            background_input,
            audio: composition.audio.clone(),
            slots,
            before_fade,
            after_fade,
            skipped,
        }
    }

    /// Input slot of a layer, if it has one.
    pub fn slot_for(&self, layer: usize) -> Option<usize> {
        self.slots.iter().find(|s| s.layer == layer).map(|s| s.slot)
    }

    /// Layer inputs in slot order.
    pub fn layer_slots(&self) -> &[LayerSlot] {
        &self.slots
    }

    pub fn input_count(&self) -> usize {
        FIRST_LAYER_SLOT + self.slots.len()
    }

    /// Rendered pre-fade layers in render order.
    pub fn before_fade(&self) -> &[usize] {
        &self.before_fade
    }

    /// Rendered post-fade layers in render order.
    pub fn after_fade(&self) -> &[usize] {
        &self.after_fade
    }

    pub fn skipped(&self) -> &[SkippedLayer] {
        &self.skipped
    }
}

/// Partition by `add_after_fade` and stable-sort each set by stack order.
///
/// Returns layer indices; equal stack orders keep insertion order.
pub fn render_order(layers: &[Layer]) -> (Vec<usize>, Vec<usize>) {
    let (mut before, mut after): (Vec<usize>, Vec<usize>) =
        (0..layers.len()).partition(|i| !layers[*i].add_after_fade);
    before.sort_by_key(|i| layers[*i].stack_order);
    after.sort_by_key(|i| layers[*i].stack_order);
    (before, after)
}
