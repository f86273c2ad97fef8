//! Filter-graph builder.
//!
//! The background becomes `[base]`. Pre-fade layers are folded over a
//! running "current label", the fade envelope writes `[faded]`, and the
//! post-fade layers are folded on top of that. Whatever label the fold ends
//! on is the output hint handed to the command builder.

use std::path::Path;
use tracing::debug;

use reel_models::{
    BlendMode, Composition, EncodingConfig, HorizontalPosition, Layer, LayerKind, TextStyle,
    TimeWindow,
};

use super::input_plan::{InputPlan, SkippedLayer, BACKGROUND_SLOT};
use crate::graph::escape::{escape_drawtext, escape_filter_path, invert_color};
use crate::graph::{Filter, FilterGraph, GraphError, Label, Pad, Stage};

/// Label of the normalized background stream.
pub const BASE_LABEL: &str = "base";
/// Label written by the fade envelope.
pub const FADED_LABEL: &str = "faded";

const TEXT_BORDER_WIDTH: u32 = 2;

/// Position of a stage relative to the fade envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPass {
    BeforeFade,
    FadedEnvelope,
    AfterFade,
    Final,
}

/// One checkpoint of the fold, in render order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderStep {
    pub pass: RenderPass,
    /// Index into `Composition::layers`; `None` for the envelope and final
    /// checkpoints.
    pub layer: Option<usize>,
    pub kind: Option<LayerKind>,
    pub label: Label,
}

/// A validated graph plus the bookkeeping the command builder needs.
#[derive(Debug, Clone)]
pub struct BuiltGraph {
    pub graph: FilterGraph,
    /// Output label hint (last label of the fold).
    pub final_label: Label,
    pub steps: Vec<RenderStep>,
    pub skipped: Vec<SkippedLayer>,
}

impl BuiltGraph {
    /// Serialized `-filter_complex` text.
    pub fn text(&self) -> String {
        self.graph.to_string()
    }

    /// Labels of rendered layers of `kind`, in render order.
    pub fn labels_of(&self, kind: LayerKind) -> impl Iterator<Item = &Label> + '_ {
        self.steps
            .iter()
            .filter(move |s| s.kind == Some(kind))
            .map(|s| &s.label)
    }

    /// Label written by the fade envelope, if the fade applied.
    pub fn fade_label(&self) -> Option<&Label> {
        self.steps
            .iter()
            .find(|s| s.pass == RenderPass::FadedEnvelope)
            .map(|s| &s.label)
    }
}

/// Build the filter graph for `composition` over the slots in `plan`.
pub fn build_filter_graph(
    composition: &Composition,
    plan: &InputPlan,
    encoding: &EncodingConfig,
) -> Result<BuiltGraph, GraphError> {
    let mut builder = GraphBuilder {
        composition,
        plan,
        fps: encoding.fps,
        graph: FilterGraph::new(plan.input_count()),
        steps: Vec::new(),
    };

    let base = builder.background()?;

    let current = plan
        .before_fade()
        .iter()
        .try_fold(base, |current, &idx| {
            builder.render_layer(idx, current, RenderPass::BeforeFade)
        })?;

    let current = builder.fade(current)?;

    let current = plan
        .after_fade()
        .iter()
        .try_fold(current, |current, &idx| {
            builder.render_layer(idx, current, RenderPass::AfterFade)
        })?;

    builder.graph.validate(&current)?;
    builder.steps.push(RenderStep {
        pass: RenderPass::Final,
        layer: None,
        kind: None,
        label: current.clone(),
    });

    debug!(
        stages = builder.graph.stages().len(),
        final_label = current.as_str(),
        skipped = plan.skipped().len(),
        "Built filter graph"
    );

    Ok(BuiltGraph {
        graph: builder.graph,
        final_label: current,
        steps: builder.steps,
        skipped: plan.skipped().to_vec(),
    })
}

struct GraphBuilder<'a> {
    composition: &'a Composition,
    plan: &'a InputPlan,
    fps: u32,
    graph: FilterGraph,
    steps: Vec<RenderStep>,
}

impl GraphBuilder<'_> {
    fn push(&mut self, stage: Stage) -> Result<Label, GraphError> {
        self.graph.push(stage).cloned()
    }

    /// Scale and crop to fill the canvas, then style.
    fn background(&mut self) -> Result<Label, GraphError> {
        let (w, h) = (self.composition.width, self.composition.height);
        let stage = Stage::new(vec![Pad::video(BACKGROUND_SLOT)], Label::new(BASE_LABEL)?)
            .filter(fill_scale(w, h))
            .filter(Filter::new("crop").arg(w).arg(h))
            .filter(Filter::new("setsar").arg(1))
            .filter(Filter::new("fps").arg(self.fps))
            .filter(Filter::raw(self.composition.background_filter()))
            .filter(Filter::new("format").arg("yuv420p"));
        self.push(stage)
    }

    fn fade(&mut self, current: Label) -> Result<Label, GraphError> {
        let fade = self.composition.fade;
        let Some(start) = fade.start_for(self.composition.duration) else {
            return Ok(current);
        };
        let faded = self.push(
            Stage::new(vec![current.into()], Label::new(FADED_LABEL)?).filter(
                Filter::new("fade")
                    .param("t", "out")
                    .param("st", seconds(start))
                    .param("d", seconds(fade.duration)),
            ),
        )?;
        self.steps.push(RenderStep {
            pass: RenderPass::FadedEnvelope,
            layer: None,
            kind: None,
            label: faded.clone(),
        });
        Ok(faded)
    }

    fn render_layer(
        &mut self,
        idx: usize,
        current: Label,
        pass: RenderPass,
    ) -> Result<Label, GraphError> {
        let composition = self.composition;
        let layer = &composition.layers[idx];
        let window = self.gate_window(layer);

        let output = match (layer.kind, layer.effective_blend()) {
            (LayerKind::Text, _) => self.text_layer(idx, layer, window, current)?,
            (LayerKind::Video, Some(mode)) => {
                let slot = self.slot(idx)?;
                self.blend_layer(idx, slot, mode, layer.opacity, window, current)?
            }
            (LayerKind::Video, None) | (LayerKind::Image, _) => {
                let slot = self.slot(idx)?;
                self.overlay_layer(idx, slot, layer, window, current)?
            }
            (LayerKind::Background, _) => return Ok(current),
        };

        self.steps.push(RenderStep {
            pass,
            layer: Some(idx),
            kind: Some(layer.kind),
            label: output.clone(),
        });
        Ok(output)
    }

    fn slot(&self, idx: usize) -> Result<usize, GraphError> {
        self.plan
            .slot_for(idx)
            .ok_or(GraphError::UnplannedLayer(idx))
    }

    /// Window clamped to the output, or `None` when always visible.
    fn gate_window(&self, layer: &Layer) -> Option<TimeWindow> {
        let total = self.composition.duration;
        layer
            .time_window
            .and_then(|w| w.clamp_to(total))
            .filter(|w| !w.covers(total))
    }

    /// Scale (plus optional alpha remap) then positional overlay.
    fn overlay_layer(
        &mut self,
        idx: usize,
        slot: usize,
        layer: &Layer,
        window: Option<TimeWindow>,
        current: Label,
    ) -> Result<Label, GraphError> {
        let prefix = match layer.kind {
            LayerKind::Video => "vid",
            _ => "img",
        };
        let size = layer.final_size();

        let scaled = match layer.kind {
            LayerKind::Video => Stage::new(vec![Pad::video(slot)], label(prefix, idx, "scaled")?)
                .filter(fill_scale(size.width, size.height))
                .filter(Filter::new("crop").arg(size.width).arg(size.height))
                .filter(Filter::new("setsar").arg(1)),
            _ => Stage::new(vec![Pad::video(slot)], label(prefix, idx, "scaled")?).filter(
                Filter::new("scale")
                    .arg(size.width)
                    .arg(size.height)
                    .param("force_original_aspect_ratio", "decrease"),
            ),
        };
        let mut overlay_input = self.push(scaled)?;

        if layer.needs_alpha() {
            overlay_input = self.push(
                Stage::new(vec![overlay_input.into()], label(prefix, idx, "alpha")?)
                    .filter(Filter::new("format").arg("rgba"))
                    .filter(
                        Filter::new("colorchannelmixer")
                            .param("aa", format!("{:.2}", layer.opacity)),
                    ),
            )?;
        }

        let x = match layer.position.x {
            HorizontalPosition::At(x) => x.to_string(),
            HorizontalPosition::Center => "(W-w)/2".to_string(),
        };
        let overlay = gated(
            Filter::new("overlay")
                .param("x", x)
                .param("y", layer.position.y),
            window,
        );
        self.push(
            Stage::new(vec![current.into(), overlay_input.into()], label(prefix, idx, "")?)
                .filter(overlay),
        )
    }

    /// Full-canvas video blended into the current stream.
    fn blend_layer(
        &mut self,
        idx: usize,
        slot: usize,
        mode: BlendMode,
        opacity: f32,
        window: Option<TimeWindow>,
        current: Label,
    ) -> Result<Label, GraphError> {
        let (w, h) = (self.composition.width, self.composition.height);
        let mut canvas = Stage::new(vec![Pad::video(slot)], label("vid", idx, "canvas")?)
            .filter(fill_scale(w, h))
            .filter(Filter::new("crop").arg(w).arg(h))
            .filter(Filter::new("setsar").arg(1))
            .filter(Filter::new("fps").arg(self.fps))
            .filter(Filter::new("format").arg("yuv420p"));

        if let Some(window) = window {
            canvas = canvas
                .filter(Filter::new("trim").param("duration", seconds(window.duration)))
                .filter(Filter::new("setpts").arg(format!(
                    "PTS-STARTPTS+{}/TB",
                    seconds(window.start)
                )));
        }
        let canvas = self.push(canvas)?;

        let blend = gated(
            Filter::new("blend")
                .param("all_mode", mode.as_str())
                .param("all_opacity", format!("{:.2}", opacity)),
            window,
        );
        self.push(
            Stage::new(vec![current.into(), canvas.into()], label("vid", idx, "")?).filter(blend),
        )
    }

    fn text_layer(
        &mut self,
        idx: usize,
        layer: &Layer,
        window: Option<TimeWindow>,
        current: Label,
    ) -> Result<Label, GraphError> {
        let default_style = TextStyle::default();
        let style = layer.text_style.as_ref().unwrap_or(&default_style);
        let content = layer.source.text().unwrap_or_default();

        let mut drawtext = Filter::new("drawtext");
        if let Some(font) = style.font_path.as_deref().filter(|p| font_exists(p)) {
            drawtext = drawtext.param("fontfile", escape_filter_path(&font.to_string_lossy()));
        }
        let x = match layer.position.x {
            HorizontalPosition::At(x) => x.to_string(),
            HorizontalPosition::Center => "(w-text_w)/2".to_string(),
        };
        let line_spacing =
            ((style.line_height - 1.0).max(0.0) * style.font_size as f32).round() as u32;

        drawtext = drawtext
            .param("text", escape_drawtext(content))
            .param("fontsize", style.font_size)
            .param("fontcolor", &style.text_color)
            .param("bordercolor", invert_color(&style.text_color))
            .param("borderw", TEXT_BORDER_WIDTH)
            .param("x", x)
            .param("y", layer.position.y)
            .param("line_spacing", line_spacing);

        self.push(
            Stage::new(vec![current.into()], label("txt", idx, "")?).filter(gated(drawtext, window)),
        )
    }
}

fn font_exists(path: &Path) -> bool {
    path.is_file()
}

fn label(prefix: &str, idx: usize, suffix: &str) -> Result<Label, GraphError> {
    if suffix.is_empty() {
        Label::new(format!("{}{}", prefix, idx))
    } else {
        Label::new(format!("{}{}_{}", prefix, idx, suffix))
    }
}

/// Scale so the frame covers `w x h` (crop follows).
fn fill_scale(w: u32, h: u32) -> Filter {
    Filter::new("scale")
        .arg(w)
        .arg(h)
        .param("force_original_aspect_ratio", "increase")
}

/// Attach timeline gating when the layer is windowed.
fn gated(filter: Filter, window: Option<TimeWindow>) -> Filter {
    match window {
        Some(w) => filter.quoted(
            "enable",
            format!("between(t,{},{})", seconds(w.start), seconds(w.end())),
        ),
        None => filter,
    }
}

/// Seconds without trailing zeros (`10`, `12.5`).
pub(crate) fn seconds(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    format!("{}", rounded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::input_plan::BackgroundInput;
    use crate::graph::check_label_closure;
    use crate::graph::escape::decode;
    use reel_models::{Position, Size};

    fn composition(layers: Vec<Layer>) -> Composition {
        Composition::new("/bg.mp4", "/a.mp3", 720, 720, 30.0, "/out.mp4").with_layers(layers)
    }

    fn build(comp: &Composition) -> BuiltGraph {
        let plan = InputPlan::with_file_check(comp, BackgroundInput::Video { loop_stream: false }, |_| true);
        build_filter_graph(comp, &plan, &EncodingConfig::default()).unwrap()
    }

    fn stage_index(built: &BuiltGraph, label: &str) -> usize {
        built
            .graph
            .stages()
            .iter()
            .position(|s| s.output.as_str() == label)
            .unwrap()
    }

    #[test]
    fn test_background_only() {
        let built = build(&composition(vec![]));
        assert_eq!(
            built.text(),
            "[0:v]scale=720:720:force_original_aspect_ratio=increase,crop=720:720,setsar=1,fps=30,hue=s=0,format=yuv420p[base];\
             [base]fade=t=out:st=22:d=3[faded]"
        );
        assert_eq!(built.final_label.as_str(), "faded");
    }

    #[test]
    fn test_style_filter_replaces_default() {
        let comp = composition(vec![]).with_style_filter("eq=saturation=1.6");
        let text = build(&comp).text();
        assert!(text.contains("fps=30,eq=saturation=1.6,format=yuv420p[base]"));
        assert!(!text.contains("hue=s=0"));
    }

    #[test]
    fn test_no_fade_when_too_short() {
        let mut comp = composition(vec![Layer::text("hi").after_fade(true)]);
        comp.duration = 6.0;
        let built = build(&comp);
        assert!(built.fade_label().is_none());
        assert!(!built.text().contains("fade="));
        assert_eq!(built.final_label.as_str(), "txt0");
    }

    #[test]
    fn test_stacking_order() {
        let comp = composition(vec![
            Layer::image("/logo.png").with_stack_order(10),
            Layer::text("caption").with_stack_order(400),
            Layer::image("/badge.png").with_stack_order(3),
        ]);
        let built = build(&comp);
        assert!(stage_index(&built, "img2") < stage_index(&built, "img0"));
        assert!(stage_index(&built, "img0") < stage_index(&built, "txt1"));
        assert!(stage_index(&built, "txt1") < stage_index(&built, "faded"));
        assert_eq!(built.final_label.as_str(), "faded");
    }

    #[test]
    fn test_fade_partition() {
        let comp = composition(vec![
            Layer::image("/card.png").with_stack_order(1).after_fade(true),
            Layer::text("caption").with_stack_order(100),
        ]);
        let built = build(&comp);
        let faded = stage_index(&built, "faded");
        assert!(stage_index(&built, "txt1") < faded);
        assert!(stage_index(&built, "img0") > faded);

        let passes: Vec<RenderPass> = built.steps.iter().map(|s| s.pass).collect();
        assert_eq!(
            passes,
            vec![
                RenderPass::BeforeFade,
                RenderPass::FadedEnvelope,
                RenderPass::AfterFade,
                RenderPass::Final
            ]
        );
        assert_eq!(built.final_label.as_str(), "img0");
    }

    #[test]
    fn test_opacity_is_a_separate_stage() {
        let comp = composition(vec![Layer::image("/logo.png")
            .with_size(Size::new(200, 100))
            .with_opacity(0.5)
            .with_position(Position::new(10, 20))]);
        let text = build(&comp).text();
        assert!(text.contains(
            "[2:v]scale=200:100:force_original_aspect_ratio=decrease[img0_scaled];\
             [img0_scaled]format=rgba,colorchannelmixer=aa=0.50[img0_alpha];\
             [base][img0_alpha]overlay=x=10:y=20[img0]"
        ));
    }

    #[test]
    fn test_window_gating_and_centering() {
        let comp = composition(vec![Layer::image("/logo.png")
            .with_scale(0.5)
            .with_position(Position::centered(40))
            .with_window(TimeWindow::new(10.0, 5.0))]);
        let text = build(&comp).text();
        assert!(text.contains("scale=50:50:force_original_aspect_ratio=decrease"));
        assert!(text.contains("overlay=x=(W-w)/2:y=40:enable='between(t,10,15)'[img0]"));
    }

    #[test]
    fn test_window_clamped_to_duration() {
        let comp = composition(vec![Layer::text("end").with_window(TimeWindow::new(25.0, 20.0))]);
        assert!(build(&comp).text().contains("enable='between(t,25,30)'"));
    }

    #[test]
    fn test_full_window_needs_no_gate() {
        let comp = composition(vec![Layer::text("all").with_window(TimeWindow::new(0.0, 30.0))]);
        assert!(!build(&comp).text().contains("enable="));
    }

    #[test]
    fn test_video_fills_its_box() {
        let comp = composition(vec![Layer::video("/fx.mp4").with_size(Size::new(320, 180))]);
        let text = build(&comp).text();
        assert!(text.contains(
            "[2:v]scale=320:180:force_original_aspect_ratio=increase,crop=320:180,setsar=1[vid0_scaled]"
        ));
    }

    #[test]
    fn test_blend_layer() {
        let comp = composition(vec![Layer::video("/grain.mp4")
            .with_blend_mode(BlendMode::Screen)
            .with_opacity(0.3)
            .with_window(TimeWindow::new(5.0, 10.0))]);
        let text = build(&comp).text();
        assert!(text.contains("trim=duration=10,setpts=PTS-STARTPTS+5/TB[vid0_canvas]"));
        assert!(text.contains(
            "[base][vid0_canvas]blend=all_mode=screen:all_opacity=0.30:enable='between(t,5,15)'[vid0]"
        ));
        assert!(!text.contains("colorchannelmixer"));
    }

    #[test]
    fn test_blend_ignored_for_images() {
        let comp = composition(vec![Layer::image("/logo.png").with_blend_mode(BlendMode::Multiply)]);
        let text = build(&comp).text();
        assert!(!text.contains("blend="));
        assert!(text.contains("overlay="));
    }

    #[test]
    fn test_drawtext() {
        let comp = composition(vec![Layer::text("Artist: Song, 100%")
            .with_position(Position::centered(600))
            .with_font("/definitely/missing.ttf")
            .with_font_size(40)
            .with_text_color("white")]);
        let text = build(&comp).text();
        assert!(text.contains(
            r"[base]drawtext=text=\'Artist: Song\, 100\\%\':fontsize=40:fontcolor=white:bordercolor=black:borderw=2:x=(w-text_w)/2:y=600:line_spacing=8[txt0]"
        ));
        assert!(!text.contains("fontfile"));
    }

    #[test]
    fn test_drawtext_font_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let font = dir.path().join("font.ttf");
        std::fs::write(&font, b"font").unwrap();
        let comp = composition(vec![Layer::text("x").with_font(&font)]);
        let text = build(&comp).text();
        assert!(text.contains(&format!(r"drawtext=fontfile=\'{}\':text=\'x\'", font.display())));
    }

    #[test]
    fn test_drawtext_survives_both_parse_levels() {
        let dir = tempfile::tempdir().unwrap();
        let font = dir.path().join("Font: It's.ttf");
        std::fs::write(&font, b"font").unwrap();
        let comp = composition(vec![Layer::text("Guns N' Roses: Live")
            .with_font(&font)
            .with_font_size(48)]);
        let built = build(&comp);
        let stage = built
            .graph
            .stages()
            .iter()
            .find(|s| s.output.as_str() == "txt0")
            .unwrap()
            .to_string();

        let args = stage.strip_prefix("[base]drawtext=").unwrap();
        let (args, rest) = decode::token(args, "[],;");
        assert_eq!(rest, "[txt0]");

        let options = decode::options(&args);
        let value = |key: &str| {
            options
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(decode::drawtext_literal(&value("text")), "Guns N' Roses: Live");
        assert_eq!(value("fontfile"), font.to_string_lossy());
        assert_eq!(value("fontsize"), "48");
        assert_eq!(value("borderw"), "2");
        assert_eq!(value("line_spacing"), "10");
        assert_eq!(options.len(), 9);
    }

    #[test]
    fn test_skipped_layers_reported() {
        let comp = composition(vec![Layer::image("/gone.png"), Layer::text("ok")]);
        let plan = InputPlan::with_file_check(&comp, BackgroundInput::StillImage, |_| false);
        let built = build_filter_graph(&comp, &plan, &EncodingConfig::default()).unwrap();
        assert_eq!(built.skipped.len(), 1);
        assert_eq!(built.skipped[0].layer, 0);
        assert!(!built.text().contains("img0"));
        assert_eq!(plan.input_count(), 2);
    }

    #[test]
    fn test_label_closure_on_rich_graph() {
        let comp = composition(vec![
            Layer::image("/logo.png").with_opacity(0.5).with_stack_order(10),
            Layer::video("/fx.mp4").with_blend_mode(BlendMode::Overlay),
            Layer::video("/pip.mp4").with_opacity(0.8),
            Layer::text("a;b[c]").with_window(TimeWindow::new(10.0, 2.0)).with_stack_order(400),
            Layer::image("/card.png").after_fade(true).with_window(TimeWindow::new(22.0, 8.0)),
        ]);
        let built = build(&comp);
        check_label_closure(&built.text()).unwrap();
        built.graph.validate(&built.final_label).unwrap();
    }
}
