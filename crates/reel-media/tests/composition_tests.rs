//! Composition integration tests.
//!
//! Tests marked `requires ffmpeg` need `ffmpeg` and `ffprobe` on PATH (or
//! `FFMPEG_PATH`/`FFPROBE_PATH`).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use reel_media::compose::{build_command, AudioTrack, BackgroundInput};
use reel_media::graph::check_label_closure;
use reel_media::{
    build_filter_graph, compose, AudioPolicy, ComposeOptions, EncoderConfig, FfmpegCommand,
    FfmpegInput, FfmpegRunner, InputPlan, MediaError, MediaResult, SegmentAssembler, SourceFetcher,
    SourcePool, SourceRef,
};
use reel_models::{
    BlendMode, Composition, EncodingConfig, Layer, Position, Size, TimeWindow,
};

fn promo_layers(logo: &Path) -> Vec<Layer> {
    vec![
        Layer::image(logo)
            .with_size(Size::new(200, 200))
            .with_position(Position::centered(40))
            .with_opacity(0.5)
            .with_stack_order(10),
        Layer::text("Artist - Title")
            .with_position(Position::centered(600))
            .with_stack_order(400)
            .with_window(TimeWindow::new(10.0, 12.0)),
        Layer::image(logo)
            .with_size(Size::new(400, 400))
            .with_position(Position::centered(160))
            .with_stack_order(20)
            .after_fade(true)
            .with_window(TimeWindow::new(22.0, 8.0)),
    ]
}

#[test]
fn test_promo_graph_is_closed_and_ordered() {
    let logo = PathBuf::from("/assets/logo.png");
    let comp = Composition::new("/bg.mp4", "/audio.mp3", 720, 720, 30.0, "/out.mp4")
        .with_layers(promo_layers(&logo))
        .with_layer(Layer::video("/grain.mp4").with_blend_mode(BlendMode::Screen).with_opacity(0.2));

    let plan = InputPlan::with_file_check(&comp, BackgroundInput::Video { loop_stream: true }, |_| true);
    let encoding = EncodingConfig::default();
    let built = build_filter_graph(&comp, &plan, &encoding).unwrap();
    let text = built.text();

    check_label_closure(&text).unwrap();

    let pos = |needle: &str| text.find(needle).unwrap_or_else(|| panic!("{needle} missing"));
    assert!(pos("[img0]") < pos("[txt1]"));
    assert!(pos("[txt1]") < pos("[faded]"));
    assert!(pos("[faded]") < pos("[img2]"));
    assert_eq!(built.final_label.as_str(), "img2");

    let cmd = build_command(
        &comp,
        &built,
        &plan,
        &encoding,
        AudioTrack {
            policy: AudioPolicy::Optional,
            present: true,
        },
    )
    .unwrap();
    let args = cmd.command.build_args().join(" ");
    assert!(args.contains("-stream_loop -1 -i /bg.mp4 -i /audio.mp3 -stream_loop -1 -i /grain.mp4"));
    assert!(args.contains("-map [img2] -map 1:a?"));
}

async fn render_fixture(runner: &FfmpegRunner, source: &str, seconds: f64, output: PathBuf) -> PathBuf {
    let cmd = FfmpegCommand::new(&output)
        .input(FfmpegInput::lavfi(source))
        .output_duration(seconds);
    runner.run(&cmd).await.expect("fixture render failed")
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_end_to_end_promo() {
    let encoder = EncoderConfig::discover().expect("ffmpeg not available");
    let runner = FfmpegRunner::new(encoder.clone());
    let dir = tempfile::tempdir().unwrap();

    let background = render_fixture(&runner, "testsrc=size=1280x720:rate=30", 12.0, dir.path().join("bg.mp4")).await;
    let audio = render_fixture(&runner, "sine=frequency=440:sample_rate=44100", 30.0, dir.path().join("audio.m4a")).await;
    let logo = render_fixture(&runner, "color=c=red:s=256x256", 0.04, dir.path().join("logo.png")).await;

    let comp = Composition::new(&background, &audio, 720, 720, 30.0, dir.path().join("out/promo.mp4"))
        .with_layers(promo_layers(&logo));
    let options = ComposeOptions::new(encoder).with_audio_policy(AudioPolicy::Required);

    let output = compose(&comp, &options).await.unwrap();

    assert!(output.path.is_file());
    assert!(output.size_bytes > 0);
    assert_eq!(output.resolution, (720, 720));
    assert!((output.duration_seconds - 30.0).abs() < 0.5, "duration {}", output.duration_seconds);
    assert_eq!(output.label_fallback, None);
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_segment_duration_exactness() {
    let encoder = EncoderConfig::discover().expect("ffmpeg not available");
    let runner = FfmpegRunner::new(encoder.clone());
    let dir = tempfile::tempdir().unwrap();

    let short = render_fixture(&runner, "testsrc=size=640x360:rate=25", 3.0, dir.path().join("short.mp4")).await;
    let long = render_fixture(&runner, "testsrc2=size=640x480:rate=30", 12.0, dir.path().join("long.mp4")).await;

    let pools = vec![
        SourcePool::local("city", vec![short]),
        SourcePool::local("nature", vec![long]),
    ];
    let assembler = SegmentAssembler::new(encoder.clone(), 720, 720, dir.path().join("work"));
    let background = assembler.create_video_from_segments(&pools, 17.0, 5.0).await.unwrap();

    let info = reel_media::probe_media(&encoder, &background).await.unwrap();
    assert!((info.duration - 17.0).abs() < 0.2, "duration {}", info.duration);
    assert_eq!((info.width, info.height), (720, 720));
    assert!(!info.has_audio);
}

#[derive(Default)]
struct CountingFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl SourceFetcher for CountingFetcher {
    async fn fetch(&self, url: &str) -> MediaResult<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(MediaError::SourceUnavailable(format!("{} unreachable", url)))
    }
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_unpicked_remote_sources_are_never_fetched() {
    let encoder = EncoderConfig::discover().expect("ffmpeg not available");
    let runner = FfmpegRunner::new(encoder.clone());
    let dir = tempfile::tempdir().unwrap();

    let long = render_fixture(&runner, "testsrc2=size=640x480:rate=30", 12.0, dir.path().join("long.mp4")).await;
    let remote = (0..5)
        .map(|i| SourceRef::Remote(format!("https://cdn.invalid/clip{}.mp4", i)))
        .collect();
    let pools = vec![SourcePool::local("city", vec![long]), SourcePool::new("nature", remote)];

    let fetcher = Arc::new(CountingFetcher::default());
    let assembler = SegmentAssembler::new(encoder.clone(), 720, 720, dir.path().join("work"))
        .with_fetcher(fetcher.clone());
    // One slot: only the first category is drawn from
    let background = assembler.create_video_from_segments(&pools, 5.0, 5.0).await.unwrap();

    assert!(background.is_file());
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}
