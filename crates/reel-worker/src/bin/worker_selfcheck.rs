//! Deployment smoke test: encoder, directories, Redis.

use std::path::Path;

use anyhow::Context;

use reel_media::EncoderConfig;
use reel_queue::JobQueue;
use reel_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|a| a == "--print-job-schema") {
        println!("{}", serde_json::to_string_pretty(&reel_models::render_job_schema())?);
        return Ok(());
    }

    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_dir(&config.work_dir).await?;
    ensure_dir(&config.output_dir).await?;

    let encoder = EncoderConfig::discover().context("encoder discovery")?;
    println!(
        "worker-selfcheck: ffmpeg={} ffprobe={}",
        encoder.binary_path.display(),
        encoder.probe_binary_path.display()
    );

    if !config.pool_root.is_dir() {
        println!(
            "worker-selfcheck: warning: pool root {} missing, every job will use the fallback image",
            config.pool_root.display()
        );
    }
    if !config.fallback_image.is_file() {
        anyhow::bail!(
            "fallback image {} missing",
            config.fallback_image.display()
        );
    }

    let queue = JobQueue::from_env().context("queue config")?;
    let pending = queue.len().await.context("redis unreachable")?;
    println!("worker-selfcheck: queue length {}", pending);

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("creating {}", path.display()))
}
