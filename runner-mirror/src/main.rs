use anyhow::{Context, Result};
use taxi_ingest::config::load_config;
use taxi_ingest::telemetry::{init_tracing, log_report};
use taxi_ingest::{ArchiveMirror, S3Storage};

/// Mirrors the monthly compressed CSV archive into an S3 bucket.
///
/// Usage: `taxi-mirror [CONFIG]`
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = load_config(config_path.as_deref())
        .await
        .context("Failed to load configuration")?;
    config.validate()?;

    let mirror_config = config.mirror_job()?.clone();
    let storage = S3Storage::new(mirror_config.storage.clone()).await;
    let mirror = ArchiveMirror::from_config(storage, mirror_config)?;

    let report = mirror.run().await.context("Mirror run failed")?;
    log_report("mirror", &report);
    Ok(())
}
