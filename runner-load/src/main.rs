use anyhow::{Context, Result};
use taxi_ingest::config::load_config;
use taxi_ingest::sink::delta;
use taxi_ingest::telemetry::{init_tracing, log_report};
use taxi_ingest::{ChunkedLoader, DeltaSink, SourceSpec};
use tracing::{info, warn};

/// Loads one CSV or Parquet file into a Delta table, replacing whatever the
/// table held before.
///
/// Usage: `taxi-load [CONFIG]`, where CONFIG is a YAML config path. Without
/// it the config is read from the INGEST_CONFIG variable.
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = load_config(config_path.as_deref())
        .await
        .context("Failed to load configuration")?;
    config.validate()?;

    let (load, sink_config) = config.load_job()?;
    let location = &load.source;
    let source = SourceSpec::parse(location)?;

    delta::register_handlers();
    let mut sink = DeltaSink::new(sink_config);
    let loader = ChunkedLoader::from_config(load)?;

    info!("Loading {} into {}", source.describe(), sink.table_uri());
    let report = match loader.load(&source, &mut sink, load.chunk_size).await {
        Ok(report) => report,
        Err(e) => {
            if e.is_retryable() {
                warn!("Load of {} failed with a transient error; rerunning may succeed", location);
            }
            return Err(e).with_context(|| format!("Failed to load {}", location));
        }
    };

    log_report("load", &report);
    Ok(())
}
