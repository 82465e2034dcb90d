use anyhow::{Context, Result};
use taxi_ingest::config::load_config;
use taxi_ingest::sink::delta;
use taxi_ingest::telemetry::{init_tracing, log_report};
use taxi_ingest::window::materialize;
use taxi_ingest::{DeltaSink, FetchWindow, MonthlyFetcher};
use tracing::warn;

/// Fetches the monthly trip files covering BRUIN_START_DATE..BRUIN_END_DATE
/// and writes the tagged rows to a Delta table.
///
/// Usage: `taxi-window [CONFIG]`
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = load_config(config_path.as_deref())
        .await
        .context("Failed to load configuration")?;
    config.validate()?;

    let (window_config, sink_config) = config.window_job()?;
    let window = FetchWindow::from_env(&window_config.default_variants)
        .context("Invalid fetch window")?;

    let fetcher = MonthlyFetcher::from_config(window_config)?;
    let output = fetcher.fetch(&window).await?;
    if !output.skipped.is_empty() {
        warn!(
            "{} of {} units were skipped",
            output.skipped.len(),
            output.skipped.len() + output.fetched.len()
        );
    }

    delta::register_handlers();
    let mut sink = DeltaSink::new(sink_config);
    let written = materialize(&output, &mut sink, window_config.materialization)
        .await
        .with_context(|| format!("Failed to write to {}", sink_config.table_uri()))?;

    log_report("window", &output.report(written));
    Ok(())
}
