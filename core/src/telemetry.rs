use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "taxi_ingest=info,taxi_load=info,taxi_window=info,taxi_mirror=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Logs a finished run's report as a single JSON line.
pub fn log_report<T: Serialize>(job: &str, report: &T) {
    match serde_json::to_string(report) {
        Ok(json) => info!(job, report = %json, "run finished"),
        Err(e) => warn!("Failed to serialize {} report: {}", job, e),
    }
}
