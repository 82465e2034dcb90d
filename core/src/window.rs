use std::time::Duration;

use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Materialization, WindowConfig};
use crate::errors::{self, ConfigError, FetchError, IngestionError};
use crate::fetch;
use crate::normalize::{unify_batches, with_timestamp_column, with_utf8_column};
use crate::retry::RetryPolicy;
use crate::sink::Sink;
use crate::source::parquet::read_parquet;

pub const START_DATE_VAR: &str = "BRUIN_START_DATE";
pub const END_DATE_VAR: &str = "BRUIN_END_DATE";
pub const VARS_VAR: &str = "BRUIN_VARS";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// An inclusive date range plus the dataset variants to fetch for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub variants: Vec<String>,
}

/// One (variant, month) download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchUnit {
    pub variant: String,
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Default, Deserialize)]
struct WindowVars {
    #[serde(default)]
    taxi_types: Option<Vec<String>>,
}

impl FetchWindow {
    pub fn new(start: NaiveDate, end: NaiveDate, variants: Vec<String>) -> Result<Self, ConfigError> {
        if end < start {
            return Err(ConfigError::ValidationFailed {
                reason: format!("window end {} is before start {}", end, start),
            });
        }
        Ok(Self {
            start,
            end,
            variants,
        })
    }

    pub fn from_env(default_variants: &[String]) -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok(), default_variants)
    }

    /// Builds a window from `lookup`, which resolves variable names the way
    /// the process environment does.
    pub fn from_vars<F>(lookup: F, default_variants: &[String]) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let start = parse_date(&lookup, START_DATE_VAR)?;
        let end = parse_date(&lookup, END_DATE_VAR)?;

        let vars = match lookup(VARS_VAR) {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str::<WindowVars>(&raw)
                .map_err(|e| ConfigError::Invalid {
                    message: format!("{} is not a valid JSON object: {}", VARS_VAR, e),
                })?,
            _ => WindowVars::default(),
        };
        let variants = vars
            .taxi_types
            .unwrap_or_else(|| default_variants.to_vec());

        Self::new(start, end, variants)
    }

    /// Every (variant, month) pair touched by the window, variant-major.
    pub fn units(&self) -> Vec<FetchUnit> {
        let mut units = Vec::new();
        for variant in &self.variants {
            let mut current = first_of_month(self.start);
            while current <= self.end {
                units.push(FetchUnit {
                    variant: variant.clone(),
                    year: current.year(),
                    month: current.month(),
                });
                match current.checked_add_months(Months::new(1)) {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }
        units
    }
}

fn parse_date<F>(lookup: &F, name: &str) -> Result<NaiveDate, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name).ok_or_else(|| ConfigError::MissingField {
        field: name.to_string(),
    })?;
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|e| ConfigError::Invalid {
        message: format!("{}={:?} is not a YYYY-MM-DD date: {}", name, raw, e),
    })
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

impl FetchUnit {
    pub fn file_name(&self) -> String {
        format!("{}_tripdata_{}-{:02}.parquet", self.variant, self.year, self.month)
    }

    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.file_name())
    }
}

/// Result of a windowed fetch: the rows of every unit that succeeded.
#[derive(Debug, Clone)]
pub struct WindowOutput {
    pub batch: RecordBatch,
    pub fetched: Vec<FetchUnit>,
    pub skipped: Vec<FetchUnit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowReport {
    pub rows: usize,
    pub rows_written: usize,
    pub fetched: Vec<FetchUnit>,
    pub skipped: Vec<FetchUnit>,
}

impl WindowOutput {
    pub fn report(&self, rows_written: usize) -> WindowReport {
        WindowReport {
            rows: self.batch.num_rows(),
            rows_written,
            fetched: self.fetched.clone(),
            skipped: self.skipped.clone(),
        }
    }
}

/// Downloads monthly Parquet files for a window and tags their rows.
pub struct MonthlyFetcher {
    client: Client,
    base_url: String,
    variant_column: String,
    extracted_at_column: String,
    retry: RetryPolicy,
}

impl MonthlyFetcher {
    pub fn new(client: Client, config: &WindowConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            variant_column: config.variant_column.clone(),
            extracted_at_column: config.extracted_at_column.clone(),
            retry: config.retry.clone(),
        }
    }

    pub fn from_config(config: &WindowConfig) -> Result<Self, ConfigError> {
        let client = fetch::http_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self::new(client, config))
    }

    pub async fn fetch(&self, window: &FetchWindow) -> errors::Result<WindowOutput> {
        let units = window.units();
        info!(
            "Fetching {} monthly files for {} to {}",
            units.len(),
            window.start,
            window.end
        );

        let mut batches = Vec::with_capacity(units.len());
        let mut fetched = Vec::new();
        let mut skipped = Vec::new();

        for unit in units {
            match self.fetch_unit(&unit, Utc::now()).await {
                Ok(batch) => {
                    info!("Fetched {} rows from {}", batch.num_rows(), unit.file_name());
                    batches.push(batch);
                    fetched.push(unit);
                }
                Err(e) => {
                    warn!("Skipping {}: {}", unit.file_name(), e);
                    skipped.push(unit);
                }
            }
        }

        let batch = unify_batches(&batches)?;
        Ok(WindowOutput {
            batch,
            fetched,
            skipped,
        })
    }

    async fn fetch_unit(
        &self,
        unit: &FetchUnit,
        extracted_at: DateTime<Utc>,
    ) -> Result<RecordBatch, IngestionError> {
        let url = unit.url(&self.base_url);
        let body = self
            .retry
            .run_if(&url, FetchError::is_transient, || {
                fetch::get_bytes(&self.client, &url)
            })
            .await?;

        let batch = read_parquet(&url, body)?;
        let batch = with_utf8_column(batch, &self.variant_column, &unit.variant)?;
        Ok(with_timestamp_column(
            batch,
            &self.extracted_at_column,
            extracted_at,
        )?)
    }
}

/// Writes a fetch result to `sink`. An empty result writes nothing.
pub async fn materialize<S: Sink>(
    output: &WindowOutput,
    sink: &mut S,
    mode: Materialization,
) -> errors::Result<usize> {
    if output.batch.num_rows() == 0 {
        info!("No rows fetched; table {} left unchanged", sink.name());
        return Ok(0);
    }

    let schema = output.batch.schema();
    match mode {
        Materialization::Append => sink.ensure_schema(schema).await?,
        Materialization::Replace => sink.replace_schema(schema).await?,
    }
    let rows = sink.append(output.batch.clone()).await?;
    info!("Wrote {} rows to {}", rows, sink.name());
    Ok(rows)
}
