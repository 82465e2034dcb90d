use std::time::Duration;

use arrow::record_batch::RecordBatch;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::LoadConfig;
use crate::errors::{self, ConfigError, FetchError, SourceError};
use crate::fetch;
use crate::normalize::Normalizer;
use crate::retry::RetryPolicy;
use crate::sink::Sink;
use crate::source::{ParquetSource, ReadOptions, Source, SourceLocation, SourceSpec, open_file};

/// Outcome of one load run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub source: String,
    pub rows_loaded: usize,
    pub batches: usize,
}

/// Moves one tabular source into a sink, batch by batch.
///
/// The sink's schema is recreated on every run, so reloading the same source
/// yields the same table rather than duplicate rows.
pub struct ChunkedLoader {
    client: Client,
    normalizer: Normalizer,
    retry: RetryPolicy,
    infer_schema_rows: Option<usize>,
}

impl ChunkedLoader {
    pub fn new(client: Client, normalizer: Normalizer) -> Self {
        Self {
            client,
            normalizer,
            retry: RetryPolicy::once(),
            infer_schema_rows: None,
        }
    }

    pub fn from_config(config: &LoadConfig) -> Result<Self, ConfigError> {
        let client = fetch::http_client(Duration::from_secs(config.http_timeout_secs))?;
        Ok(Self::new(client, Normalizer::from_config(&config.normalize))
            .with_retry(config.retry.clone())
            .with_infer_schema_rows(config.infer_schema_rows))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_infer_schema_rows(mut self, rows: Option<usize>) -> Self {
        self.infer_schema_rows = rows;
        self
    }

    pub async fn load<S: Sink>(
        &self,
        source: &SourceSpec,
        sink: &mut S,
        chunk_size: usize,
    ) -> errors::Result<LoadReport> {
        if chunk_size == 0 {
            return Err(ConfigError::Invalid {
                message: "chunk size must be at least 1".to_string(),
            }
            .into());
        }

        let options = ReadOptions {
            chunk_size,
            infer_schema_rows: self.infer_schema_rows,
        };
        let ingested_at = Utc::now();

        info!(
            "Loading {} into table {} in chunks of {} rows",
            source.describe(),
            sink.name(),
            chunk_size
        );
        let (mut reader, _download) = self.open(source, &options).await?;

        let mut report = LoadReport {
            table: sink.name().to_string(),
            source: source.describe(),
            rows_loaded: 0,
            batches: 0,
        };

        while let Some(batch) = reader.next_batch()? {
            let batch = self.normalizer.apply(batch, ingested_at)?;
            if report.batches == 0 {
                sink.replace_schema(batch.schema()).await?;
            }

            let rows = sink.append(batch).await?;
            report.batches += 1;
            report.rows_loaded += rows;
            debug!(
                "Appended batch {} ({} rows, {} total) to {}",
                report.batches,
                rows,
                report.rows_loaded,
                report.table
            );
        }

        if report.batches == 0 {
            let empty = self
                .normalizer
                .apply(RecordBatch::new_empty(reader.schema()), ingested_at)?;
            sink.replace_schema(empty.schema()).await?;
            info!("{} has no rows; table {} was recreated empty", report.source, report.table);
        }

        info!(
            "Loaded {} rows in {} batches into {}",
            report.rows_loaded, report.batches, report.table
        );
        Ok(report)
    }

    /// Opens the source for reading. Remote streamed formats are downloaded
    /// to a temporary file first, which must outlive the returned reader.
    async fn open(
        &self,
        source: &SourceSpec,
        options: &ReadOptions,
    ) -> Result<(Box<dyn Source>, Option<NamedTempFile>), SourceError> {
        let url = match &source.location {
            SourceLocation::Local(path) => {
                return Ok((open_file(path, source.format, options)?, None));
            }
            SourceLocation::Remote(url) => url,
        };
        let download_err = |source: FetchError| SourceError::Download {
            location: url.clone(),
            source,
        };

        if !source.format.is_streamed() {
            let body = self
                .retry
                .run_if(url, FetchError::is_transient, || {
                    fetch::get_bytes(&self.client, url)
                })
                .await
                .map_err(download_err)?;
            return Ok((Box::new(ParquetSource::try_new(url, body)?), None));
        }

        let download = tempfile::Builder::new()
            .prefix("taxi-ingest-")
            .tempfile()
            .map_err(|source| SourceError::Open {
                location: url.clone(),
                source,
            })?;
        let (client, path) = (&self.client, download.path());
        let bytes = self
            .retry
            .run_if(url, FetchError::is_transient, move || async move {
                fetch::download_to(client, url, path).await
            })
            .await
            .map_err(download_err)?;
        debug!("Downloaded {} bytes from {} to {}", bytes, url, path.display());

        let reader = open_file(path, source.format, options)?;
        Ok((reader, Some(download)))
    }
}
