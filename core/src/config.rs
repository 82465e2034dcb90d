use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    pub version: u32,
    #[serde(default)]
    pub sink: Option<SinkConfig>,
    #[serde(default)]
    pub load: Option<LoadConfig>,
    #[serde(default)]
    pub window: Option<WindowConfig>,
    #[serde(default)]
    pub mirror: Option<MirrorConfig>,
}

/// Where loaded tables live. The table URI is `{location}/{table_name}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    pub location: String,
    pub table_name: String,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoadConfig {
    pub source: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Rows scanned to infer a CSV schema; `None` scans the whole file.
    #[serde(default)]
    pub infer_schema_rows: Option<usize>,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NormalizeConfig {
    #[serde(default = "default_temporal_marker")]
    pub temporal_marker: String,
    #[serde(default)]
    pub ingested_at_column: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_base_url")]
    pub base_url: String,
    #[serde(default = "default_variants")]
    pub default_variants: Vec<String>,
    #[serde(default = "default_variant_column")]
    pub variant_column: String,
    #[serde(default = "default_extracted_at_column")]
    pub extracted_at_column: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub materialization: Materialization,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Materialization {
    #[default]
    Append,
    Replace,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MirrorConfig {
    #[serde(default = "default_mirror_base_url")]
    pub base_url: String,
    #[serde(default = "default_colors")]
    pub colors: Vec<String>,
    #[serde(default = "default_years")]
    pub years: Vec<i32>,
    #[serde(default = "default_months")]
    pub months: Vec<u32>,
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
    #[serde(default = "default_workers")]
    pub download_workers: usize,
    #[serde(default = "default_workers")]
    pub upload_workers: usize,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub download_retry: RetryPolicy,
    #[serde(default = "default_upload_retry")]
    pub upload_retry: RetryPolicy,
    pub storage: S3Config,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub prefix: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            temporal_marker: default_temporal_marker(),
            ingested_at_column: None,
        }
    }
}

fn default_chunk_size() -> usize {
    100_000
}

fn default_http_timeout_secs() -> u64 {
    120
}

fn default_temporal_marker() -> String {
    "datetime".to_string()
}

fn default_window_base_url() -> String {
    "https://d37ci6vzurychx.cloudfront.net/trip-data".to_string()
}

fn default_variants() -> Vec<String> {
    vec!["yellow".to_string()]
}

fn default_variant_column() -> String {
    "taxi_type".to_string()
}

fn default_extracted_at_column() -> String {
    "extracted_at".to_string()
}

fn default_mirror_base_url() -> String {
    "https://github.com/DataTalksClub/nyc-tlc-data/releases/download".to_string()
}

fn default_colors() -> Vec<String> {
    vec!["yellow".to_string(), "green".to_string()]
}

fn default_years() -> Vec<i32> {
    vec![2019, 2020]
}

fn default_months() -> Vec<u32> {
    (1..=12).collect()
}

fn default_download_dir() -> String {
    ".".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_upload_retry() -> RetryPolicy {
    RetryPolicy::fixed(3, Duration::from_secs(5))
}

pub async fn load_config(config_path: Option<&str>) -> anyhow::Result<IngestConfig> {
    match config_path {
        Some(path) => IngestConfig::from_file(path),
        None => IngestConfig::from_env(),
    }
}

impl IngestConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: IngestConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let config_str = std::env::var("INGEST_CONFIG")
            .map_err(|_| anyhow::anyhow!("INGEST_CONFIG environment variable not set"))?;
        let config: IngestConfig = serde_yaml::from_str(&config_str)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.load.is_none() && self.window.is_none() && self.mirror.is_none() {
            return Err(anyhow::anyhow!(
                "At least one of load, window or mirror must be configured"
            ));
        }

        if let Some(sink) = &self.sink {
            if sink.location.is_empty() {
                return Err(anyhow::anyhow!("Sink location cannot be empty"));
            }
            if sink.table_name.is_empty() {
                return Err(anyhow::anyhow!("Table name cannot be empty"));
            }
        }

        if let Some(load) = &self.load {
            if load.source.is_empty() {
                return Err(anyhow::anyhow!("Load source cannot be empty"));
            }
            if load.chunk_size == 0 {
                return Err(anyhow::anyhow!("Chunk size must be at least 1"));
            }
            if load.normalize.temporal_marker.is_empty() {
                return Err(anyhow::anyhow!("Temporal marker cannot be empty"));
            }
        }

        if let Some(window) = &self.window {
            if window.base_url.is_empty() {
                return Err(anyhow::anyhow!("Window base URL cannot be empty"));
            }
            if window.variant_column.is_empty() || window.extracted_at_column.is_empty() {
                return Err(anyhow::anyhow!("Window tag column names cannot be empty"));
            }
        }

        if let Some(mirror) = &self.mirror {
            if mirror.storage.bucket.is_empty() {
                return Err(anyhow::anyhow!("S3 bucket cannot be empty"));
            }
            if mirror.colors.is_empty() || mirror.years.is_empty() || mirror.months.is_empty() {
                return Err(anyhow::anyhow!("Mirror colors, years and months cannot be empty"));
            }
            if let Some(month) = mirror.months.iter().find(|m| !(1..=12).contains(*m)) {
                return Err(anyhow::anyhow!("Invalid month {} in mirror months", month));
            }
            if mirror.download_workers == 0 || mirror.upload_workers == 0 {
                return Err(anyhow::anyhow!("Worker counts must be at least 1"));
            }
        }
        Ok(())
    }

    pub fn load_job(&self) -> Result<(&LoadConfig, &SinkConfig), ConfigError> {
        let load = self.load.as_ref().ok_or_else(|| missing("load"))?;
        let sink = self.sink.as_ref().ok_or_else(|| missing("sink"))?;
        Ok((load, sink))
    }

    pub fn window_job(&self) -> Result<(&WindowConfig, &SinkConfig), ConfigError> {
        let window = self.window.as_ref().ok_or_else(|| missing("window"))?;
        let sink = self.sink.as_ref().ok_or_else(|| missing("sink"))?;
        Ok((window, sink))
    }

    pub fn mirror_job(&self) -> Result<&MirrorConfig, ConfigError> {
        self.mirror.as_ref().ok_or_else(|| missing("mirror"))
    }
}

fn missing(field: &str) -> ConfigError {
    ConfigError::MissingField {
        field: field.to_string(),
    }
}

impl SinkConfig {
    pub fn table_uri(&self) -> String {
        format!(
            "{}/{}",
            self.location.trim_end_matches('/'),
            self.table_name
        )
    }
}
