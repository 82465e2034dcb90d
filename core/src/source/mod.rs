pub mod csv;
pub mod parquet;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::errors::SourceError;

pub use self::csv::CsvSource;
pub use self::parquet::ParquetSource;

/// A dataset read as a sequence of Arrow batches, whatever the file format.
pub trait Source: Send {
    /// Column layout shared by every batch this source yields.
    fn schema(&self) -> SchemaRef;

    /// Next batch in source order, `None` once the source is exhausted.
    fn next_batch(&mut self) -> Result<Option<RecordBatch>, SourceError>;
}

/// File format of a source, resolved once when the source is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Delimited text with a header row, streamed in chunks.
    Csv,
    /// Gzip-compressed CSV, decompressed while it is streamed.
    CsvGzip,
    /// Columnar file, read whole into a single batch.
    Parquet,
}

const UNSUPPORTED_SUFFIXES: [&str; 4] = [".zip", ".bz2", ".xz", ".zst"];

impl SourceFormat {
    pub fn detect(location: &str) -> Result<Self, SourceError> {
        let path = location
            .split(['?', '#'])
            .next()
            .unwrap_or(location)
            .to_ascii_lowercase();

        if path.ends_with(".parquet") || path.ends_with(".pq") {
            Ok(SourceFormat::Parquet)
        } else if path.ends_with(".gz") {
            Ok(SourceFormat::CsvGzip)
        } else if UNSUPPORTED_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
            Err(SourceError::UnsupportedFormat {
                location: location.to_string(),
            })
        } else {
            Ok(SourceFormat::Csv)
        }
    }

    /// Streamed formats are read in `chunk_size` batches; the rest are read whole.
    pub fn is_streamed(&self) -> bool {
        !matches!(self, SourceFormat::Parquet)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Local(PathBuf),
    Remote(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub location: SourceLocation,
    pub format: SourceFormat,
}

impl SourceSpec {
    pub fn parse(location: &str) -> Result<Self, SourceError> {
        let format = SourceFormat::detect(location)?;
        let location = if location.starts_with("http://") || location.starts_with("https://") {
            SourceLocation::Remote(location.to_string())
        } else {
            SourceLocation::Local(PathBuf::from(location))
        };
        Ok(Self { location, format })
    }

    pub fn describe(&self) -> String {
        match &self.location {
            SourceLocation::Local(path) => path.display().to_string(),
            SourceLocation::Remote(url) => url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Maximum rows per batch for streamed formats.
    pub chunk_size: usize,
    /// Rows scanned to infer a CSV schema; `None` scans everything.
    pub infer_schema_rows: Option<usize>,
}

pub fn open_file(
    path: &Path,
    format: SourceFormat,
    options: &ReadOptions,
) -> Result<Box<dyn Source>, SourceError> {
    let location = path.display().to_string();
    let open = || {
        File::open(path).map_err(|source| SourceError::Open {
            location: location.clone(),
            source,
        })
    };

    match format {
        SourceFormat::Csv => Ok(Box::new(CsvSource::try_new(&location, open()?, options)?)),
        SourceFormat::CsvGzip => Ok(Box::new(CsvSource::try_new_with(
            &location,
            || open().map(GzDecoder::new),
            options,
        )?)),
        SourceFormat::Parquet => Ok(Box::new(ParquetSource::try_new(&location, open()?)?)),
    }
}

impl SourceError {
    pub(crate) fn decode<E>(location: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SourceError::Decode {
            location: location.to_string(),
            source: Box::new(err),
        }
    }
}
