use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Data source error: {0}")]
    Source(#[from] SourceError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Object storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open source {location}")]
    Open {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported source format for {location}")]
    UnsupportedFormat { location: String },

    #[error("Failed to decode source {location}")]
    Decode {
        location: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to download source {location}")]
    Download {
        location: String,
        #[source]
        source: FetchError,
    },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to create table {table}: {reason}")]
    TableCreation { table: String, reason: String },

    #[error("Failed to write to table {table}: {reason}")]
    Write { table: String, reason: String },

    #[error("Schema conversion failed: {reason}")]
    SchemaConversion { reason: String },

    #[error("Batch schema does not match table {table}: {reason}")]
    SchemaMismatch { table: String, reason: String },

    #[error("Table {table} has no schema yet; replace or ensure it before appending")]
    SchemaNotInitialized { table: String },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("GET {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to write {path}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Timeouts, connection failures, throttling and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Request { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_body()
            }
            FetchError::Write { .. } => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error(
        "Bucket '{bucket}' exists but is not accessible; check the credentials' permissions"
    )]
    BucketForbidden { bucket: String },

    #[error("{operation} failed for '{target}': {reason}")]
    Request {
        operation: String,
        target: String,
        reason: String,
    },

    #[error("Verification failed for object '{key}'")]
    VerificationFailed { key: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("Arrow serialization failed: {reason}")]
    Arrow { reason: String },

    #[error("Column {column}: conversion from {from_type} to {to_type} failed: {reason}")]
    TypeConversion {
        column: String,
        from_type: String,
        to_type: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, IngestionError>;

impl From<arrow::error::ArrowError> for SerializationError {
    fn from(err: arrow::error::ArrowError) -> Self {
        SerializationError::Arrow {
            reason: err.to_string(),
        }
    }
}

impl StorageError {
    /// Everything except a bucket the credentials cannot use.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StorageError::BucketForbidden { .. })
    }
}

impl IngestionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestionError::Fetch(err) => err.is_transient(),
            IngestionError::Source(SourceError::Download { source, .. }) => source.is_transient(),
            IngestionError::Storage(err) => err.is_transient(),
            IngestionError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transience() {
        let server_error = FetchError::Status {
            url: "http://localhost/a.parquet".to_string(),
            status: 503,
        };
        let throttled = FetchError::Status {
            url: "http://localhost/a.parquet".to_string(),
            status: 429,
        };
        let missing = FetchError::Status {
            url: "http://localhost/a.parquet".to_string(),
            status: 404,
        };

        assert!(server_error.is_transient());
        assert!(throttled.is_transient());
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_error_classification() {
        let config_error = IngestionError::Config(ConfigError::ValidationFailed {
            reason: "chunk_size must be at least 1".to_string(),
        });
        assert!(!config_error.is_retryable());

        let verification = IngestionError::Storage(StorageError::VerificationFailed {
            key: "yellow_tripdata_2019-01.csv.gz".to_string(),
        });
        assert!(verification.is_retryable());

        let forbidden = IngestionError::Storage(StorageError::BucketForbidden {
            bucket: "trips".to_string(),
        });
        assert!(!forbidden.is_retryable());

        let sink_error = IngestionError::Sink(SinkError::Write {
            table: "trips".to_string(),
            reason: "disk full".to_string(),
        });
        assert!(!sink_error.is_retryable());
    }

    #[test]
    fn test_type_conversion_message_names_column() {
        let err = SerializationError::TypeConversion {
            column: "tpep_pickup_datetime".to_string(),
            from_type: "Utf8".to_string(),
            to_type: "Timestamp(Microsecond, Some(\"UTC\"))".to_string(),
            reason: "Error parsing timestamp from 'not-a-date'".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("tpep_pickup_datetime"));
        assert!(message.contains("not-a-date"));
    }
}
