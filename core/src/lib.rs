pub mod config;
pub mod errors;
pub mod fetch;
pub mod loader;
pub mod mirror;
pub mod normalize;
pub mod retry;
pub mod sink;
pub mod source;
pub mod storage;
pub mod telemetry;
pub mod window;

pub use config::IngestConfig;
pub use errors::{IngestionError, Result};
pub use loader::{ChunkedLoader, LoadReport};
pub use mirror::{ArchiveMirror, MirrorReport};
pub use normalize::Normalizer;
pub use retry::RetryPolicy;
pub use sink::{DeltaSink, MemorySink, Sink};
pub use source::{SourceFormat, SourceSpec};
pub use storage::{ObjectStorage, S3Storage};
pub use window::{FetchWindow, MonthlyFetcher, WindowOutput};
