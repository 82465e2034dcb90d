pub mod delta;
pub mod memory;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::errors::SinkError;

pub use self::delta::DeltaSink;
pub use self::memory::MemorySink;

/// A named persistent table that receives loaded batches.
///
/// Implementations are constructed by the caller and passed in; each call is
/// one transaction of the underlying store.
#[allow(async_fn_in_trait)]
pub trait Sink: Send {
    /// Table name, for logs and reports.
    fn name(&self) -> &str;

    /// Drops and recreates the table with `schema` and no rows.
    async fn replace_schema(&mut self, schema: SchemaRef) -> Result<(), SinkError>;

    /// Creates the table with `schema` unless it already exists.
    async fn ensure_schema(&mut self, schema: SchemaRef) -> Result<(), SinkError>;

    /// Appends every row of `batch` or none of them, returning the row count.
    async fn append(&mut self, batch: RecordBatch) -> Result<usize, SinkError>;
}
