use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use deltalake::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use deltalake::parquet::file::reader::ChunkReader;
use tracing::debug;

use crate::errors::SourceError;
use crate::source::Source;

/// Reads a whole Parquet file into one batch.
pub struct ParquetSource {
    schema: SchemaRef,
    batch: Option<RecordBatch>,
}

impl ParquetSource {
    pub fn try_new<T>(location: &str, input: T) -> Result<Self, SourceError>
    where
        T: ChunkReader + 'static,
    {
        let batch = read_parquet(location, input)?;
        Ok(Self {
            schema: batch.schema(),
            batch: Some(batch),
        })
    }
}

impl Source for ParquetSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>, SourceError> {
        Ok(self.batch.take())
    }
}

/// Decodes every row group of a Parquet file and concatenates them.
pub fn read_parquet<T>(location: &str, input: T) -> Result<RecordBatch, SourceError>
where
    T: ChunkReader + 'static,
{
    let builder = ParquetRecordBatchReaderBuilder::try_new(input)
        .map_err(|e| SourceError::decode(location, e))?;
    let schema = builder.schema().clone();
    let row_groups = builder.metadata().num_row_groups();
    let reader = builder
        .build()
        .map_err(|e| SourceError::decode(location, e))?;

    let mut batches = Vec::with_capacity(row_groups);
    for batch in reader {
        batches.push(batch.map_err(|e| SourceError::decode(location, e))?);
    }

    let batch = concat_batches(&schema, &batches).map_err(|e| SourceError::decode(location, e))?;
    debug!(
        "Read {} rows from {} row groups of {}",
        batch.num_rows(),
        row_groups,
        location
    );
    Ok(batch)
}
