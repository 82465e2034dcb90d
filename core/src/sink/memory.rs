use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::errors::SinkError;
use crate::sink::Sink;

/// An in-process table. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    name: String,
    schema: Option<SchemaRef>,
    batches: Vec<RecordBatch>,
    schema_replacements: usize,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn schema(&self) -> Option<SchemaRef> {
        self.schema.clone()
    }

    pub fn row_count(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    /// How many times the table has been (re)created.
    pub fn schema_replacements(&self) -> usize {
        self.schema_replacements
    }

    /// All rows as one batch, in append order.
    pub fn snapshot(&self) -> Result<Option<RecordBatch>, SinkError> {
        let Some(schema) = &self.schema else {
            return Ok(None);
        };
        concat_batches(schema, &self.batches)
            .map(Some)
            .map_err(|e| SinkError::SchemaMismatch {
                table: self.name.clone(),
                reason: e.to_string(),
            })
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn replace_schema(&mut self, schema: SchemaRef) -> Result<(), SinkError> {
        self.schema = Some(schema);
        self.batches.clear();
        self.schema_replacements += 1;
        Ok(())
    }

    async fn ensure_schema(&mut self, schema: SchemaRef) -> Result<(), SinkError> {
        if self.schema.is_none() {
            self.schema = Some(schema);
            self.schema_replacements += 1;
        }
        Ok(())
    }

    async fn append(&mut self, batch: RecordBatch) -> Result<usize, SinkError> {
        let schema = self
            .schema
            .as_ref()
            .ok_or_else(|| SinkError::SchemaNotInitialized {
                table: self.name.clone(),
            })?;
        if batch.schema() != *schema {
            return Err(SinkError::SchemaMismatch {
                table: self.name.clone(),
                reason: format!("expected {:?}, got {:?}", schema, batch.schema()),
            });
        }

        let rows = batch.num_rows();
        if rows > 0 {
            self.batches.push(batch);
        }
        Ok(rows)
    }
}
