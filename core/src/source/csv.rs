use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use std::io::{Read, Seek};
use std::sync::Arc;
use tracing::debug;

use crate::errors::SourceError;
use crate::source::{ReadOptions, Source};

type BatchIter = Box<dyn Iterator<Item = Result<RecordBatch, ArrowError>> + Send>;

/// Streams a headed CSV file in batches of at most `chunk_size` rows.
///
/// The schema is inferred once, up front, so every batch shares the same
/// layout regardless of how the file is chunked.
pub struct CsvSource {
    location: String,
    schema: SchemaRef,
    batches: BatchIter,
}

impl CsvSource {
    pub fn try_new<R>(location: &str, mut input: R, options: &ReadOptions) -> Result<Self, SourceError>
    where
        R: Read + Seek + Send + 'static,
    {
        let schema = infer_schema(location, &mut input, options)?;
        input.rewind().map_err(|source| SourceError::Open {
            location: location.to_string(),
            source,
        })?;
        Self::build(location, schema, input, options)
    }

    /// For inputs that cannot seek, such as decompressing readers: `open` is
    /// called once to infer the schema and again to read the rows.
    pub fn try_new_with<R, F>(
        location: &str,
        open: F,
        options: &ReadOptions,
    ) -> Result<Self, SourceError>
    where
        R: Read + Send + 'static,
        F: Fn() -> Result<R, SourceError>,
    {
        let schema = infer_schema(location, open()?, options)?;
        Self::build(location, schema, open()?, options)
    }

    fn build<R>(
        location: &str,
        schema: SchemaRef,
        input: R,
        options: &ReadOptions,
    ) -> Result<Self, SourceError>
    where
        R: Read + Send + 'static,
    {
        let reader = ReaderBuilder::new(schema.clone())
            .with_format(csv_format())
            .with_batch_size(options.chunk_size.max(1))
            .build(input)
            .map_err(|e| SourceError::decode(location, e))?;

        Ok(Self {
            location: location.to_string(),
            schema,
            batches: Box::new(reader),
        })
    }
}

fn csv_format() -> Format {
    Format::default().with_header(true)
}

fn infer_schema<R: Read>(
    location: &str,
    input: R,
    options: &ReadOptions,
) -> Result<SchemaRef, SourceError> {
    let (schema, scanned) = csv_format()
        .infer_schema(input, options.infer_schema_rows)
        .map_err(|e| SourceError::decode(location, e))?;

    if schema.fields().is_empty() {
        return Err(SourceError::decode(
            location,
            ArrowError::CsvError("missing header row".to_string()),
        ));
    }
    debug!(
        "Inferred {} columns for {} from {} rows",
        schema.fields().len(),
        location,
        scanned
    );
    Ok(Arc::new(schema))
}

impl Source for CsvSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>, SourceError> {
        self.batches
            .next()
            .transpose()
            .map_err(|e| SourceError::decode(&self.location, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;
    use std::io::Cursor;

    const TRIPS: &str = "VendorID,tpep_pickup_datetime,passenger_count,fare_amount\n\
        1,2021-01-01 00:30:10,1,8.0\n\
        2,2021-01-01 00:51:20,2,12.5\n\
        1,2021-01-01 01:05:00,1,4.5\n\
        2,2021-01-01 01:20:45,3,21.0\n\
        1,2021-01-01 02:00:00,1,6.0\n";

    fn options(chunk_size: usize) -> ReadOptions {
        ReadOptions {
            chunk_size,
            infer_schema_rows: None,
        }
    }

    fn drain(source: &mut CsvSource) -> Vec<usize> {
        let mut sizes = Vec::new();
        while let Some(batch) = source.next_batch().unwrap() {
            sizes.push(batch.num_rows());
        }
        sizes
    }

    #[test]
    fn test_chunk_sizes() {
        let mut source = CsvSource::try_new("trips.csv", Cursor::new(TRIPS), &options(2)).unwrap();
        assert_eq!(drain(&mut source), vec![2, 2, 1]);

        let mut source = CsvSource::try_new("trips.csv", Cursor::new(TRIPS), &options(100)).unwrap();
        assert_eq!(drain(&mut source), vec![5]);
    }

    #[test]
    fn test_inferred_schema() {
        let source = CsvSource::try_new("trips.csv", Cursor::new(TRIPS), &options(2)).unwrap();
        let schema = source.schema();

        assert_eq!(schema.fields().len(), 4);
        assert_eq!(schema.field(0).name(), "VendorID");
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(3).data_type(), &DataType::Float64);
    }

    #[test]
    fn test_header_only() {
        let mut source = CsvSource::try_new(
            "empty.csv",
            Cursor::new("VendorID,tpep_pickup_datetime\n"),
            &options(10),
        )
        .unwrap();

        assert_eq!(source.schema().fields().len(), 2);
        assert!(source.next_batch().unwrap().is_none());
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let result = CsvSource::try_new("empty.csv", Cursor::new(""), &options(10));
        assert!(matches!(result, Err(SourceError::Decode { .. })));
    }

    #[test]
    fn test_value_violating_inferred_type_fails() {
        let data = "VendorID,fare_amount\n1,8.0\n2,9.5\nthree,1.0\n";
        let mut source = CsvSource::try_new(
            "bad.csv",
            Cursor::new(data),
            &ReadOptions {
                chunk_size: 10,
                infer_schema_rows: Some(2),
            },
        )
        .unwrap();

        assert!(matches!(
            source.next_batch(),
            Err(SourceError::Decode { .. })
        ));
    }
}
