use arrow::array::{ArrayRef, StringArray, TimestampMicrosecondArray, new_null_array};
use arrow::compute::{CastOptions, cast_with_options, concat_batches};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::util::display::FormatOptions;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::NormalizeConfig;
use crate::errors::SerializationError;

pub const UTC: &str = "UTC";

/// The single date-time type every temporal column is stored as.
pub fn canonical_timestamp() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into()))
}

/// Column normalization applied to every batch before it reaches a sink.
#[derive(Debug, Clone)]
pub struct Normalizer {
    temporal_marker: String,
    ingested_at_column: Option<String>,
}

impl Normalizer {
    pub fn new(temporal_marker: impl Into<String>) -> Self {
        Self {
            temporal_marker: temporal_marker.into(),
            ingested_at_column: None,
        }
    }

    pub fn from_config(config: &NormalizeConfig) -> Self {
        Self {
            temporal_marker: config.temporal_marker.clone(),
            ingested_at_column: config.ingested_at_column.clone(),
        }
    }

    /// Stamps every row with the load's start time under `column`.
    pub fn with_ingested_at(mut self, column: impl Into<String>) -> Self {
        self.ingested_at_column = Some(column.into());
        self
    }

    pub fn is_temporal(&self, column: &str) -> bool {
        column.contains(&self.temporal_marker)
    }

    pub fn apply(
        &self,
        batch: RecordBatch,
        ingested_at: DateTime<Utc>,
    ) -> Result<RecordBatch, SerializationError> {
        let batch = self.coerce_temporal(batch)?;
        match &self.ingested_at_column {
            Some(column) => with_timestamp_column(batch, column, ingested_at),
            None => Ok(batch),
        }
    }

    fn coerce_temporal(&self, batch: RecordBatch) -> Result<RecordBatch, SerializationError> {
        let schema = batch.schema();
        let target = canonical_timestamp();
        let mut fields = Vec::with_capacity(schema.fields().len());
        let mut columns = Vec::with_capacity(schema.fields().len());

        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            if self.is_temporal(field.name()) && field.data_type() != &target {
                columns.push(cast_column(field.name(), column, &target)?);
                fields.push(
                    Field::new(field.name(), target.clone(), field.is_nullable())
                        .with_metadata(field.metadata().clone()),
                );
            } else {
                columns.push(column.clone());
                fields.push(field.as_ref().clone());
            }
        }

        let schema = Schema::new_with_metadata(fields, schema.metadata().clone());
        rebuild(Arc::new(schema), columns, batch.num_rows())
    }
}

/// Converts `array` to `to`, failing on the first value that does not convert.
pub fn cast_column(
    column: &str,
    array: &ArrayRef,
    to: &DataType,
) -> Result<ArrayRef, SerializationError> {
    let options = CastOptions {
        safe: false,
        format_options: FormatOptions::default(),
    };
    cast_with_options(array, to, &options).map_err(|e| SerializationError::TypeConversion {
        column: column.to_string(),
        from_type: array.data_type().to_string(),
        to_type: to.to_string(),
        reason: e.to_string(),
    })
}

pub fn with_utf8_column(
    batch: RecordBatch,
    name: &str,
    value: &str,
) -> Result<RecordBatch, SerializationError> {
    let array: ArrayRef = Arc::new(StringArray::from(vec![value; batch.num_rows()]));
    with_column(batch, Field::new(name, DataType::Utf8, false), array)
}

pub fn with_timestamp_column(
    batch: RecordBatch,
    name: &str,
    value: DateTime<Utc>,
) -> Result<RecordBatch, SerializationError> {
    let micros = value.timestamp_micros();
    let array: ArrayRef = Arc::new(
        TimestampMicrosecondArray::from(vec![micros; batch.num_rows()]).with_timezone(UTC),
    );
    with_column(batch, Field::new(name, canonical_timestamp(), false), array)
}

/// Replaces the column named like `field`, or appends it as the last column.
fn with_column(
    batch: RecordBatch,
    field: Field,
    array: ArrayRef,
) -> Result<RecordBatch, SerializationError> {
    let schema = batch.schema();
    let rows = batch.num_rows();
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    let mut columns = batch.columns().to_vec();

    match schema.index_of(field.name()) {
        Ok(index) => {
            fields[index] = field;
            columns[index] = array;
        }
        Err(_) => {
            fields.push(field);
            columns.push(array);
        }
    }

    let schema = Schema::new_with_metadata(fields, schema.metadata().clone());
    rebuild(Arc::new(schema), columns, rows)
}

/// Casts a batch to `target`, matching columns by name.
pub fn conform(batch: &RecordBatch, target: &SchemaRef) -> Result<RecordBatch, SerializationError> {
    if batch.num_columns() != target.fields().len() {
        return Err(SerializationError::Arrow {
            reason: format!(
                "expected {} columns, batch has {}",
                target.fields().len(),
                batch.num_columns()
            ),
        });
    }

    let mut columns = Vec::with_capacity(target.fields().len());
    for field in target.fields() {
        let column = batch
            .column_by_name(field.name())
            .ok_or_else(|| SerializationError::Arrow {
                reason: format!("column {} is missing from the batch", field.name()),
            })?;
        if column.data_type() == field.data_type() {
            columns.push(column.clone());
        } else {
            columns.push(cast_column(field.name(), column, field.data_type())?);
        }
    }
    rebuild(target.clone(), columns, batch.num_rows())
}

/// Concatenates batches whose layouts may differ.
///
/// The result holds the union of all columns in first-seen order. Columns a
/// batch lacks are null for its rows; conflicting types are widened.
pub fn unify_batches(batches: &[RecordBatch]) -> Result<RecordBatch, SerializationError> {
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    }

    let mut merged: Vec<(String, DataType)> = Vec::new();
    for batch in batches {
        for field in batch.schema().fields() {
            match merged.iter_mut().find(|(name, _)| name == field.name()) {
                Some((_, data_type)) => *data_type = widen(data_type, field.data_type()),
                None => merged.push((field.name().clone(), field.data_type().clone())),
            }
        }
    }

    let schema = Arc::new(Schema::new(
        merged
            .into_iter()
            .map(|(name, data_type)| Field::new(name, data_type, true))
            .collect::<Vec<_>>(),
    ));

    let mut aligned = Vec::with_capacity(batches.len());
    for batch in batches {
        let mut columns = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            let column = match batch.column_by_name(field.name()) {
                Some(column) if column.data_type() == field.data_type() => column.clone(),
                Some(column) => cast_column(field.name(), column, field.data_type())?,
                None => new_null_array(field.data_type(), batch.num_rows()),
            };
            columns.push(column);
        }
        aligned.push(rebuild(schema.clone(), columns, batch.num_rows())?);
    }

    Ok(concat_batches(&schema, &aligned)?)
}

fn widen(current: &DataType, incoming: &DataType) -> DataType {
    match (current, incoming) {
        (a, b) if a == b => a.clone(),
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        (DataType::Timestamp(_, _), DataType::Timestamp(_, _)) => canonical_timestamp(),
        (a, b) if a.is_numeric() && b.is_numeric() => DataType::Float64,
        _ => DataType::Utf8,
    }
}

fn rebuild(
    schema: SchemaRef,
    columns: Vec<ArrayRef>,
    rows: usize,
) -> Result<RecordBatch, SerializationError> {
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
}
