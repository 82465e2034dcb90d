use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema, SchemaRef};
use arrow::record_batch::RecordBatch;
use deltalake::kernel::{DataType as DeltaDataType, PrimitiveType, StructField};
use deltalake::protocol::SaveMode;
use deltalake::{DeltaOps, DeltaTable};
use tracing::{debug, info};

use crate::config::SinkConfig;
use crate::errors::SinkError;
use crate::normalize::{canonical_timestamp, conform};
use crate::sink::Sink;

/// Registers the object store handlers needed for `s3://` table URIs.
pub fn register_handlers() {
    deltalake::aws::register_handlers(None);
}

/// A Delta Lake table addressed by `{location}/{table_name}`.
///
/// Every append is one Delta commit, so a batch is either fully visible or
/// not at all.
pub struct DeltaSink {
    table_uri: String,
    table_name: String,
    storage_options: HashMap<String, String>,
    table: Option<DeltaTable>,
    schema: Option<SchemaRef>,
}

impl DeltaSink {
    pub fn new(config: &SinkConfig) -> Self {
        Self {
            table_uri: config.table_uri(),
            table_name: config.table_name.clone(),
            storage_options: config.storage_options.clone(),
            table: None,
            schema: None,
        }
    }

    pub fn table_uri(&self) -> &str {
        &self.table_uri
    }

    /// The latest table handle, once the schema has been set up.
    pub fn table(&self) -> Option<&DeltaTable> {
        self.table.as_ref()
    }

    async fn create_table(&self, schema: &ArrowSchema, mode: SaveMode) -> Result<DeltaTable, SinkError> {
        let columns = delta_columns(schema)?;

        let ops = DeltaOps::try_from_uri_with_storage_options(
            &self.table_uri,
            self.storage_options.clone(),
        )
        .await
        .map_err(|e| SinkError::TableCreation {
            table: self.table_name.clone(),
            reason: e.to_string(),
        })?;

        ops.create()
            .with_table_name(&self.table_name)
            .with_columns(columns)
            .with_save_mode(mode)
            .await
            .map_err(|e| SinkError::TableCreation {
                table: self.table_name.clone(),
                reason: e.to_string(),
            })
    }
}

impl Sink for DeltaSink {
    fn name(&self) -> &str {
        &self.table_name
    }

    async fn replace_schema(&mut self, schema: SchemaRef) -> Result<(), SinkError> {
        let table = self.create_table(&schema, SaveMode::Overwrite).await?;
        info!(
            "Replaced Delta table {} at {} with {} columns",
            self.table_name,
            self.table_uri,
            schema.fields().len()
        );
        self.schema = Some(storage_schema(&schema)?);
        self.table = Some(table);
        Ok(())
    }

    async fn ensure_schema(&mut self, schema: SchemaRef) -> Result<(), SinkError> {
        let table = self.create_table(&schema, SaveMode::Ignore).await?;
        debug!("Delta table {} is ready at {}", self.table_name, self.table_uri);
        self.schema = Some(storage_schema(&schema)?);
        self.table = Some(table);
        Ok(())
    }

    async fn append(&mut self, batch: RecordBatch) -> Result<usize, SinkError> {
        let (Some(table), Some(schema)) = (&self.table, &self.schema) else {
            return Err(SinkError::SchemaNotInitialized {
                table: self.table_name.clone(),
            });
        };

        let rows = batch.num_rows();
        if rows == 0 {
            return Ok(0);
        }

        let batch = conform(&batch, schema).map_err(|e| SinkError::SchemaMismatch {
            table: self.table_name.clone(),
            reason: e.to_string(),
        })?;

        let table = DeltaOps(table.clone())
            .write(vec![batch])
            .with_save_mode(SaveMode::Append)
            .await
            .map_err(|e| SinkError::Write {
                table: self.table_name.clone(),
                reason: e.to_string(),
            })?;

        debug!("Appended {} rows to Delta table {}", rows, self.table_name);
        self.table = Some(table);
        Ok(rows)
    }
}

/// Delta columns for an Arrow schema.
pub fn delta_columns(schema: &ArrowSchema) -> Result<Vec<StructField>, SinkError> {
    schema
        .fields()
        .iter()
        .map(|f| {
            Ok(StructField::new(
                f.name().clone(),
                arrow_to_delta_type(f.data_type())?,
                f.is_nullable(),
            ))
        })
        .collect()
}

/// The Arrow layout batches must have once stored in Delta.
pub fn storage_schema(schema: &ArrowSchema) -> Result<SchemaRef, SinkError> {
    let fields = schema
        .fields()
        .iter()
        .map(|f| {
            let data_type = delta_to_arrow_type(&arrow_to_delta_type(f.data_type())?)?;
            Ok(Field::new(f.name(), data_type, f.is_nullable()))
        })
        .collect::<Result<Vec<_>, SinkError>>()?;
    Ok(Arc::new(ArrowSchema::new(fields)))
}

pub fn arrow_to_delta_type(arrow_type: &ArrowDataType) -> Result<DeltaDataType, SinkError> {
    let delta_type = match arrow_type {
        ArrowDataType::Boolean => DeltaDataType::Primitive(PrimitiveType::Boolean),
        ArrowDataType::Int8 => DeltaDataType::Primitive(PrimitiveType::Byte),
        ArrowDataType::Int16 | ArrowDataType::UInt8 => {
            DeltaDataType::Primitive(PrimitiveType::Short)
        }
        ArrowDataType::Int32 | ArrowDataType::UInt16 => {
            DeltaDataType::Primitive(PrimitiveType::Integer)
        }
        ArrowDataType::Int64 | ArrowDataType::UInt32 | ArrowDataType::UInt64 => {
            DeltaDataType::Primitive(PrimitiveType::Long)
        }
        ArrowDataType::Float16 | ArrowDataType::Float32 => {
            DeltaDataType::Primitive(PrimitiveType::Float)
        }
        ArrowDataType::Float64 => DeltaDataType::Primitive(PrimitiveType::Double),
        ArrowDataType::Utf8
        | ArrowDataType::LargeUtf8
        | ArrowDataType::Utf8View
        | ArrowDataType::Null => DeltaDataType::Primitive(PrimitiveType::String),
        ArrowDataType::Binary | ArrowDataType::LargeBinary | ArrowDataType::BinaryView => {
            DeltaDataType::Primitive(PrimitiveType::Binary)
        }
        ArrowDataType::Date32 | ArrowDataType::Date64 => {
            DeltaDataType::Primitive(PrimitiveType::Date)
        }
        ArrowDataType::Timestamp(_, _) => DeltaDataType::Primitive(PrimitiveType::Timestamp),
        ArrowDataType::Decimal128(precision, scale) => {
            let scale = u8::try_from(*scale).map_err(|_| SinkError::SchemaConversion {
                reason: format!("negative decimal scale {} is not supported", scale),
            })?;
            DeltaDataType::decimal(*precision, scale).map_err(|e| SinkError::SchemaConversion {
                reason: e.to_string(),
            })?
        }
        _ => {
            return Err(SinkError::SchemaConversion {
                reason: format!("Unsupported Arrow type for Delta: {:?}", arrow_type),
            });
        }
    };
    Ok(delta_type)
}

fn delta_to_arrow_type(delta_type: &DeltaDataType) -> Result<ArrowDataType, SinkError> {
    let arrow_type = match delta_type {
        DeltaDataType::Primitive(PrimitiveType::Boolean) => ArrowDataType::Boolean,
        DeltaDataType::Primitive(PrimitiveType::Byte) => ArrowDataType::Int8,
        DeltaDataType::Primitive(PrimitiveType::Short) => ArrowDataType::Int16,
        DeltaDataType::Primitive(PrimitiveType::Integer) => ArrowDataType::Int32,
        DeltaDataType::Primitive(PrimitiveType::Long) => ArrowDataType::Int64,
        DeltaDataType::Primitive(PrimitiveType::Float) => ArrowDataType::Float32,
        DeltaDataType::Primitive(PrimitiveType::Double) => ArrowDataType::Float64,
        DeltaDataType::Primitive(PrimitiveType::String) => ArrowDataType::Utf8,
        DeltaDataType::Primitive(PrimitiveType::Binary) => ArrowDataType::Binary,
        DeltaDataType::Primitive(PrimitiveType::Date) => ArrowDataType::Date32,
        DeltaDataType::Primitive(PrimitiveType::Timestamp) => canonical_timestamp(),
        DeltaDataType::Primitive(PrimitiveType::Decimal(decimal)) => {
            ArrowDataType::Decimal128(decimal.precision(), decimal.scale() as i8)
        }
        other => {
            return Err(SinkError::SchemaConversion {
                reason: format!("Unsupported Delta type: {:?}", other),
            });
        }
    };
    Ok(arrow_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::TimeUnit;

    fn create_test_sink_config(location: &str) -> SinkConfig {
        SinkConfig {
            location: location.to_string(),
            table_name: "yellow_taxi_trips".to_string(),
            storage_options: HashMap::new(),
        }
    }

    #[test]
    fn test_table_uri() {
        let sink = DeltaSink::new(&create_test_sink_config("/data/warehouse/"));
        assert_eq!(sink.table_uri(), "/data/warehouse/yellow_taxi_trips");
        assert_eq!(sink.name(), "yellow_taxi_trips");
        assert!(sink.table().is_none());
    }

    #[test]
    fn test_unsigned_integers_widen() {
        let cases = vec![
            (ArrowDataType::UInt8, PrimitiveType::Short),
            (ArrowDataType::UInt16, PrimitiveType::Integer),
            (ArrowDataType::UInt32, PrimitiveType::Long),
            (ArrowDataType::Int32, PrimitiveType::Integer),
        ];

        for (arrow_type, expected) in cases {
            assert_eq!(
                arrow_to_delta_type(&arrow_type).unwrap(),
                DeltaDataType::Primitive(expected),
                "Failed for type: {:?}",
                arrow_type
            );
        }
    }

    #[test]
    fn test_storage_schema_uses_canonical_types() {
        let schema = ArrowSchema::new(vec![
            Field::new("VendorID", ArrowDataType::UInt32, true),
            Field::new(
                "tpep_pickup_datetime",
                ArrowDataType::Timestamp(TimeUnit::Nanosecond, None),
                true,
            ),
            Field::new("store_and_fwd_flag", ArrowDataType::LargeUtf8, true),
            Field::new("ehail_fee", ArrowDataType::Null, true),
        ]);

        let storage = storage_schema(&schema).unwrap();
        assert_eq!(storage.field(0).data_type(), &ArrowDataType::Int64);
        assert_eq!(storage.field(1).data_type(), &canonical_timestamp());
        assert_eq!(storage.field(2).data_type(), &ArrowDataType::Utf8);
        assert_eq!(storage.field(3).data_type(), &ArrowDataType::Utf8);
    }

    #[test]
    fn test_unsupported_type() {
        let list = ArrowDataType::List(Arc::new(Field::new("item", ArrowDataType::Int32, true)));
        assert!(matches!(
            arrow_to_delta_type(&list),
            Err(SinkError::SchemaConversion { .. })
        ));
    }

    #[tokio::test]
    async fn test_append_before_schema() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DeltaSink::new(&create_test_sink_config(dir.path().to_str().unwrap()));
        let schema = Arc::new(ArrowSchema::new(vec![Field::new(
            "id",
            ArrowDataType::Int64,
            true,
        )]));

        let result = sink.append(RecordBatch::new_empty(schema)).await;
        assert!(matches!(
            result,
            Err(SinkError::SchemaNotInitialized { .. })
        ));
    }
}
