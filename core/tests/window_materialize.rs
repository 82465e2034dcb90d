use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{TimeZone, Utc};
use deltalake::DeltaOps;
use futures::TryStreamExt;
use taxi_ingest::config::{Materialization, SinkConfig};
use taxi_ingest::normalize::{with_timestamp_column, with_utf8_column};
use taxi_ingest::window::{FetchUnit, materialize};
use taxi_ingest::{DeltaSink, WindowOutput};

fn window_output(variant: &str, month: u32, locations: Vec<i64>) -> WindowOutput {
    let rows = locations.len();
    let schema = Arc::new(Schema::new(vec![
        Field::new("PULocationID", DataType::Int64, true),
        Field::new("fare_amount", DataType::Float64, true),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(locations)),
            Arc::new(Float64Array::from(vec![10.5; rows])),
        ],
    )
    .unwrap();
    let batch = with_utf8_column(batch, "taxi_type", variant).unwrap();
    let extracted_at = Utc.with_ymd_and_hms(2024, month, 2, 6, 0, 0).unwrap();
    let batch = with_timestamp_column(batch, "extracted_at", extracted_at).unwrap();

    WindowOutput {
        batch,
        fetched: vec![FetchUnit {
            variant: variant.to_string(),
            year: 2024,
            month,
        }],
        skipped: vec![],
    }
}

fn sink_config(dir: &tempfile::TempDir) -> SinkConfig {
    SinkConfig {
        location: dir.path().to_str().unwrap().to_string(),
        table_name: "trips".to_string(),
        storage_options: HashMap::new(),
    }
}

async fn read_delta(uri: &str) -> RecordBatch {
    let table = deltalake::open_table(uri).await.unwrap();
    let (_, stream) = DeltaOps(table).load().await.unwrap();
    let batches: Vec<RecordBatch> = stream.try_collect().await.unwrap();
    let schema = batches[0].schema();
    concat_batches(&schema, &batches).unwrap()
}

fn sorted_values(batch: &RecordBatch, column: &str) -> Vec<String> {
    let values = batch
        .column_by_name(column)
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    let mut values: Vec<String> = values.iter().flatten().map(str::to_string).collect();
    values.sort();
    values
}

#[tokio::test]
async fn test_append_runs_accumulate_in_delta() {
    let warehouse = tempfile::tempdir().unwrap();
    let config = sink_config(&warehouse);

    let mut sink = DeltaSink::new(&config);
    let first = window_output("yellow", 1, vec![132, 138]);
    let written = materialize(&first, &mut sink, Materialization::Append)
        .await
        .unwrap();
    assert_eq!(written, 2);

    let mut sink = DeltaSink::new(&config);
    let second = window_output("green", 2, vec![74, 75]);
    let written = materialize(&second, &mut sink, Materialization::Append)
        .await
        .unwrap();
    assert_eq!(written, 2);

    let stored = read_delta(&config.table_uri()).await;
    assert_eq!(stored.num_rows(), 4);
    assert_eq!(stored.num_columns(), 4);
    assert_eq!(
        sorted_values(&stored, "taxi_type"),
        vec!["green", "green", "yellow", "yellow"]
    );
}

#[tokio::test]
async fn test_replace_run_discards_earlier_rows() {
    let warehouse = tempfile::tempdir().unwrap();
    let config = sink_config(&warehouse);

    let mut sink = DeltaSink::new(&config);
    materialize(
        &window_output("yellow", 1, vec![132, 138, 161]),
        &mut sink,
        Materialization::Append,
    )
    .await
    .unwrap();

    let mut sink = DeltaSink::new(&config);
    materialize(
        &window_output("green", 2, vec![74]),
        &mut sink,
        Materialization::Replace,
    )
    .await
    .unwrap();

    let stored = read_delta(&config.table_uri()).await;
    assert_eq!(stored.num_rows(), 1);
    assert_eq!(sorted_values(&stored, "taxi_type"), vec!["green"]);
}
