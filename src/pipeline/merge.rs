// src/pipeline/merge.rs

//! Shard-to-Parquet merge.
//!
//! Reads every shard of one snapshot date, infers a common Arrow schema,
//! and writes a single ZSTD-compressed Parquet file. The file is built in a
//! local temp file and only uploaded once complete, so an existing artifact
//! is never replaced by a partial one.

use std::io::Read;
use std::sync::Arc;

use arrow_json::ReaderBuilder;
use arrow_json::reader::infer_json_schema_from_iterator;
use arrow_schema::{ArrowError, DataType, Field, Fields, Schema, SchemaRef};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::{MergeConfig, SnapshotDate, StorageConfig};
use crate::storage::{ObjectStore, PARQUET_CONTENT_TYPE, keys};

/// Failures of the merge engine.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no shards found under '{prefix}'")]
    NoShards { prefix: String },

    #[error("shards under '{prefix}' contain no records")]
    NoRecords { prefix: String },

    #[error("shard '{key}' is not a JSON array of objects: {message}")]
    InvalidShard { key: String, message: String },

    #[error("arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("parquet: {0}")]
    Parquet(#[from] ParquetError),

    #[error("temp file: {0}")]
    TempFile(#[from] std::io::Error),

    #[error("merge task aborted: {0}")]
    Aborted(String),
}

impl MergeError {
    /// Whether the failure is due to missing input rather than the engine.
    pub fn is_missing_input(&self) -> bool {
        matches!(self, Self::NoShards { .. } | Self::NoRecords { .. })
    }
}

/// Summary of one merge.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MergeReport {
    pub snapshot_date: SnapshotDate,
    pub key: String,
    pub location: String,
    pub shards: usize,
    pub rows: usize,
    pub columns: Vec<String>,
    pub bytes: usize,
}

/// Merges the shards of one snapshot date into a Parquet artifact.
pub struct Aggregator {
    store: Arc<dyn ObjectStore>,
    layout: StorageConfig,
    config: MergeConfig,
}

impl Aggregator {
    pub fn new(store: Arc<dyn ObjectStore>, layout: &StorageConfig, config: &MergeConfig) -> Self {
        Self {
            store,
            layout: layout.clone(),
            config: config.clone(),
        }
    }

    /// Merge every shard of `date`.
    ///
    /// With `publish_variant` the artifact is written under the
    /// `scraped_data_` key consumed by the publisher.
    pub async fn merge(&self, date: SnapshotDate, publish_variant: bool) -> Result<MergeReport> {
        let prefix = keys::shard_prefix(&self.layout, date);
        let shard_keys: Vec<String> = self
            .store
            .list_keys(&prefix)
            .await?
            .into_iter()
            .filter(|key| keys::is_shard_key(key))
            .collect();

        if shard_keys.is_empty() {
            return Err(MergeError::NoShards { prefix }.into());
        }

        let mut rows = Vec::new();
        for key in &shard_keys {
            let Some(body) = self.store.get_object(key).await? else {
                warn!(key = %key, "shard vanished between list and read");
                continue;
            };
            rows.extend(parse_shard(key, &body)?);
        }
        if rows.is_empty() {
            return Err(MergeError::NoRecords { prefix }.into());
        }

        let config = self.config.clone();
        let encoded = tokio::task::spawn_blocking(move || encode_parquet(&rows, &config))
            .await
            .map_err(|e| MergeError::Aborted(e.to_string()))??;

        let key = keys::merged_key(&self.layout, date, publish_variant);
        let body = encoded.bytes;
        let bytes = body.len();
        self.store
            .put_object(&key, body, PARQUET_CONTENT_TYPE)
            .await?;

        let report = MergeReport {
            snapshot_date: date,
            location: self.store.location(&key),
            key,
            shards: shard_keys.len(),
            rows: encoded.rows,
            columns: encoded.columns,
            bytes,
        };
        info!(
            snapshot_date = %date,
            shards = report.shards,
            rows = report.rows,
            bytes,
            location = %report.location,
            "parquet written"
        );
        Ok(report)
    }
}

fn parse_shard(key: &str, body: &[u8]) -> std::result::Result<Vec<Value>, MergeError> {
    let invalid = |message: String| MergeError::InvalidShard {
        key: key.to_string(),
        message,
    };
    let value: Value = serde_json::from_slice(body).map_err(|e| invalid(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(invalid("top-level value is not an array".into()));
    };
    if let Some(position) = items.iter().position(|item| !item.is_object()) {
        return Err(invalid(format!("element {position} is not an object")));
    }
    Ok(items)
}

struct Encoded {
    bytes: Vec<u8>,
    rows: usize,
    columns: Vec<String>,
}

fn encode_parquet(rows: &[Value], config: &MergeConfig) -> std::result::Result<Encoded, MergeError> {
    let inferred = infer_json_schema_from_iterator(rows.iter().map(Ok::<_, ArrowError>))?;
    let schema: SchemaRef = Arc::new(coerce_schema(&inferred));

    let mut decoder = ReaderBuilder::new(Arc::clone(&schema))
        .with_batch_size(config.batch_size)
        .build_decoder()?;

    let level = ZstdLevel::try_new(config.zstd_level)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(level))
        .build();

    let mut file = NamedTempFile::new()?;
    let mut writer = ArrowWriter::try_new(file.reopen()?, Arc::clone(&schema), Some(props))?;

    let mut written = 0;
    for chunk in rows.chunks(config.batch_size.max(1)) {
        decoder.serialize(chunk)?;
        if let Some(batch) = decoder.flush()? {
            written += batch.num_rows();
            writer.write(&batch)?;
        }
    }
    writer.close()?;

    let mut bytes = Vec::new();
    file.as_file_mut().read_to_end(&mut bytes)?;

    Ok(Encoded {
        bytes,
        rows: written,
        columns: schema.fields().iter().map(|f| f.name().clone()).collect(),
    })
}

/// Columns that were null in every record have no type; store them as
/// nullable strings.
fn coerce_schema(schema: &Schema) -> Schema {
    let fields: Fields = schema.fields().iter().map(|f| coerce_field(f)).collect();
    Schema::new(fields)
}

fn coerce_field(field: &Field) -> Field {
    field
        .clone()
        .with_data_type(coerce_type(field.data_type()))
        .with_nullable(true)
}

fn coerce_type(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Null => DataType::Utf8,
        DataType::List(item) => DataType::List(Arc::new(coerce_field(item))),
        DataType::Struct(fields) => {
            DataType::Struct(fields.iter().map(|f| coerce_field(f)).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use parquet::file::reader::{FileReader, SerializedFileReader};
    use tempfile::TempDir;

    use super::*;
    use crate::error::AppError;
    use crate::models::{DetailFields, EventRecord, PageSnapshot, Schedule};
    use crate::storage::{LocalStorage, SnapshotWriter};

    fn date() -> SnapshotDate {
        "20251002".parse().unwrap()
    }

    fn record(page: u32, index: u32) -> EventRecord {
        let fields = DetailFields {
            description: Some(vec![format!("Evento {page}-{index}")]),
            info: Some(vec!["Entrada libre".into()]),
            schedule: Some(Schedule {
                date: Some("2 de octubre".into()),
                hour: None,
            }),
            location: Some("Zócalo".into()),
            ..DetailFields::empty()
        };
        EventRecord::extracted(page, index, Some(format!("https://e/{page}/{index}")), fields)
    }

    async fn seed(tmp: &TempDir, pages: &[(u32, usize)]) -> Arc<dyn ObjectStore> {
        let store: Arc<dyn ObjectStore> = Arc::new(LocalStorage::new(tmp.path()));
        let writer = SnapshotWriter::new(Arc::clone(&store), &StorageConfig::default());
        for &(page, count) in pages {
            let mut records: Vec<_> = (0..count as u32).map(|i| record(page, i)).collect();
            if count > 1 {
                records[1] = EventRecord::failed(page, 1);
            }
            writer
                .write(&PageSnapshot::new(page, date(), records))
                .await
                .unwrap();
        }
        store
    }

    fn aggregator(store: Arc<dyn ObjectStore>) -> Aggregator {
        Aggregator::new(store, &StorageConfig::default(), &MergeConfig::default())
    }

    #[tokio::test]
    async fn test_row_count_is_sum_of_shards() {
        let tmp = TempDir::new().unwrap();
        let store = seed(&tmp, &[(1, 4), (2, 3), (3, 5)]).await;
        store
            .put_object(
                "snapshot_date/20251002/notes.txt",
                b"not a shard".to_vec(),
                "text/plain",
            )
            .await
            .unwrap();

        let report = aggregator(store).merge(date(), false).await.unwrap();

        assert_eq!(report.shards, 3);
        assert_eq!(report.rows, 12);
        assert_eq!(report.key, "database/20251002.parquet");
        assert!(report.columns.contains(&"banner_url".to_string()));

        let file = File::open(tmp.path().join(&report.key)).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let total: usize = reader.map(|batch| batch.unwrap().num_rows()).sum();
        assert_eq!(total, 12);
    }

    #[tokio::test]
    async fn test_output_is_zstd() {
        let tmp = TempDir::new().unwrap();
        let store = seed(&tmp, &[(1, 2)]).await;

        let report = aggregator(store).merge(date(), true).await.unwrap();
        assert_eq!(report.key, "database/scraped_data_20251002.parquet");

        let reader =
            SerializedFileReader::new(File::open(tmp.path().join(&report.key)).unwrap()).unwrap();
        let column = reader.metadata().row_group(0).column(0).compression();
        assert!(matches!(column, Compression::ZSTD(_)));
    }

    #[tokio::test]
    async fn test_small_batches_keep_every_row() {
        let tmp = TempDir::new().unwrap();
        let store = seed(&tmp, &[(1, 7), (2, 6)]).await;
        let config = MergeConfig {
            batch_size: 4,
            ..MergeConfig::default()
        };

        let report = Aggregator::new(store, &StorageConfig::default(), &config)
            .merge(date(), false)
            .await
            .unwrap();
        assert_eq!(report.rows, 13);
    }

    #[tokio::test]
    async fn test_no_shards_leaves_artifacts_alone() {
        let tmp = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalStorage::new(tmp.path()));
        store
            .put_object("database/20251002.parquet", b"previous".to_vec(), "x")
            .await
            .unwrap();

        let err = aggregator(Arc::clone(&store))
            .merge(date(), false)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Merge(MergeError::NoShards { .. })));
        assert_eq!(err.status_code(), 404);
        assert_eq!(
            store.get_object("database/20251002.parquet").await.unwrap(),
            Some(b"previous".to_vec())
        );
    }

    #[tokio::test]
    async fn test_invalid_shard_is_reported() {
        let tmp = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalStorage::new(tmp.path()));
        store
            .put_object(
                "snapshot_date/20251002/events_page_1.json",
                br#"{"page_number": 1}"#.to_vec(),
                "application/json",
            )
            .await
            .unwrap();

        let err = aggregator(store).merge(date(), false).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Merge(MergeError::InvalidShard { .. })
        ));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_all_null_columns_become_strings() {
        let rows = vec![
            serde_json::to_value(EventRecord::failed(1, 0)).unwrap(),
            serde_json::to_value(EventRecord::failed(1, 1)).unwrap(),
        ];
        let encoded = encode_parquet(&rows, &MergeConfig::default()).unwrap();
        assert_eq!(encoded.rows, 2);
        assert_eq!(encoded.columns.len(), 10);
    }
}
