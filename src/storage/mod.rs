//! Storage abstractions for snapshot shards and merged artifacts.
//!
//! ## Key Layout
//!
//! ```text
//! {bucket or root}/
//! ├── snapshot_date/
//! │   └── 20251002/
//! │       ├── events_page_1.json     # one shard per listing page
//! │       └── events_page_2.json
//! └── database/
//!     ├── 20251002.parquet           # merged artifact
//!     └── scraped_data_20251002.parquet   # publish-enabled variant
//! ```

pub mod keys;
pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::models::{PageSnapshot, StorageConfig};

// Re-export for convenience
pub use local::LocalStorage;
#[cfg(feature = "s3")]
pub use s3::S3Storage;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";

/// Flat key/value object store.
///
/// Writes replace the whole object atomically; readers never observe a
/// partially written key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create or replace `key`.
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// Read `key`, `None` when it does not exist.
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// All keys starting with `prefix`, sorted.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Human-readable location of `key` (path or URI).
    fn location(&self, key: &str) -> String;
}

/// Persists page snapshots as immutable shards.
#[derive(Clone)]
pub struct SnapshotWriter {
    store: Arc<dyn ObjectStore>,
    layout: StorageConfig,
}

impl SnapshotWriter {
    pub fn new(store: Arc<dyn ObjectStore>, layout: &StorageConfig) -> Self {
        Self {
            store,
            layout: layout.clone(),
        }
    }

    /// Write the snapshot's shard and return its key.
    ///
    /// Writing the same page and date again replaces the shard entirely.
    pub async fn write(&self, snapshot: &PageSnapshot) -> Result<String> {
        let key = keys::shard_key(&self.layout, snapshot.capture_date, snapshot.page_number);
        let body = snapshot.to_shard_json()?;
        let bytes = body.len();

        self.store
            .put_object(&key, body, JSON_CONTENT_TYPE)
            .await?;

        info!(
            page_number = snapshot.page_number,
            records = snapshot.len(),
            failed = snapshot.failed_count(),
            bytes,
            location = %self.store.location(&key),
            "shard written"
        );
        Ok(key)
    }
}

/// Open the configured backend: S3 when a bucket is set, local otherwise.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.bucket.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        Some(bucket) => open_bucket(bucket).await,
        None => Ok(Arc::new(LocalStorage::new(&config.local_root))),
    }
}

#[cfg(feature = "s3")]
async fn open_bucket(bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    Ok(Arc::new(S3Storage::from_env(bucket).await))
}

#[cfg(not(feature = "s3"))]
async fn open_bucket(bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    Err(crate::error::AppError::config(format!(
        "bucket '{bucket}' is configured but S3 support is not compiled in"
    )))
}
