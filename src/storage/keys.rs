//! Object key construction.

use crate::models::{SnapshotDate, StorageConfig};

const SHARD_STEM: &str = "events_page_";
const SHARD_EXT: &str = ".json";

/// Prefix holding every shard of `date`, with a trailing slash.
pub fn shard_prefix(layout: &StorageConfig, date: SnapshotDate) -> String {
    format!("{}/{}/", layout.shard_prefix.trim_end_matches('/'), date)
}

/// `snapshot_date/{date}/events_page_{page}.json`
pub fn shard_key(layout: &StorageConfig, date: SnapshotDate, page_number: u32) -> String {
    format!(
        "{}{SHARD_STEM}{page_number}{SHARD_EXT}",
        shard_prefix(layout, date)
    )
}

/// Whether `key` names a page shard (`events_page_{n}.json`).
pub fn is_shard_key(key: &str) -> bool {
    let name = key.rsplit('/').next().unwrap_or(key);
    name.strip_prefix(SHARD_STEM)
        .and_then(|rest| rest.strip_suffix(SHARD_EXT))
        .is_some_and(|page| !page.is_empty() && page.chars().all(|c| c.is_ascii_digit()))
}

/// Merged artifact key; the publish variant carries a `scraped_data_` stem.
pub fn merged_key(layout: &StorageConfig, date: SnapshotDate, publish: bool) -> String {
    let stem = if publish { "scraped_data_" } else { "" };
    format!(
        "{}/{stem}{date}.parquet",
        layout.database_prefix.trim_end_matches('/')
    )
}
