//! Snapshot date and page snapshot types.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AppError, Result};
use crate::models::EventRecord;

const CANONICAL_FORMAT: &str = "%Y%m%d";
const ISO_FORMAT: &str = "%Y-%m-%d";

/// Capture date of a snapshot partition, always rendered as `YYYYMMDD`.
///
/// ISO `YYYY-MM-DD` input is accepted and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotDate(NaiveDate);

impl SnapshotDate {
    /// Current date in UTC.
    pub fn today_utc() -> Self {
        Self(Utc::now().date_naive())
    }
}

impl fmt::Display for SnapshotDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(CANONICAL_FORMAT))
    }
}

impl FromStr for SnapshotDate {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let format = if s.len() == 8 { CANONICAL_FORMAT } else { ISO_FORMAT };
        NaiveDate::parse_from_str(s, format)
            .map(Self)
            .map_err(|_| {
                AppError::invalid_input(format!(
                    "snapshot_date '{s}' must be YYYYMMDD or YYYY-MM-DD"
                ))
            })
    }
}

impl Serialize for SnapshotDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SnapshotDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One listing page's records, ordered by card index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub page_number: u32,
    pub capture_date: SnapshotDate,
    pub records: Vec<EventRecord>,
}

impl PageSnapshot {
    pub fn new(page_number: u32, capture_date: SnapshotDate, records: Vec<EventRecord>) -> Self {
        Self {
            page_number,
            capture_date,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records that ended in the FAILED state.
    pub fn failed_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_failed()).count()
    }

    /// Shard body: a bare JSON array of records.
    pub fn to_shard_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.records)?)
    }
}
