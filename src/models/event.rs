//! Event record data structures.

use serde::{Deserialize, Serialize};

/// Date and hour labels of an event's schedule block.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    pub date: Option<String>,
    pub hour: Option<String>,
}

/// Fields read from a card in the listing before it is activated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardSummary {
    pub banner_url: Option<String>,
    pub event_title: Option<String>,
    pub venue: Option<String>,
}

/// Extraction fields of one event, all `None` when nothing could be read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetailFields {
    pub description: Option<Vec<String>>,
    pub info: Option<Vec<String>>,
    pub schedule: Option<Schedule>,
    pub location: Option<String>,
    pub banner_url: Option<String>,
    pub event_title: Option<String>,
    pub venue: Option<String>,
}

impl DetailFields {
    /// The canonical degraded payload.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when no field holds a value.
    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }
}

/// One extracted event, positioned by page and card index.
///
/// Every field is serialized, `null` when absent, so a shard never
/// distinguishes "not attempted" from "not found".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRecord {
    pub page_number: u32,
    pub card_index: u32,
    pub detail_url: Option<String>,
    pub description: Option<Vec<String>>,
    pub info: Option<Vec<String>>,
    pub schedule: Option<Schedule>,
    pub location: Option<String>,
    pub banner_url: Option<String>,
    pub event_title: Option<String>,
    pub venue: Option<String>,
}

impl EventRecord {
    /// Record for a card whose extraction succeeded (possibly degraded).
    pub fn extracted(
        page_number: u32,
        card_index: u32,
        detail_url: Option<String>,
        fields: DetailFields,
    ) -> Self {
        Self {
            page_number,
            card_index,
            detail_url,
            description: fields.description,
            info: fields.info,
            schedule: fields.schedule,
            location: fields.location,
            banner_url: fields.banner_url,
            event_title: fields.event_title,
            venue: fields.venue,
        }
    }

    /// The FAILED record: position preserved, everything else null.
    pub fn failed(page_number: u32, card_index: u32) -> Self {
        Self::extracted(page_number, card_index, None, DetailFields::empty())
    }

    /// True when no extraction field and no detail URL was captured.
    pub fn is_failed(&self) -> bool {
        self.detail_url.is_none()
            && self.description.is_none()
            && self.info.is_none()
            && self.schedule.is_none()
            && self.location.is_none()
            && self.banner_url.is_none()
            && self.event_title.is_none()
            && self.venue.is_none()
    }
}
