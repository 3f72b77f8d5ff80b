// src/models/mod.rs

//! Domain models for the crawler application.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod event;
pub mod request;
mod snapshot;

// Re-export all public types
pub use config::{
    Config, ContractVersion, CrawlStrategy, CrawlerConfig, MergeConfig, PublishConfig,
    RetryConfig, ScrollConfig, SiteSelectors, StorageConfig,
};
pub use event::{CardSummary, DetailFields, EventRecord, Schedule};
pub use request::{CrawlPageRequest, InvocationResponse, MergeRequest, PageNumberInput};
pub use snapshot::{PageSnapshot, SnapshotDate};
