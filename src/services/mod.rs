//! Service layer for the crawler application.
//!
//! This module contains the crawl building blocks:
//! - Retry with backoff (`RetryPolicy`)
//! - Concurrency bounding (`ConcurrencyGovernor`)
//! - Page count discovery (`PageDiscovery`)
//! - Card enumeration (`CardEnumerator`)
//! - Detail extraction (`DetailExtractor`)
//! - Per-card navigation (`NavigationController`)

mod cards;
mod discovery;
mod extractor;
mod governor;
mod navigation;
mod retry;

pub use cards::{CardEnumerator, settle_scroll};
pub use discovery::PageDiscovery;
pub use extractor::{DetailExtractor, ExtractionContract};
pub use governor::ConcurrencyGovernor;
pub use navigation::{CardOutcome, CardState, NavigationController};
pub use retry::{Attempts, RetryPolicy, RetryReport};
