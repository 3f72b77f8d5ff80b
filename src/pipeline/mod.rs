//! Pipeline entry points for crawler operations.
//!
//! - `crawl`: Discover listing pages and crawl them into snapshot shards
//! - `merge`: Combine a date's shards into one Parquet artifact
//! - `publish`: Push the merged artifact to a content repository

pub mod crawl;
pub mod merge;
pub mod publish;

pub use crawl::{CrawlSummary, PageCrawler, PageFailure, PageReport, with_browser};
pub use merge::{Aggregator, MergeError, MergeReport};
pub use publish::{
    ContentPublisher, EnvSecretProvider, GithubContentsPublisher, PublishedObject, SecretProvider,
    publish_stored,
};
