// src/pipeline/crawl.rs

//! Listing crawl pipeline.
//!
//! Discovers the page count, crawls listing pages into [`PageSnapshot`]s,
//! and writes each one as a shard. Card failures never abort a page; page
//! failures are recorded by [`PageCrawler::crawl_pages`] and the remaining
//! pages continue.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::browser::{BrowserDriver, BrowserPage, ChromeDriver, PageIsolation};
use crate::error::Result;
use crate::models::{Config, CrawlStrategy, CrawlerConfig, EventRecord, PageSnapshot, SnapshotDate};
use crate::services::{ConcurrencyGovernor, NavigationController, PageDiscovery, RetryPolicy};
use crate::storage::SnapshotWriter;

/// Launch Chromium, run `work`, and close the browser on every exit path.
pub async fn with_browser<T, F, Fut>(config: &CrawlerConfig, work: F) -> Result<T>
where
    F: FnOnce(Arc<ChromeDriver>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let driver = Arc::new(ChromeDriver::launch(config).await?);
    let outcome = work(Arc::clone(&driver)).await;

    match Arc::try_unwrap(driver) {
        Ok(driver) => {
            if let Err(e) = driver.shutdown().await {
                warn!(error = %e, "browser shutdown failed");
            }
        }
        // Dropping the last handle kills the child process.
        Err(_) => warn!("browser still referenced after crawl; dropping it"),
    }
    outcome
}

/// One shard written by [`PageCrawler::crawl_pages`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageReport {
    pub page_number: u32,
    pub key: String,
    pub records: usize,
    pub failed: usize,
}

/// A page that could not be crawled or written.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageFailure {
    pub page_number: u32,
    pub error: String,
}

/// Result of a multi-page crawl.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub snapshot_date: SnapshotDate,
    pub pages: Vec<PageReport>,
    pub failures: Vec<PageFailure>,
}

impl CrawlSummary {
    pub fn records(&self) -> usize {
        self.pages.iter().map(|p| p.records).sum()
    }
}

/// Crawls listing pages through a browser driver.
pub struct PageCrawler<D: BrowserDriver> {
    driver: Arc<D>,
    config: Config,
    navigation: NavigationController,
    governor: ConcurrencyGovernor,
}

impl<D: BrowserDriver> PageCrawler<D> {
    pub fn new(driver: Arc<D>, config: &Config) -> Self {
        Self {
            driver,
            config: config.clone(),
            navigation: NavigationController::new(config),
            governor: ConcurrencyGovernor::new(config.crawler.max_concurrent),
        }
    }

    pub fn strategy(&self) -> CrawlStrategy {
        self.config.crawler.strategy
    }

    /// Total number of listing pages.
    pub async fn discover(&self) -> Result<u32> {
        let discovery = PageDiscovery::new(
            &self.config.crawler,
            &self.config.selectors,
            &self.config.scroll,
            RetryPolicy::from_config(&self.config.retry),
        );

        let _permit = self.governor.acquire().await?;
        let mut page = self.driver.open_page(PageIsolation::Shared).await?;
        let result = discovery.last_page(&mut page).await;
        close_page(&mut page).await;

        let last_page = result?;
        info!(last_page, "listing pages discovered");
        Ok(last_page)
    }

    /// Crawl one listing page into a snapshot of every enumerated card.
    pub async fn crawl_page(&self, page_number: u32, date: SnapshotDate) -> Result<PageSnapshot> {
        info!(
            page_number,
            strategy = ?self.strategy(),
            max_concurrent = self.governor.capacity(),
            "crawling listing page"
        );
        let records = match self.strategy() {
            CrawlStrategy::Sequential => self.crawl_sequential(page_number).await?,
            CrawlStrategy::Isolated => self.crawl_isolated(page_number).await?,
        };

        let snapshot = PageSnapshot::new(page_number, date, records);
        info!(
            page_number,
            records = snapshot.len(),
            failed = snapshot.failed_count(),
            "listing page crawled"
        );
        Ok(snapshot)
    }

    /// Crawl and write several pages, bounded by the governor.
    pub async fn crawl_pages(
        &self,
        pages: impl IntoIterator<Item = u32>,
        date: SnapshotDate,
        writer: &SnapshotWriter,
    ) -> CrawlSummary {
        let tasks = pages.into_iter().map(|page_number| async move {
            let outcome = match self.crawl_page(page_number, date).await {
                Ok(snapshot) => writer.write(&snapshot).await.map(|key| PageReport {
                    page_number,
                    key,
                    records: snapshot.len(),
                    failed: snapshot.failed_count(),
                }),
                Err(e) => Err(e),
            };
            (page_number, outcome)
        });

        let mut summary = CrawlSummary {
            snapshot_date: date,
            pages: Vec::new(),
            failures: Vec::new(),
        };
        for (page_number, outcome) in join_all(tasks).await {
            match outcome {
                Ok(report) => summary.pages.push(report),
                Err(e) => {
                    error!(page_number, error = %e, "listing page failed");
                    summary.failures.push(PageFailure {
                        page_number,
                        error: e.to_string(),
                    });
                }
            }
        }
        summary
    }

    /// One shared page; cards visited one after another.
    async fn crawl_sequential(&self, page_number: u32) -> Result<Vec<EventRecord>> {
        let _permit = self.governor.acquire().await?;
        let mut page = self.driver.open_page(PageIsolation::Shared).await?;
        let result = self.visit_all(&mut page, page_number).await;
        close_page(&mut page).await;
        result
    }

    async fn visit_all(&self, page: &mut D::Page, page_number: u32) -> Result<Vec<EventRecord>> {
        let card_count = self.navigation.open_listing(page, page_number).await?;
        info!(page_number, card_count, "cards enumerated");

        let mut records = Vec::with_capacity(card_count as usize);
        for card_index in 0..card_count {
            let outcome = self
                .navigation
                .visit_card(page, page_number, card_index)
                .await;
            records.push(outcome.record);
        }
        Ok(records)
    }

    /// One isolated context per card, bounded by the governor.
    async fn crawl_isolated(&self, page_number: u32) -> Result<Vec<EventRecord>> {
        let card_count = {
            let _permit = self.governor.acquire().await?;
            let mut page = self.driver.open_page(PageIsolation::Shared).await?;
            let result = self.navigation.open_listing(&mut page, page_number).await;
            close_page(&mut page).await;
            result?
        };
        info!(page_number, card_count, "cards enumerated");

        let visits = (0..card_count).map(|card_index| async move {
            let visit = self.governor.run(self.visit_isolated(page_number, card_index));
            match visit.await {
                Ok(record) => record,
                Err(e) => {
                    warn!(page_number, card_index, error = %e, "card slot unavailable");
                    EventRecord::failed(page_number, card_index)
                }
            }
        });
        Ok(join_all(visits).await)
    }

    async fn visit_isolated(&self, page_number: u32, card_index: u32) -> EventRecord {
        let mut page = match self.driver.open_page(PageIsolation::Isolated).await {
            Ok(page) => page,
            Err(e) => {
                warn!(page_number, card_index, error = %e, "could not open isolated context");
                return EventRecord::failed(page_number, card_index);
            }
        };
        let outcome = self
            .navigation
            .visit_fresh(&mut page, page_number, card_index)
            .await;
        close_page(&mut page).await;
        outcome.record
    }
}

async fn close_page<P: BrowserPage>(page: &mut P) {
    if let Err(e) = page.close().await {
        warn!(error = %e, "failed to close page");
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tracing_test::traced_test;

    use super::*;
    use crate::browser::fake::{FakeDriver, FakeSite};
    use crate::models::StorageConfig;
    use crate::storage::{LocalStorage, ObjectStore};

    fn config(strategy: CrawlStrategy) -> Config {
        let mut config = Config::default();
        config.crawler.strategy = strategy;
        config.crawler.max_concurrent = 3;
        config.retry.base_delay_ms = 100;
        config
    }

    fn date() -> SnapshotDate {
        "20251002".parse().unwrap()
    }

    fn flaky_site() -> FakeSite {
        let mut site = FakeSite::new(5);
        site.activation_failures.insert(3, 2);
        site
    }

    async fn crawl(strategy: CrawlStrategy, site: FakeSite) -> (PageSnapshot, FakeDriver) {
        let driver = FakeDriver::new(site);
        let crawler = PageCrawler::new(Arc::new(driver.clone()), &config(strategy));
        let snapshot = crawler.crawl_page(2, date()).await.unwrap();
        (snapshot, driver)
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_sequential_card_recovers_after_two_failures() {
        let (snapshot, driver) = crawl(CrawlStrategy::Sequential, flaky_site()).await;

        assert_eq!(snapshot.page_number, 2);
        assert_eq!(snapshot.len(), 5);
        assert_eq!(snapshot.failed_count(), 0);
        let indexes: Vec<u32> = snapshot.records.iter().map(|r| r.card_index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
        assert_eq!(
            snapshot.records[3].detail_url,
            Some(FakeSite::detail_url(3))
        );

        let site = driver.site();
        assert_eq!(site.activations.iter().filter(|&&i| i == 3).count(), 3);
        assert_eq!(site.opened, site.closed);
        drop(site);

        logs_assert(|lines: &[&str]| {
            let retries: Vec<_> = lines
                .iter()
                .filter(|l| l.contains("retry scheduled") && l.contains("open card"))
                .collect();
            match retries.len() {
                2 => Ok(()),
                n => Err(format!("expected 2 card retries, got {n}")),
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_isolated_card_recovers_after_two_failures() {
        let (snapshot, driver) = crawl(CrawlStrategy::Isolated, flaky_site()).await;

        assert_eq!(snapshot.len(), 5);
        assert_eq!(snapshot.failed_count(), 0);
        assert_eq!(snapshot.records[3].card_index, 3);

        let site = driver.site();
        // one enumeration page plus one context per card, all closed
        assert_eq!(site.opened, 6);
        assert_eq!(site.closed, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_card_keeps_its_slot() {
        let mut site = FakeSite::new(4);
        site.activation_failures.insert(1, 99);
        let (snapshot, _) = crawl(CrawlStrategy::Sequential, site).await;

        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.failed_count(), 1);
        assert_eq!(snapshot.records[1], EventRecord::failed(2, 1));
        assert!(!snapshot.records[2].is_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_without_paginator() {
        let driver = FakeDriver::new(FakeSite::new(10));
        let crawler = PageCrawler::new(
            Arc::new(driver.clone()),
            &config(CrawlStrategy::Sequential),
        );
        assert_eq!(crawler.discover().await.unwrap(), 1);
        assert_eq!(driver.site().closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_pages_contains_page_failures() {
        let mut site = FakeSite::new(2);
        site.unreachable_pages.push(2);
        let driver = FakeDriver::new(site);
        let crawler = PageCrawler::new(
            Arc::new(driver.clone()),
            &config(CrawlStrategy::Sequential),
        );

        let tmp = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalStorage::new(tmp.path()));
        let writer = SnapshotWriter::new(Arc::clone(&store), &StorageConfig::default());

        let summary = crawler.crawl_pages(1..=3, date(), &writer).await;

        let written: Vec<u32> = summary.pages.iter().map(|p| p.page_number).collect();
        assert_eq!(written, vec![1, 3]);
        assert_eq!(summary.records(), 4);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].page_number, 2);
        assert_eq!(
            store.list_keys("snapshot_date/20251002/").await.unwrap(),
            vec![
                "snapshot_date/20251002/events_page_1.json",
                "snapshot_date/20251002/events_page_3.json",
            ]
        );
        let site = driver.site();
        assert_eq!(site.opened, site.closed);
    }
}
