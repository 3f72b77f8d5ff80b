// src/services/discovery.rs

//! Total page count of the listing.

use tracing::{info, warn};

use crate::browser::{BrowserError, BrowserPage, Result};
use crate::models::{CrawlerConfig, ScrollConfig, SiteSelectors};
use crate::services::{RetryPolicy, settle_scroll};

/// Reads the last page number from the listing's paginator.
#[derive(Debug, Clone)]
pub struct PageDiscovery {
    crawler: CrawlerConfig,
    selectors: SiteSelectors,
    scroll: ScrollConfig,
    retry: RetryPolicy,
}

impl PageDiscovery {
    pub fn new(
        crawler: &CrawlerConfig,
        selectors: &SiteSelectors,
        scroll: &ScrollConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            crawler: crawler.clone(),
            selectors: selectors.clone(),
            scroll: scroll.clone(),
            retry,
        }
    }

    /// Last page number, at least 1.
    ///
    /// A listing without a paginator, or with an unreadable last-page
    /// control, has exactly one page.
    pub async fn last_page<P: BrowserPage + ?Sized>(&self, page: &mut P) -> Result<u32> {
        let url = self
            .crawler
            .listing_url(None)
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;

        let mut attempts = self.retry.attempts("load listing root");
        loop {
            match page.goto(url.as_str(), self.crawler.navigation_timeout()).await {
                Ok(()) => break,
                Err(e) => {
                    let retryable = e.is_transient();
                    attempts.backoff(e, retryable).await?;
                }
            }
        }

        settle_scroll(page, &self.scroll).await?;

        if let Err(e) = page
            .wait_for(&self.selectors.paginator, self.crawler.detail_timeout())
            .await
        {
            match e {
                BrowserError::Timeout(_) => {
                    info!("no paginator on listing; assuming a single page");
                    return Ok(1);
                }
                other => return Err(other),
            }
        }

        let raw = page
            .attribute(&self.selectors.last_page, &self.selectors.last_page_attr)
            .await?;
        Ok(parse_last_page(raw.as_deref()))
    }
}

fn parse_last_page(raw: Option<&str>) -> u32 {
    match raw.map(|s| s.trim().parse::<u32>()) {
        Some(Ok(n)) if n >= 1 => n,
        Some(_) => {
            warn!(value = ?raw, "unreadable last-page value; assuming a single page");
            1
        }
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::browser::fake::{FakeDriver, FakeSite};

    fn discovery() -> PageDiscovery {
        PageDiscovery::new(
            &CrawlerConfig::default(),
            &SiteSelectors::default(),
            &ScrollConfig::default(),
            RetryPolicy::new(3, Duration::from_millis(10)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_last_page() {
        let mut site = FakeSite::new(20);
        site.last_page = Some("42".into());
        let driver = FakeDriver::new(site);

        let last = discovery().last_page(&mut driver.page()).await.unwrap();
        assert_eq!(last, 42);
        assert_eq!(
            driver.site().gotos,
            vec!["https://cartelera.cdmx.gob.mx/busqueda".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_paginator_is_one_page() {
        let driver = FakeDriver::new(FakeSite::new(20));
        let last = discovery().last_page(&mut driver.page()).await.unwrap();
        assert_eq!(last, 1);
    }

    #[test]
    fn test_parse_last_page_fallbacks() {
        assert_eq!(parse_last_page(Some(" 7 ")), 7);
        assert_eq!(parse_last_page(Some("0")), 1);
        assert_eq!(parse_last_page(Some("last")), 1);
        assert_eq!(parse_last_page(None), 1);
    }
}
