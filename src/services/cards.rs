// src/services/cards.rs

//! Settle-scroll and card enumeration on one listing page.

use std::time::Duration;

use tracing::{debug, warn};

use crate::browser::{BrowserPage, Result};
use crate::models::{ScrollConfig, SiteSelectors};

/// Upper bound on scroll steps; the listing is never this tall.
const MAX_SCROLL_STEPS: u32 = 200;

/// Scroll to the bottom in fixed steps so lazy-loaded cards mount, then
/// wait for the last batch to settle.
pub async fn settle_scroll<P: BrowserPage + ?Sized>(page: &mut P, config: &ScrollConfig) -> Result<()> {
    let interval = Duration::from_millis(config.interval_ms);
    let mut scrolled: u64 = 0;
    let mut steps = 0;

    loop {
        tokio::time::sleep(interval).await;
        let height = page.scroll_by(config.step_px).await?;
        scrolled += u64::from(config.step_px);
        steps += 1;

        if scrolled >= height {
            break;
        }
        if steps >= MAX_SCROLL_STEPS {
            warn!(scrolled, height, "settle-scroll stopped at step limit");
            break;
        }
    }

    debug!(steps, scrolled, "settle-scroll reached bottom");
    tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;
    Ok(())
}

/// Counts the event cards of a settled listing page.
#[derive(Debug, Clone)]
pub struct CardEnumerator {
    card_selector: String,
    scroll: ScrollConfig,
}

impl CardEnumerator {
    pub fn new(selectors: &SiteSelectors, scroll: &ScrollConfig) -> Self {
        Self {
            card_selector: selectors.card.clone(),
            scroll: scroll.clone(),
        }
    }

    /// Settle-scroll the loaded listing, then count its cards.
    ///
    /// The count is the upper bound of `card_index` for this page.
    pub async fn enumerate<P: BrowserPage + ?Sized>(&self, page: &mut P) -> Result<u32> {
        self.settle(page).await?;
        self.count(page).await
    }

    pub async fn settle<P: BrowserPage + ?Sized>(&self, page: &mut P) -> Result<()> {
        settle_scroll(page, &self.scroll).await
    }

    /// Count cards without scrolling.
    pub async fn count<P: BrowserPage + ?Sized>(&self, page: &mut P) -> Result<u32> {
        let count = page.count(&self.card_selector).await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}
