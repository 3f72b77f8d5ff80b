// src/services/navigation.rs

//! Per-card navigation: activate, wait, extract, return.

use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::browser::{BrowserError, BrowserPage, Result};
use crate::error::AppError;
use crate::models::{CardSummary, Config, EventRecord, SiteSelectors};
use crate::services::{CardEnumerator, DetailExtractor, ExtractionContract, RetryPolicy};

/// Lifecycle of one card visit.
///
/// `Listing → Activating → DetailLoaded → Extracted → Returned`, with
/// `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Listing,
    Activating,
    DetailLoaded,
    Extracted,
    Returned,
    Failed,
}

impl CardState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Returned | Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_advance(self, next: CardState) -> bool {
        use CardState::*;
        match (self, next) {
            (Listing, Activating)
            | (Activating, Activating)
            | (Activating, DetailLoaded)
            | (DetailLoaded, Extracted)
            | (Extracted, Returned) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for CardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Listing => "listing",
            Self::Activating => "activating",
            Self::DetailLoaded => "detail_loaded",
            Self::Extracted => "extracted",
            Self::Returned => "returned",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of one card visit.
#[derive(Debug, Clone)]
pub struct CardOutcome {
    pub record: EventRecord,
    /// `Returned` or `Failed`.
    pub state: CardState,
    /// Activation retries performed.
    pub retries: u32,
}

impl CardOutcome {
    pub fn is_failed(&self) -> bool {
        self.state == CardState::Failed
    }
}

/// Tracks the state of the card being visited.
struct Visit {
    page_number: u32,
    card_index: u32,
    state: CardState,
}

impl Visit {
    fn new(page_number: u32, card_index: u32) -> Self {
        Self {
            page_number,
            card_index,
            state: CardState::Listing,
        }
    }

    fn advance(&mut self, next: CardState) {
        debug_assert!(
            self.state.can_advance(next),
            "illegal card transition {} -> {}",
            self.state,
            next
        );
        debug!(
            page_number = self.page_number,
            card_index = self.card_index,
            from = %self.state,
            to = %next,
            "card transition"
        );
        self.state = next;
    }
}

/// Drives card visits on a listing page.
#[derive(Debug, Clone)]
pub struct NavigationController {
    base: Config,
    enumerator: CardEnumerator,
    extractor: DetailExtractor,
    retry: RetryPolicy,
}

impl NavigationController {
    pub fn new(config: &Config) -> Self {
        let contract = ExtractionContract::new(config.crawler.extraction_version, &config.selectors);
        Self {
            base: config.clone(),
            enumerator: CardEnumerator::new(&config.selectors, &config.scroll),
            extractor: DetailExtractor::new(contract, RetryPolicy::extraction(&config.retry)),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }

    pub fn enumerator(&self) -> &CardEnumerator {
        &self.enumerator
    }

    fn selectors(&self) -> &SiteSelectors {
        &self.base.selectors
    }

    fn navigation_timeout(&self) -> Duration {
        self.base.crawler.navigation_timeout()
    }

    /// Navigate to listing page `page_number` and settle it.
    ///
    /// Navigation is retried on transient errors.
    pub async fn load_listing<P: BrowserPage + ?Sized>(
        &self,
        page: &mut P,
        page_number: u32,
    ) -> Result<()> {
        let url = self
            .base
            .crawler
            .listing_url(Some(page_number))
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;

        let mut attempts = self.retry.attempts("load listing page");
        loop {
            match page.goto(url.as_str(), self.navigation_timeout()).await {
                Ok(()) => break,
                Err(e) => {
                    let retryable = e.is_transient();
                    attempts.backoff(e, retryable).await?;
                }
            }
        }
        self.enumerator.settle(page).await
    }

    /// Load listing page `page_number` and count its cards.
    pub async fn open_listing<P: BrowserPage + ?Sized>(
        &self,
        page: &mut P,
        page_number: u32,
    ) -> std::result::Result<u32, AppError> {
        self.load_listing(page, page_number).await?;
        Ok(self.enumerator.count(page).await?)
    }

    /// Visit a card on a page already showing the settled listing, and
    /// leave the page on the listing again.
    pub async fn visit_card<P: BrowserPage + ?Sized>(
        &self,
        page: &mut P,
        page_number: u32,
        card_index: u32,
    ) -> CardOutcome {
        self.visit(page, page_number, card_index, false).await
    }

    /// Visit a card on a fresh page: the listing is loaded first and the
    /// page is left on the detail view.
    pub async fn visit_fresh<P: BrowserPage + ?Sized>(
        &self,
        page: &mut P,
        page_number: u32,
        card_index: u32,
    ) -> CardOutcome {
        self.visit(page, page_number, card_index, true).await
    }

    async fn visit<P: BrowserPage + ?Sized>(
        &self,
        page: &mut P,
        page_number: u32,
        card_index: u32,
        fresh: bool,
    ) -> CardOutcome {
        let mut visit = Visit::new(page_number, card_index);
        let mut attempts = self.retry.attempts("open card");
        // the card was enumerated, so a missing element means a stale listing
        let mut stale_reloaded = false;

        let summary = loop {
            visit.advance(CardState::Activating);
            let reload = fresh || attempts.current() > 1;
            match self.open_detail(page, page_number, card_index, reload).await {
                Ok(summary) => break summary,
                Err(e) => {
                    let stale = matches!(e, BrowserError::ElementNotFound(_)) && !stale_reloaded;
                    stale_reloaded |= stale;
                    let retryable = e.is_transient() || stale;
                    if let Err(e) = attempts.backoff(e, retryable).await {
                        visit.advance(CardState::Failed);
                        warn!(
                            page_number,
                            card_index,
                            attempts = attempts.current(),
                            error = %e,
                            "card failed"
                        );
                        if !fresh {
                            self.restore_listing(page, page_number).await;
                        }
                        return CardOutcome {
                            record: EventRecord::failed(page_number, card_index),
                            state: CardState::Failed,
                            retries: attempts.retries(),
                        };
                    }
                }
            }
        };
        visit.advance(CardState::DetailLoaded);

        let detail_url = match page.current_url().await {
            Ok(url) => url,
            Err(e) => {
                warn!(page_number, card_index, error = %e, "detail URL unavailable");
                None
            }
        };
        let fields = self.extractor.extract(page, summary.as_ref()).await;
        visit.advance(CardState::Extracted);

        if !fresh {
            self.return_to_listing(page, page_number).await;
        }
        visit.advance(CardState::Returned);

        CardOutcome {
            record: EventRecord::extracted(page_number, card_index, detail_url, fields),
            state: CardState::Returned,
            retries: attempts.retries(),
        }
    }

    /// Activate the card and wait for the detail container.
    async fn open_detail<P: BrowserPage + ?Sized>(
        &self,
        page: &mut P,
        page_number: u32,
        card_index: u32,
        reload: bool,
    ) -> Result<Option<CardSummary>> {
        if reload {
            self.load_listing(page, page_number).await?;
        }
        let read_summary = self.extractor.contract().reads_summary();
        let summary = page
            .activate_card(self.selectors(), card_index, read_summary)
            .await?;
        page.wait_for(
            &self.selectors().detail_container,
            self.base.crawler.detail_timeout(),
        )
        .await?;
        Ok(summary)
    }

    /// Go back to the listing, falling back to a fresh load.
    async fn return_to_listing<P: BrowserPage + ?Sized>(&self, page: &mut P, page_number: u32) {
        let mut attempts = self.retry.attempts("return to listing");
        loop {
            match self.go_back(page).await {
                Ok(()) => return,
                Err(e) => {
                    let retryable = e.is_transient();
                    if attempts.backoff(e, retryable).await.is_err() {
                        break;
                    }
                }
            }
        }
        self.restore_listing(page, page_number).await;
    }

    async fn go_back<P: BrowserPage + ?Sized>(&self, page: &mut P) -> Result<()> {
        page.go_back(&self.selectors().return_button).await?;
        page.wait_for(&self.selectors().card, self.navigation_timeout())
            .await?;
        self.enumerator.settle(page).await
    }

    async fn restore_listing<P: BrowserPage + ?Sized>(&self, page: &mut P, page_number: u32) {
        if let Err(e) = self.load_listing(page, page_number).await {
            warn!(page_number, error = %e, "listing reload failed");
        }
    }
}
