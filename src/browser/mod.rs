//! Browser seam.
//!
//! Crawl components talk to the listing through [`BrowserPage`] and obtain
//! pages from a [`BrowserDriver`]. The production driver is headless
//! Chromium ([`chrome::ChromeDriver`]); tests script the trait directly.

pub mod chrome;
#[cfg(test)]
pub(crate) mod fake;
mod scripts;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{CardSummary, SiteSelectors};

pub use chrome::ChromeDriver;

pub type Result<T> = std::result::Result<T, BrowserError>;

/// Poll cadence of [`BrowserPage::wait_for`].
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Error signatures treated as transient, checked in order.
const TRANSIENT_SIGNATURES: &[(&str, TransientKind)] = &[
    ("execution context was destroyed", TransientKind::ContextDestroyed),
    ("cannot find context with specified id", TransientKind::ContextDestroyed),
    ("navigation failed", TransientKind::NavigationTimeout),
    ("net::err_timed_out", TransientKind::NavigationTimeout),
    ("target closed", TransientKind::TargetClosed),
    ("has been closed", TransientKind::TargetClosed),
    ("session with given id not found", TransientKind::TargetClosed),
    ("timeout", TransientKind::Timeout),
    ("timed out", TransientKind::Timeout),
];

#[derive(Debug, Clone, Copy)]
enum TransientKind {
    NavigationTimeout,
    ContextDestroyed,
    TargetClosed,
    Timeout,
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("navigation timed out: {0}")]
    NavigationTimeout(String),

    #[error("execution context destroyed: {0}")]
    ContextDestroyed(String),

    #[error("target closed: {0}")]
    TargetClosed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("script returned unexpected value: {0}")]
    Script(String),

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BrowserError {
    /// Classify a raw driver message against the transient signatures.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        let kind = TRANSIENT_SIGNATURES
            .iter()
            .find(|(signature, _)| lowered.contains(signature))
            .map(|(_, kind)| *kind);

        match kind {
            Some(TransientKind::NavigationTimeout) => Self::NavigationTimeout(message),
            Some(TransientKind::ContextDestroyed) => Self::ContextDestroyed(message),
            Some(TransientKind::TargetClosed) => Self::TargetClosed(message),
            Some(TransientKind::Timeout) => Self::Timeout(message),
            None => Self::Protocol(message),
        }
    }

    /// Whether the error matches a transient-fault signature.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NavigationTimeout(_)
                | Self::ContextDestroyed(_)
                | Self::TargetClosed(_)
                | Self::Timeout(_)
        )
    }
}

/// Whether a page gets its own browser context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageIsolation {
    /// Default context, shared with other shared pages.
    Shared,
    /// Fresh incognito context, disposed with the page.
    Isolated,
}

/// Source of pages; one driver per crawl invocation.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    type Page: BrowserPage;

    async fn open_page(&self, isolation: PageIsolation) -> Result<Self::Page>;
}

/// Operations the crawl performs on one browser tab.
#[async_trait]
pub trait BrowserPage: Send {
    /// Navigate and wait for the load event.
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Scroll down by `step_px`; returns the document's scrollable height.
    async fn scroll_by(&mut self, step_px: u32) -> Result<u64>;

    /// Number of elements matching `selector`.
    async fn count(&mut self, selector: &str) -> Result<usize>;

    /// Attribute of the first element matching `selector`.
    async fn attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>>;

    /// Scroll card `index` into view and click it.
    ///
    /// With `read_summary`, the card's banner, title and venue are read
    /// before the click. Fails with `ElementNotFound` when the listing has
    /// no card at `index`.
    async fn activate_card(
        &mut self,
        selectors: &SiteSelectors,
        index: u32,
        read_summary: bool,
    ) -> Result<Option<CardSummary>>;

    /// Evaluate a script and return its JSON value (`null` for undefined).
    async fn evaluate(&mut self, script: &str) -> Result<Value>;

    async fn current_url(&mut self) -> Result<Option<String>>;

    /// Leave the detail view: the return button if present, history otherwise.
    async fn go_back(&mut self, return_button: &str) -> Result<()>;

    /// Close the page and any context it owns. Idempotent.
    async fn close(&mut self) -> Result<()>;

    /// Poll until `selector` matches at least one element.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(selector).await? > 0 {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "waiting for '{selector}' exceeded {}ms",
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}
