//! Headless Chromium driver built on chromiumoxide.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::{EnableParams, SetBlockedUrLsParams};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::error::CdpError;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserDriver, BrowserError, BrowserPage, PageIsolation, Result, scripts};
use crate::models::{CardSummary, CrawlerConfig, SiteSelectors};

/// Flags that keep Chromium inside small serverless sandboxes.
const LAUNCH_ARGS: &[&str] = &[
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--single-process",
];

/// URL patterns of images, media and fonts, which the crawler never reads.
const BLOCKED_URL_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.mp4", "*.webm",
    "*.mp3", "*.woff", "*.woff2", "*.ttf", "*.otf",
];

impl From<CdpError> for BrowserError {
    fn from(error: CdpError) -> Self {
        match error {
            CdpError::Timeout => BrowserError::Timeout("CDP request timed out".into()),
            other => BrowserError::classify(other.to_string()),
        }
    }
}

/// The browser process of one crawl invocation.
///
/// Call [`ChromeDriver::shutdown`] when done; dropping the driver without
/// it still kills the child process.
pub struct ChromeDriver {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
    block_resources: bool,
}

impl ChromeDriver {
    /// Launch Chromium with the crawler's settings.
    pub async fn launch(config: &CrawlerConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .args(LAUNCH_ARGS.iter().copied())
            .request_timeout(config.navigation_timeout());
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler stopped");
                    break;
                }
            }
        });

        info!("Chromium launched");
        Ok(Self {
            browser: Arc::new(browser),
            handler,
            navigation_timeout: config.navigation_timeout(),
            block_resources: config.block_resources,
        })
    }

    /// Close the browser process and stop its event handler.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            browser, handler, ..
        } = self;

        let outcome = match Arc::try_unwrap(browser) {
            Ok(mut browser) => {
                let closed = browser.close().await.map(|_| ());
                if let Err(e) = browser.wait().await {
                    warn!(error = %e, "waiting for Chromium exit failed");
                }
                closed.map_err(BrowserError::from)
            }
            Err(_) => {
                warn!("pages still hold the browser at shutdown; dropping it");
                Ok(())
            }
        };

        handler.abort();
        info!("Chromium closed");
        outcome
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    type Page = ChromePage;

    async fn open_page(&self, isolation: PageIsolation) -> Result<ChromePage> {
        let context_id = match isolation {
            PageIsolation::Shared => None,
            PageIsolation::Isolated => Some(
                self.browser
                    .execute(CreateBrowserContextParams::default())
                    .await?
                    .result
                    .browser_context_id,
            ),
        };

        let mut params = CreateTargetParams::builder().url("about:blank");
        if let Some(id) = &context_id {
            params = params.browser_context_id(id.clone());
        }
        let params = params.build().map_err(BrowserError::Protocol)?;

        let opened = match self.browser.new_page(params).await {
            Ok(page) => match self.prepare(&page).await {
                Ok(()) => Ok(page),
                Err(e) => {
                    if let Err(close) = page.close().await {
                        debug!(error = %close, "closing unprepared page failed");
                    }
                    Err(e)
                }
            },
            Err(e) => Err(e.into()),
        };
        match opened {
            Ok(page) => Ok(ChromePage {
                page: Some(page),
                context_id,
                browser: Arc::clone(&self.browser),
                navigation_timeout: self.navigation_timeout,
            }),
            Err(e) => {
                if let Some(id) = context_id {
                    dispose_context(&self.browser, id).await;
                }
                Err(e)
            }
        }
    }
}

impl ChromeDriver {
    /// Apply per-page request blocking before the first navigation.
    async fn prepare(&self, page: &Page) -> Result<()> {
        if self.block_resources {
            page.execute(EnableParams::default()).await?;
            page.execute(SetBlockedUrLsParams::new(blocked_url_patterns()))
                .await?;
            debug!(patterns = BLOCKED_URL_PATTERNS.len(), "resource blocking enabled");
        }
        Ok(())
    }
}

fn blocked_url_patterns() -> Vec<String> {
    BLOCKED_URL_PATTERNS.iter().map(|p| p.to_string()).collect()
}

async fn dispose_context(browser: &Browser, id: BrowserContextId) {
    if let Err(e) = browser.execute(DisposeBrowserContextParams::new(id)).await {
        warn!(error = %e, "failed to dispose browser context");
    }
}

/// One Chromium tab, optionally owning an incognito context.
pub struct ChromePage {
    page: Option<Page>,
    context_id: Option<BrowserContextId>,
    browser: Arc<Browser>,
    navigation_timeout: Duration,
}

#[derive(Deserialize)]
struct Activation {
    found: bool,
    summary: Option<CardSummary>,
}

impl ChromePage {
    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::TargetClosed("page already closed".into()))
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T> {
        let value = self.evaluate_value(script).await?;
        serde_json::from_value(value).map_err(|e| BrowserError::Script(e.to_string()))
    }

    async fn evaluate_value(&self, script: String) -> Result<Value> {
        let evaluation = tokio::time::timeout(
            self.navigation_timeout,
            self.page()?.evaluate_expression(script),
        )
        .await
        .map_err(|_| BrowserError::Timeout("script evaluation".into()))??;
        Ok(evaluation.value().cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl BrowserPage for ChromePage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let page = self.page()?;
        tokio::time::timeout(timeout, page.goto(url))
            .await
            .map_err(|_| BrowserError::NavigationTimeout(url.to_string()))??;
        Ok(())
    }

    async fn scroll_by(&mut self, step_px: u32) -> Result<u64> {
        self.eval(scripts::scroll_by(step_px)).await
    }

    async fn count(&mut self, selector: &str) -> Result<usize> {
        self.eval(scripts::count(selector)).await
    }

    async fn attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>> {
        self.eval(scripts::attribute(selector, name)).await
    }

    async fn activate_card(
        &mut self,
        selectors: &SiteSelectors,
        index: u32,
        read_summary: bool,
    ) -> Result<Option<CardSummary>> {
        let activation: Activation = self
            .eval(scripts::activate_card(selectors, index, read_summary))
            .await?;
        if !activation.found {
            return Err(BrowserError::ElementNotFound(format!("card {index}")));
        }
        Ok(activation.summary)
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value> {
        self.evaluate_value(script.to_string()).await
    }

    async fn current_url(&mut self) -> Result<Option<String>> {
        Ok(self.page()?.url().await?)
    }

    async fn go_back(&mut self, return_button: &str) -> Result<()> {
        let via: String = self.eval(scripts::go_back(return_button)).await?;
        debug!(via = %via, "left detail view");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let closed = match self.page.take() {
            Some(page) => page.close().await.map_err(BrowserError::from),
            None => Ok(()),
        };
        if let Some(id) = self.context_id.take() {
            dispose_context(&self.browser, id).await;
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_patterns_cover_heavy_assets() {
        let patterns = blocked_url_patterns();
        for ext in ["png", "jpg", "webp", "mp4", "woff2", "ttf"] {
            assert!(patterns.contains(&format!("*.{ext}")), "{ext} not blocked");
        }
        assert!(patterns.iter().all(|p| !p.contains("js") && !p.contains("css")));
    }
}
