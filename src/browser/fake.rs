//! Scripted in-memory listing used by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{BrowserDriver, BrowserError, BrowserPage, PageIsolation, Result};
use crate::models::{CardSummary, SiteSelectors};

/// Shared state of the fake site, visible to every page it opens.
#[derive(Debug)]
pub struct FakeSite {
    pub selectors: SiteSelectors,
    pub card_count: usize,
    pub scroll_height: u64,
    /// `jp-data` of the last-page control; `None` hides the paginator.
    pub last_page: Option<String>,
    /// Remaining transient activation failures per card.
    pub activation_failures: HashMap<u32, u32>,
    /// Remaining detail renders that come back without the container.
    pub blank_renders: HashMap<u32, u32>,
    /// Cards whose activation fails with a non-transient error.
    pub broken_cards: Vec<u32>,
    /// Listing pages whose navigation always times out.
    pub unreachable_pages: Vec<u32>,
    /// Remaining activations that find the card not yet mounted.
    pub unmounted_cards: HashMap<u32, u32>,
    /// Remaining go-back attempts that time out.
    pub back_failures: u32,
    pub gotos: Vec<String>,
    pub activations: Vec<u32>,
    pub scrolls: usize,
    pub opened: usize,
    pub closed: usize,
}

impl FakeSite {
    pub fn new(card_count: usize) -> Self {
        Self {
            selectors: SiteSelectors::default(),
            card_count,
            scroll_height: 1500,
            last_page: None,
            activation_failures: HashMap::new(),
            blank_renders: HashMap::new(),
            broken_cards: Vec::new(),
            unreachable_pages: Vec::new(),
            unmounted_cards: HashMap::new(),
            back_failures: 0,
            gotos: Vec::new(),
            activations: Vec::new(),
            scrolls: 0,
            opened: 0,
            closed: 0,
        }
    }

    pub fn detail_url(index: u32) -> String {
        format!("https://cartelera.cdmx.gob.mx/evento/{index}")
    }

    pub fn summary(index: u32) -> CardSummary {
        CardSummary {
            banner_url: Some(format!("https://cdn.example.com/banner-{index}.jpg")),
            event_title: Some(format!("Evento {index}")),
            venue: Some("Teatro de la Ciudad".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Blank,
    Listing,
    Detail(u32),
}

/// Driver handing out pages bound to one [`FakeSite`].
#[derive(Clone)]
pub struct FakeDriver {
    site: Arc<Mutex<FakeSite>>,
}

impl FakeDriver {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site: Arc::new(Mutex::new(site)),
        }
    }

    pub fn site(&self) -> MutexGuard<'_, FakeSite> {
        lock(&self.site)
    }

    pub fn page(&self) -> FakePage {
        self.site().opened += 1;
        FakePage {
            site: Arc::clone(&self.site),
            view: View::Blank,
            open: true,
        }
    }
}

fn lock(site: &Mutex<FakeSite>) -> MutexGuard<'_, FakeSite> {
    site.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    type Page = FakePage;

    async fn open_page(&self, _isolation: PageIsolation) -> Result<FakePage> {
        Ok(self.page())
    }
}

pub struct FakePage {
    site: Arc<Mutex<FakeSite>>,
    view: View,
    open: bool,
}

impl FakePage {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(BrowserError::TargetClosed("fake page closed".into()))
        }
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let mut site = lock(&self.site);
        site.gotos.push(url.to_string());
        if site
            .unreachable_pages
            .iter()
            .any(|page| url.ends_with(&format!("pagina={page}")))
        {
            return Err(BrowserError::NavigationTimeout(url.to_string()));
        }
        self.view = View::Listing;
        Ok(())
    }

    async fn scroll_by(&mut self, _step_px: u32) -> Result<u64> {
        self.ensure_open()?;
        let mut site = lock(&self.site);
        site.scrolls += 1;
        Ok(site.scroll_height)
    }

    async fn count(&mut self, selector: &str) -> Result<usize> {
        self.ensure_open()?;
        let site = lock(&self.site);
        let count = match self.view {
            View::Listing if selector == site.selectors.card => site.card_count,
            View::Listing if selector == site.selectors.paginator => {
                usize::from(site.last_page.is_some())
            }
            View::Detail(_) if selector == site.selectors.detail_container => 1,
            _ => 0,
        };
        Ok(count)
    }

    async fn attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        let site = lock(&self.site);
        if self.view == View::Listing
            && selector == site.selectors.last_page
            && name == site.selectors.last_page_attr
        {
            return Ok(site.last_page.clone());
        }
        Ok(None)
    }

    async fn activate_card(
        &mut self,
        _selectors: &SiteSelectors,
        index: u32,
        read_summary: bool,
    ) -> Result<Option<CardSummary>> {
        self.ensure_open()?;
        let mut site = lock(&self.site);
        site.activations.push(index);
        if self.view != View::Listing || index as usize >= site.card_count {
            return Err(BrowserError::ElementNotFound(format!("card {index}")));
        }
        if let Some(remaining) = site.unmounted_cards.get_mut(&index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BrowserError::ElementNotFound(format!("card {index}")));
            }
        }
        if site.broken_cards.contains(&index) {
            return Err(BrowserError::Script(format!("card {index} click handler threw")));
        }
        if let Some(remaining) = site.activation_failures.get_mut(&index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BrowserError::ContextDestroyed(
                    "Execution context was destroyed".into(),
                ));
            }
        }
        self.view = View::Detail(index);
        Ok(read_summary.then(|| FakeSite::summary(index)))
    }

    async fn evaluate(&mut self, _script: &str) -> Result<Value> {
        self.ensure_open()?;
        let View::Detail(index) = self.view else {
            return Ok(Value::Null);
        };
        let mut site = lock(&self.site);
        if let Some(remaining) = site.blank_renders.get_mut(&index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(Value::Null);
            }
        }
        Ok(json!({
            "description": [format!("Descripción del evento {index}")],
            "info": ["Entrada libre", "Todo público"],
            "schedule": { "date": "12 de octubre", "hour": "19:00" },
            "location": "Centro Histórico",
        }))
    }

    async fn current_url(&mut self) -> Result<Option<String>> {
        self.ensure_open()?;
        Ok(match self.view {
            View::Blank => None,
            View::Listing => lock(&self.site).gotos.last().cloned(),
            View::Detail(index) => Some(FakeSite::detail_url(index)),
        })
    }

    async fn go_back(&mut self, _return_button: &str) -> Result<()> {
        self.ensure_open()?;
        let mut site = lock(&self.site);
        if site.back_failures > 0 {
            site.back_failures -= 1;
            return Err(BrowserError::Timeout("return button did not respond".into()));
        }
        self.view = View::Listing;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            lock(&self.site).closed += 1;
        }
        Ok(())
    }
}
