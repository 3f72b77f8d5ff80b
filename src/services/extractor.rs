// src/services/extractor.rs

//! Detail-view extraction.
//!
//! One [`ExtractionContract`] defines which fields a record carries and how
//! they are read from the detail view; [`DetailExtractor`] runs it inside a
//! bounded loop because the view re-renders while it settles. Extraction
//! never fails a card: exhaustion yields [`DetailFields::empty`].

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::browser::{BrowserError, BrowserPage};
use crate::models::{CardSummary, ContractVersion, DetailFields, Schedule, SiteSelectors};
use crate::services::RetryPolicy;

/// Raw shape returned by the extraction script.
#[derive(Debug, Default, Deserialize)]
struct RawDetail {
    #[serde(default)]
    description: Option<Vec<String>>,
    #[serde(default)]
    info: Option<Vec<String>>,
    #[serde(default)]
    schedule: Option<Schedule>,
    #[serde(default)]
    location: Option<String>,
}

/// Versioned field contract of the detail view.
#[derive(Debug, Clone)]
pub struct ExtractionContract {
    version: ContractVersion,
    selectors: SiteSelectors,
}

impl ExtractionContract {
    pub fn new(version: ContractVersion, selectors: &SiteSelectors) -> Self {
        Self {
            version,
            selectors: selectors.clone(),
        }
    }

    pub fn version(&self) -> ContractVersion {
        self.version
    }

    /// Whether the card summary must be read at activation.
    pub fn reads_summary(&self) -> bool {
        self.version >= ContractVersion::V2
    }

    /// Script evaluating to the raw detail object, or `null` while the
    /// detail container is not mounted.
    pub fn script(&self) -> String {
        let s = &self.selectors;
        format!(
            r#"(() => {{
    const wrapper = document.querySelector({container});
    if (!wrapper) return null;
    const texts = (root, sel) => Array.from(root.querySelectorAll(sel))
        .map(el => el.innerText.trim()).filter(Boolean);
    const label = (root, sel) => {{
        const el = root.querySelector(sel);
        return el ? el.innerText.trim() : null;
    }};
    const data = {{}};
    const desc = wrapper.querySelector({description});
    data.description = desc ? texts(desc, "p") : null;
    const info = wrapper.querySelector({info});
    data.info = info ? (wrapper.querySelector({info_items}) ? texts(wrapper, {info_items}) : null) : null;
    const sched = wrapper.querySelector({schedule});
    data.schedule = sched ? {{ date: label(sched, {date}), hour: label(sched, {hour}) }} : null;
    const loc = wrapper.querySelector({location});
    data.location = loc ? label(loc, "span") : null;
    return data;
}})()"#,
            container = literal(&s.detail_container),
            description = literal(&s.description),
            info = literal(&s.info),
            info_items = literal(&s.info_items),
            schedule = literal(&s.schedule),
            date = literal(&s.schedule_date),
            hour = literal(&s.schedule_hour),
            location = literal(&s.location),
        )
    }

    /// Map a script result onto the contract's fields.
    ///
    /// `Ok(None)` means the detail container was not mounted.
    pub fn parse(
        &self,
        raw: Value,
        summary: Option<&CardSummary>,
    ) -> Result<Option<DetailFields>, serde_json::Error> {
        if raw.is_null() {
            return Ok(None);
        }
        let raw: RawDetail = serde_json::from_value(raw)?;
        let mut fields = DetailFields {
            description: raw.description,
            info: raw.info,
            schedule: raw.schedule,
            location: raw.location,
            ..DetailFields::empty()
        };
        if self.reads_summary() {
            if let Some(summary) = summary {
                fields.banner_url = summary.banner_url.clone();
                fields.event_title = summary.event_title.clone();
                fields.venue = summary.venue.clone();
            }
        }
        Ok(Some(fields))
    }
}

fn literal(value: &str) -> String {
    Value::from(value).to_string()
}

/// Runs the contract against a loaded detail view.
#[derive(Debug, Clone)]
pub struct DetailExtractor {
    contract: ExtractionContract,
    retry: RetryPolicy,
}

impl DetailExtractor {
    pub fn new(contract: ExtractionContract, retry: RetryPolicy) -> Self {
        Self { contract, retry }
    }

    pub fn contract(&self) -> &ExtractionContract {
        &self.contract
    }

    /// Extract the current detail view.
    ///
    /// Transient errors and unmounted renders are retried; anything else,
    /// or exhaustion, degrades to the all-null payload.
    pub async fn extract<P: BrowserPage + ?Sized>(
        &self,
        page: &mut P,
        summary: Option<&CardSummary>,
    ) -> DetailFields {
        let script = self.contract.script();
        let mut attempts = self.retry.attempts("extract detail");

        loop {
            let error = match page.evaluate(&script).await {
                Ok(raw) => match self.contract.parse(raw, summary) {
                    Ok(Some(fields)) => return fields,
                    Ok(None) => {
                        BrowserError::ContextDestroyed("detail container not mounted".into())
                    }
                    Err(e) => BrowserError::Script(e.to_string()),
                },
                Err(e) => e,
            };

            let retryable = error.is_transient();
            if let Err(e) = attempts.backoff(error, retryable).await {
                warn!(
                    version = ?self.contract.version(),
                    attempts = attempts.current(),
                    error = %e,
                    "detail extraction degraded to empty record"
                );
                return DetailFields::empty();
            }
            debug!(attempt = attempts.current(), "re-reading detail view");
        }
    }
}
