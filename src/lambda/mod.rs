// src/lambda/mod.rs

//! AWS Lambda handlers.
//!
//! One binary serves every step of the pipeline; the step is chosen by
//! `CARTELERA_HANDLER`:
//! 1. `discover`: count the listing pages
//! 2. `snapshot-date`: pin the capture date for a run
//! 3. `crawl`: crawl one listing page into a shard
//! 4. `merge`: merge a date's shards into Parquet, optionally publishing it
//!
//! Every failure is answered as a status-coded response instead of a
//! runtime error.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use lambda_runtime::{Error as LambdaError, LambdaEvent};
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use crate::error::{AppError, Result};
use crate::models::{Config, CrawlPageRequest, InvocationResponse, MergeRequest, SnapshotDate};
use crate::pipeline::{
    Aggregator, EnvSecretProvider, GithubContentsPublisher, PageCrawler, publish_stored,
    with_browser,
};
use crate::storage::{ObjectStore, SnapshotWriter, open_store};

/// Environment variable selecting the handler.
pub const HANDLER_ENV: &str = "CARTELERA_HANDLER";

/// Environment variable pointing at an optional TOML config file.
pub const CONFIG_ENV: &str = "CARTELERA_CONFIG";

/// Pipeline step served by this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Discover,
    SnapshotDate,
    Crawl,
    Merge,
}

impl HandlerKind {
    /// Handler named by [`HANDLER_ENV`], defaulting to `crawl`.
    pub fn from_env() -> Result<Self> {
        match std::env::var(HANDLER_ENV) {
            Ok(name) => name.parse(),
            Err(_) => Ok(Self::Crawl),
        }
    }
}

impl FromStr for HandlerKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discover" => Ok(Self::Discover),
            "snapshot-date" | "snapshot_date" => Ok(Self::SnapshotDate),
            "crawl" => Ok(Self::Crawl),
            "merge" => Ok(Self::Merge),
            other => Err(AppError::config(format!(
                "{HANDLER_ENV}='{other}' is not one of discover, snapshot-date, crawl, merge"
            ))),
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Discover => "discover",
            Self::SnapshotDate => "snapshot-date",
            Self::Crawl => "crawl",
            Self::Merge => "merge",
        })
    }
}

/// Main Lambda handler function.
#[instrument(skip(event), fields(handler = %kind))]
pub async fn handler(
    kind: HandlerKind,
    event: LambdaEvent<Value>,
) -> std::result::Result<Value, LambdaError> {
    let (payload, _context) = event.into_parts();
    Ok(handle(kind, payload).await)
}

/// Run one handler and render its response.
pub async fn handle(kind: HandlerKind, payload: Value) -> Value {
    let start = std::time::Instant::now();
    let outcome = match kind {
        HandlerKind::SnapshotDate => Ok(snapshot_date()),
        _ => match load_lambda_config() {
            Ok(config) => dispatch(kind, &config, payload).await,
            Err(e) => Err(e),
        },
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(response) => {
            info!(elapsed_ms, "invocation completed");
            response
        }
        Err(e) => {
            error!(error = %e, status = e.status_code(), elapsed_ms, "invocation failed");
            to_value(InvocationResponse::from(&e))
        }
    }
}

async fn dispatch(kind: HandlerKind, config: &Config, payload: Value) -> Result<Value> {
    match kind {
        HandlerKind::Discover => discover(config).await,
        HandlerKind::SnapshotDate => Ok(snapshot_date()),
        HandlerKind::Crawl => {
            let request: CrawlPageRequest = parse_payload(payload)?;
            let store = open_bucket_store(config).await?;
            crawl(config, store, &request).await
        }
        HandlerKind::Merge => {
            let request: MergeRequest = parse_payload(payload)?;
            // an invalid request is answered before any storage is touched
            let date = request.snapshot_date()?;
            let store = open_bucket_store(config).await?;
            merge(config, store, date).await
        }
    }
}

/// `{snapshot_date}` for today in UTC.
pub fn snapshot_date() -> Value {
    json!({ "snapshot_date": SnapshotDate::today_utc() })
}

/// Count the listing pages and enumerate them for a fan-out.
pub async fn discover(config: &Config) -> Result<Value> {
    let last_page = with_browser(&config.crawler, |driver| async move {
        PageCrawler::new(driver, config).discover().await
    })
    .await?;

    let page_numbers: Vec<u32> = (1..=last_page).collect();
    Ok(to_value(InvocationResponse::ok(json!({
        "last_page": last_page,
        "page_numbers": page_numbers,
    }))))
}

/// Crawl one listing page and write its shard.
pub async fn crawl(
    config: &Config,
    store: Arc<dyn ObjectStore>,
    request: &CrawlPageRequest,
) -> Result<Value> {
    let page_number = request.page_number()?;
    let date = request.snapshot_date()?;

    let snapshot = with_browser(&config.crawler, |driver| async move {
        PageCrawler::new(driver, config)
            .crawl_page(page_number, date)
            .await
    })
    .await?;

    let key = SnapshotWriter::new(store, &config.storage)
        .write(&snapshot)
        .await?;

    Ok(to_value(InvocationResponse::ok(json!({
        "message": format!("Page {page_number} crawled"),
        "page_number": page_number,
        "snapshot_date": date,
        "records": snapshot.len(),
        "failed": snapshot.failed_count(),
        "key": key,
    }))))
}

/// Merge a date's shards and publish the artifact when enabled.
pub async fn merge(config: &Config, store: Arc<dyn ObjectStore>, date: SnapshotDate) -> Result<Value> {
    let publish = config.publish.enabled;
    let report = Aggregator::new(Arc::clone(&store), &config.storage, &config.merge)
        .merge(date, publish)
        .await?;

    let mut body = json!({
        "message": format!("Parquet written to {}", report.location),
        "snapshot_date": date,
        "key": report.key,
        "shards": report.shards,
        "rows": report.rows,
    });

    if publish {
        let publisher =
            GithubContentsPublisher::new(&config.publish, Arc::new(EnvSecretProvider))?;
        let published = publish_stored(&publisher, store.as_ref(), &report.key).await?;
        body["published"] = serde_json::to_value(&published)?;
    }
    Ok(to_value(InvocationResponse::ok(body)))
}

/// Load configuration suitable for Lambda environment.
fn load_lambda_config() -> Result<Config> {
    let mut config = match std::env::var(CONFIG_ENV) {
        Ok(path) => Config::load(&path)?,
        Err(_) => Config::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

async fn open_bucket_store(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    config.storage.require_bucket()?;
    open_store(&config.storage).await
}

fn parse_payload<T: serde::de::DeserializeOwned + Default>(payload: Value) -> Result<T> {
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload).map_err(|e| AppError::invalid_input(e.to_string()))
}

fn to_value(response: InvocationResponse) -> Value {
    json!({
        "statusCode": response.status_code,
        "body": response.body,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::models::{EventRecord, PageSnapshot};
    use crate::storage::LocalStorage;

    fn local(tmp: &TempDir) -> Arc<dyn ObjectStore> {
        Arc::new(LocalStorage::new(tmp.path()))
    }

    #[test]
    fn test_handler_names() {
        assert_eq!("discover".parse::<HandlerKind>().unwrap(), HandlerKind::Discover);
        assert_eq!(
            "SNAPSHOT-DATE".parse::<HandlerKind>().unwrap(),
            HandlerKind::SnapshotDate
        );
        assert_eq!(HandlerKind::Merge.to_string(), "merge");
        assert!("scrape".parse::<HandlerKind>().is_err());
    }

    #[test]
    fn test_snapshot_date_shape() {
        let value = snapshot_date();
        let date = value["snapshot_date"].as_str().unwrap();
        assert_eq!(date.len(), 8);
        assert!(date.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_merge_without_date_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.bucket = Some("cartelera-test".into());
        config.storage.local_root = tmp.path().display().to_string();

        let err = dispatch(HandlerKind::Merge, &config, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let response = to_value(InvocationResponse::from(&err));
        assert_eq!(response["statusCode"], 400);
        assert_eq!(
            response["body"]["error"],
            "Invalid input: Missing 'snapshot_date' in event"
        );
        assert!(local(&tmp).list_keys("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_writes_artifact() {
        let tmp = TempDir::new().unwrap();
        let store = local(&tmp);
        let config = Config::default();
        let date: SnapshotDate = "20251002".parse().unwrap();

        let writer = SnapshotWriter::new(Arc::clone(&store), &config.storage);
        for page in 1..=2 {
            let records = (0..3).map(|i| EventRecord::failed(page, i)).collect();
            writer
                .write(&PageSnapshot::new(page, date, records))
                .await
                .unwrap();
        }

        let response = merge(&config, Arc::clone(&store), date).await.unwrap();
        assert_eq!(response["statusCode"], 200);
        assert_eq!(response["body"]["rows"], 6);
        assert_eq!(response["body"]["key"], "database/20251002.parquet");
        assert!(
            response["body"]["message"]
                .as_str()
                .unwrap()
                .starts_with("Parquet written to ")
        );
        assert!(
            store
                .get_object("database/20251002.parquet")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_merge_without_shards_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default();
        let date: SnapshotDate = "20251003".parse().unwrap();

        let err = merge(&config, local(&tmp), date).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_null_payload_uses_defaults() {
        let request: CrawlPageRequest = parse_payload(Value::Null).unwrap();
        assert_eq!(request.page_number().unwrap(), 1);
        let err = parse_payload::<CrawlPageRequest>(json!({"page_number": [1]})).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
