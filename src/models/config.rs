//! Application configuration structures.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Browser and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Retry and backoff settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Settle-scroll cadence
    #[serde(default)]
    pub scroll: ScrollConfig,

    /// CSS selectors of the listing and detail views
    #[serde(default)]
    pub selectors: SiteSelectors,

    /// Shard and artifact locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Columnar merge settings
    #[serde(default)]
    pub merge: MergeConfig,

    /// Downstream publishing of the merged artifact
    #[serde(default)]
    pub publish: PublishConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Override selected values from the process environment.
    ///
    /// Unparsable values are configuration errors rather than ignored.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(bucket) = lookup("BUCKET_NAME").filter(|b| !b.trim().is_empty()) {
            self.storage.bucket = Some(bucket);
        }
        if let Some(value) = lookup("MAX_CONCURRENT") {
            self.crawler.max_concurrent = parse_env("MAX_CONCURRENT", &value)?;
        }
        if let Some(value) = lookup("CRAWL_STRATEGY") {
            self.crawler.strategy = parse_env("CRAWL_STRATEGY", &value)?;
        }
        if let Some(value) = lookup("NAVIGATION_TIMEOUT_SECS") {
            self.crawler.navigation_timeout_secs = parse_env("NAVIGATION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("DETAIL_TIMEOUT_SECS") {
            self.crawler.detail_timeout_secs = parse_env("DETAIL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("BLOCK_RESOURCES") {
            self.crawler.block_resources = parse_env("BLOCK_RESOURCES", &value)?;
        }
        if let Some(path) = lookup("CHROME_EXECUTABLE") {
            self.crawler.chrome_executable = Some(path);
        }
        if let Some(value) = lookup("PUBLISH_ENABLED") {
            self.publish.enabled = parse_env("PUBLISH_ENABLED", &value)?;
        }
        if let Some(repo) = lookup("PUBLISH_REPOSITORY") {
            self.publish.repository = repo;
        }
        if let Some(branch) = lookup("PUBLISH_BRANCH") {
            self.publish.branch = branch;
        }
        if let Some(id) = lookup("PUBLISH_TOKEN_SECRET_ID") {
            self.publish.token_secret_id = id;
        }
        Ok(())
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if self.crawler.navigation_timeout_secs == 0 || self.crawler.detail_timeout_secs == 0 {
            return Err(AppError::validation("crawler timeouts must be > 0"));
        }
        if self.retry.max_attempts == 0 || self.retry.extraction_attempts == 0 {
            return Err(AppError::validation("retry attempts must be > 0"));
        }
        if self.scroll.step_px == 0 {
            return Err(AppError::validation("scroll.step_px must be > 0"));
        }
        if self.selectors.card.trim().is_empty() || self.selectors.detail_container.trim().is_empty()
        {
            return Err(AppError::validation("card and detail selectors are required"));
        }
        if self.merge.batch_size == 0 {
            return Err(AppError::validation("merge.batch_size must be > 0"));
        }
        if self.publish.enabled && self.publish.repository.trim().is_empty() {
            return Err(AppError::validation(
                "publish.repository is required when publishing is enabled",
            ));
        }
        self.crawler.listing_url(None)?;
        Ok(())
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::config(format!("{name}={value:?} is invalid: {e}")))
}

/// How cards of one listing page are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStrategy {
    /// One shared page per listing page, cards visited one after another.
    #[default]
    Sequential,
    /// One incognito browser context per card, bounded by the governor.
    Isolated,
}

impl FromStr for CrawlStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "isolated" => Ok(Self::Isolated),
            other => Err(format!("unknown crawl strategy '{other}'")),
        }
    }
}

/// Revision of the detail extraction contract.
///
/// - `V1`: description, info, schedule, location
/// - `V2`: V1 plus banner_url, event_title, venue from the card summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractVersion {
    V1,
    #[default]
    V2,
}

/// Browser and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Site origin
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Path of the paginated listing
    #[serde(default = "defaults::listing_path")]
    pub listing_path: String,

    /// Run Chromium without a window
    #[serde(default = "defaults::headless")]
    pub headless: bool,

    /// Explicit Chromium binary (otherwise auto-detected)
    #[serde(default)]
    pub chrome_executable: Option<String>,

    /// Skip image, media and font requests on every page
    #[serde(default = "defaults::block_resources")]
    pub block_resources: bool,

    /// Page navigation timeout in seconds
    #[serde(default = "defaults::navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// Wait for the detail container, in seconds
    #[serde(default = "defaults::detail_timeout")]
    pub detail_timeout_secs: u64,

    /// Governor capacity
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Card visiting strategy
    #[serde(default)]
    pub strategy: CrawlStrategy,

    /// Extraction contract revision
    #[serde(default)]
    pub extraction_version: ContractVersion,
}

impl CrawlerConfig {
    /// Listing URL, optionally pinned to a page number.
    pub fn listing_url(&self, page_number: Option<u32>) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?.join(&self.listing_path)?;
        if let Some(page) = page_number {
            url.query_pairs_mut()
                .append_pair("tipo", "ALL")
                .append_pair("pagina", &page.to_string());
        }
        Ok(url)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn detail_timeout(&self) -> Duration {
        Duration::from_secs(self.detail_timeout_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            listing_path: defaults::listing_path(),
            headless: defaults::headless(),
            chrome_executable: None,
            block_resources: defaults::block_resources(),
            navigation_timeout_secs: defaults::navigation_timeout(),
            detail_timeout_secs: defaults::detail_timeout(),
            max_concurrent: defaults::max_concurrent(),
            strategy: CrawlStrategy::default(),
            extraction_version: ContractVersion::default(),
        }
    }
}

/// Retry and backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts for navigation-level operations
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles on every retry
    #[serde(default = "defaults::base_delay")]
    pub base_delay_ms: u64,

    /// Attempts for the detail extraction loop
    #[serde(default = "defaults::extraction_attempts")]
    pub extraction_attempts: u32,

    /// First backoff delay of the extraction loop
    #[serde(default = "defaults::extraction_delay")]
    pub extraction_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay(),
            extraction_attempts: defaults::extraction_attempts(),
            extraction_delay_ms: defaults::extraction_delay(),
        }
    }
}

/// Settle-scroll cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrollConfig {
    #[serde(default = "defaults::step_px")]
    pub step_px: u32,

    #[serde(default = "defaults::interval")]
    pub interval_ms: u64,

    /// Pause after reaching the bottom so lazy content can mount
    #[serde(default = "defaults::settle")]
    pub settle_ms: u64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            step_px: defaults::step_px(),
            interval_ms: defaults::interval(),
            settle_ms: defaults::settle(),
        }
    }
}

/// CSS selectors of the listing and detail views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSelectors {
    #[serde(default = "defaults::card")]
    pub card: String,
    #[serde(default = "defaults::card_image")]
    pub card_image: String,
    #[serde(default = "defaults::card_name")]
    pub card_name: String,
    #[serde(default = "defaults::card_venue")]
    pub card_venue: String,

    #[serde(default = "defaults::paginator")]
    pub paginator: String,
    #[serde(default = "defaults::last_page")]
    pub last_page: String,
    #[serde(default = "defaults::last_page_attr")]
    pub last_page_attr: String,

    #[serde(default = "defaults::detail_container")]
    pub detail_container: String,
    #[serde(default = "defaults::return_button")]
    pub return_button: String,
    #[serde(default = "defaults::description")]
    pub description: String,
    #[serde(default = "defaults::info")]
    pub info: String,
    #[serde(default = "defaults::info_items")]
    pub info_items: String,
    #[serde(default = "defaults::schedule")]
    pub schedule: String,
    #[serde(default = "defaults::schedule_date")]
    pub schedule_date: String,
    #[serde(default = "defaults::schedule_hour")]
    pub schedule_hour: String,
    #[serde(default = "defaults::location")]
    pub location: String,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            card: defaults::card(),
            card_image: defaults::card_image(),
            card_name: defaults::card_name(),
            card_venue: defaults::card_venue(),
            paginator: defaults::paginator(),
            last_page: defaults::last_page(),
            last_page_attr: defaults::last_page_attr(),
            detail_container: defaults::detail_container(),
            return_button: defaults::return_button(),
            description: defaults::description(),
            info: defaults::info(),
            info_items: defaults::info_items(),
            schedule: defaults::schedule(),
            schedule_date: defaults::schedule_date(),
            schedule_hour: defaults::schedule_hour(),
            location: defaults::location(),
        }
    }
}

/// Shard and artifact locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Object storage bucket; required by the Lambda handlers
    #[serde(default)]
    pub bucket: Option<String>,

    /// Root directory of the local backend
    #[serde(default = "defaults::local_root")]
    pub local_root: String,

    #[serde(default = "defaults::shard_prefix")]
    pub shard_prefix: String,

    #[serde(default = "defaults::database_prefix")]
    pub database_prefix: String,
}

impl StorageConfig {
    /// The configured bucket, or a configuration error.
    pub fn require_bucket(&self) -> Result<&str> {
        self.bucket
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| AppError::config("BUCKET_NAME is not set"))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            local_root: defaults::local_root(),
            shard_prefix: defaults::shard_prefix(),
            database_prefix: defaults::database_prefix(),
        }
    }
}

/// Columnar merge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "defaults::zstd_level")]
    pub zstd_level: i32,

    /// Rows decoded per Arrow record batch
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            zstd_level: defaults::zstd_level(),
            batch_size: defaults::batch_size(),
        }
    }
}

/// Downstream publishing of the merged artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub enabled: bool,

    /// `owner/name` of the content repository
    #[serde(default)]
    pub repository: String,

    #[serde(default = "defaults::branch")]
    pub branch: String,

    /// Directory inside the repository receiving the artifact
    #[serde(default = "defaults::destination_dir")]
    pub destination_dir: String,

    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    /// Opaque identifier handed to the secret provider
    #[serde(default = "defaults::token_secret_id")]
    pub token_secret_id: String,

    #[serde(default = "defaults::commit_message")]
    pub commit_message: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repository: String::new(),
            branch: defaults::branch(),
            destination_dir: defaults::destination_dir(),
            api_base: defaults::api_base(),
            token_secret_id: defaults::token_secret_id(),
            commit_message: defaults::commit_message(),
        }
    }
}

mod defaults {
    // Crawler defaults
    pub fn base_url() -> String {
        "https://cartelera.cdmx.gob.mx".into()
    }
    pub fn listing_path() -> String {
        "/busqueda".into()
    }
    pub fn headless() -> bool {
        true
    }
    pub fn block_resources() -> bool {
        true
    }
    pub fn navigation_timeout() -> u64 {
        60
    }
    pub fn detail_timeout() -> u64 {
        20
    }
    pub fn max_concurrent() -> usize {
        9
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn base_delay() -> u64 {
        600
    }
    pub fn extraction_attempts() -> u32 {
        3
    }
    pub fn extraction_delay() -> u64 {
        1000
    }

    // Scroll defaults
    pub fn step_px() -> u32 {
        500
    }
    pub fn interval() -> u64 {
        200
    }
    pub fn settle() -> u64 {
        1000
    }

    // Selector defaults
    pub fn card() -> String {
        "#cdmx-billboard-tab-event-list .cdmx-billboard-event-result-list-item-container".into()
    }
    pub fn card_image() -> String {
        ".cdmx-billboard-event-result-list-item-image".into()
    }
    pub fn card_name() -> String {
        ".cdmx-billboard-event-result-list-item-event-name".into()
    }
    pub fn card_venue() -> String {
        ".cdmx-billboard-event-result-list-item-event-venue".into()
    }
    pub fn paginator() -> String {
        "#cdmx-billboard-event-paginator".into()
    }
    pub fn last_page() -> String {
        "#cdmx-billboard-event-paginator li.page.btn[jp-role='last']".into()
    }
    pub fn last_page_attr() -> String {
        "jp-data".into()
    }
    pub fn detail_container() -> String {
        ".cdmx-billboard-generic-page-container".into()
    }
    pub fn return_button() -> String {
        "#cdmx-billboard-return-home-button".into()
    }
    pub fn description() -> String {
        ".cdmx-billboard-page-event-description-container".into()
    }
    pub fn info() -> String {
        ".cdmx-billboard-page-event-info-container".into()
    }
    pub fn info_items() -> String {
        ".cdmx-billboard-page-event-info-container-bordered ul li".into()
    }
    pub fn schedule() -> String {
        ".cdmx-billboard-page-event-schedule-container".into()
    }
    pub fn schedule_date() -> String {
        "#cdmx-billboard-current-date-label".into()
    }
    pub fn schedule_hour() -> String {
        "#cdmx-billboard-current-hour-label".into()
    }
    pub fn location() -> String {
        ".cdmx-billboard-page-event-location-container".into()
    }

    // Storage defaults
    pub fn local_root() -> String {
        "storage".into()
    }
    pub fn shard_prefix() -> String {
        "snapshot_date".into()
    }
    pub fn database_prefix() -> String {
        "database".into()
    }

    // Merge defaults
    pub fn zstd_level() -> i32 {
        3
    }
    pub fn batch_size() -> usize {
        1024
    }

    // Publish defaults
    pub fn branch() -> String {
        "main".into()
    }
    pub fn destination_dir() -> String {
        "data".into()
    }
    pub fn api_base() -> String {
        "https://api.github.com".into()
    }
    pub fn token_secret_id() -> String {
        "PUBLISH_TOKEN".into()
    }
    pub fn commit_message() -> String {
        "Update scraped events snapshot".into()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.crawler.strategy, CrawlStrategy::Sequential);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.scroll.step_px, 500);
        assert!(config.crawler.block_resources);
    }

    #[test]
    fn test_resource_blocking_can_be_disabled() {
        let config: Config = toml::from_str(
            r#"
            [crawler]
            block_resources = false
            "#,
        )
        .unwrap();
        assert!(!config.crawler.block_resources);

        let mut config = Config::default();
        config
            .apply_overrides(|name| (name == "BLOCK_RESOURCES").then(|| "false".to_string()))
            .unwrap();
        assert!(!config.crawler.block_resources);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [crawler]
            strategy = "isolated"
            max_concurrent = 4

            [storage]
            bucket = "events-bucket"
            "#,
        )
        .unwrap();

        assert_eq!(config.crawler.strategy, CrawlStrategy::Isolated);
        assert_eq!(config.crawler.max_concurrent, 4);
        assert_eq!(config.crawler.detail_timeout_secs, 20);
        assert_eq!(config.storage.require_bucket().unwrap(), "events-bucket");
        assert_eq!(config.storage.shard_prefix, "snapshot_date");
    }

    #[test]
    fn test_listing_url_with_page() {
        let crawler = CrawlerConfig::default();
        assert_eq!(
            crawler.listing_url(None).unwrap().as_str(),
            "https://cartelera.cdmx.gob.mx/busqueda"
        );
        assert_eq!(
            crawler.listing_url(Some(4)).unwrap().as_str(),
            "https://cartelera.cdmx.gob.mx/busqueda?tipo=ALL&pagina=4"
        );
    }

    #[test]
    fn test_missing_bucket_is_config_error() {
        let storage = StorageConfig {
            bucket: Some("  ".into()),
            ..StorageConfig::default()
        };
        assert!(matches!(
            storage.require_bucket(),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BUCKET_NAME", "bucket-a"),
            ("MAX_CONCURRENT", "3"),
            ("CRAWL_STRATEGY", "Isolated"),
            ("PUBLISH_ENABLED", "true"),
            ("PUBLISH_REPOSITORY", "owner/events"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.storage.bucket.as_deref(), Some("bucket-a"));
        assert_eq!(config.crawler.max_concurrent, 3);
        assert_eq!(config.crawler.strategy, CrawlStrategy::Isolated);
        assert!(config.publish.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_env_override_fails_fast() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| {
            (name == "MAX_CONCURRENT").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_publish_requires_repository() {
        let mut config = Config::default();
        config.publish.enabled = true;
        assert!(config.validate().is_err());
    }
}
