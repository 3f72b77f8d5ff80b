//! Cartelera crawler CLI
//!
//! Local execution entry point. For AWS Lambda, use `cartelera-lambda`.

use std::path::PathBuf;
use std::sync::Arc;

use cartelera::{
    error::{AppError, Result},
    models::{Config, SnapshotDate},
    pipeline::{
        self, Aggregator, EnvSecretProvider, GithubContentsPublisher, PageCrawler,
        publish_stored,
    },
    storage::{self, SnapshotWriter},
};
use clap::{Parser, Subcommand};

/// Cartelera CDMX - cultural billboard crawler
#[derive(Parser, Debug)]
#[command(
    name = "cartelera",
    version,
    about = "Crawl the CDMX cultural billboard into dated snapshots"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Write to this S3 bucket instead of the local storage root
    #[arg(long)]
    bucket: Option<String>,

    /// Local storage root (overrides `storage.local_root`)
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count the listing pages
    Discover,

    /// Crawl one listing page into a snapshot shard
    Crawl {
        /// Listing page number (1-based)
        #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,

        /// Snapshot date, YYYYMMDD or YYYY-MM-DD (default: today, UTC)
        #[arg(short, long)]
        date: Option<SnapshotDate>,
    },

    /// Discover the listing pages and crawl all of them
    CrawlAll {
        /// Snapshot date, YYYYMMDD or YYYY-MM-DD (default: today, UTC)
        #[arg(short, long)]
        date: Option<SnapshotDate>,

        /// Crawl only the first N pages instead of discovering the count
        #[arg(long)]
        pages: Option<u32>,
    },

    /// Merge a snapshot date's shards into Parquet
    Merge {
        /// Snapshot date, YYYYMMDD or YYYY-MM-DD
        #[arg(short, long)]
        date: SnapshotDate,

        /// Publish the merged artifact to the configured repository
        #[arg(long)]
        publish: bool,
    },

    /// Print today's snapshot date
    SnapshotDate,

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load_or_default(&cli.config);
    if let Some(bucket) = cli.bucket {
        config.storage.bucket = Some(bucket);
    }
    if let Some(dir) = cli.storage_dir {
        config.storage.local_root = dir.display().to_string();
    }
    log::info!("Loaded configuration from {}", cli.config.display());
    let config = &config;

    match cli.command {
        Command::Discover => {
            let last_page = pipeline::with_browser(&config.crawler, |driver| async move {
                PageCrawler::new(driver, config).discover().await
            })
            .await?;
            println!("{last_page}");
        }

        Command::Crawl { page, date } => {
            let date = date.unwrap_or_else(SnapshotDate::today_utc);
            let store = storage::open_store(&config.storage).await?;
            let writer = SnapshotWriter::new(store, &config.storage);

            let snapshot = pipeline::with_browser(&config.crawler, |driver| async move {
                PageCrawler::new(driver, config).crawl_page(page, date).await
            })
            .await?;
            let key = writer.write(&snapshot).await?;

            log::info!(
                "Page {} crawled: {} records ({} failed) -> {}",
                page,
                snapshot.len(),
                snapshot.failed_count(),
                key
            );
        }

        Command::CrawlAll { date, pages } => {
            let date = date.unwrap_or_else(SnapshotDate::today_utc);
            let store = storage::open_store(&config.storage).await?;
            let writer = SnapshotWriter::new(store, &config.storage);

            let writer = &writer;
            let summary = pipeline::with_browser(&config.crawler, |driver| async move {
                let crawler = PageCrawler::new(driver, config);
                let last_page = match pages {
                    Some(n) => n,
                    None => crawler.discover().await?,
                };
                log::info!("Crawling {} pages for {}", last_page, date);
                Ok::<_, AppError>(crawler.crawl_pages(1..=last_page, date, writer).await)
            })
            .await?;

            log::info!(
                "Crawl complete: {} pages, {} records, {} page failures",
                summary.pages.len(),
                summary.records(),
                summary.failures.len()
            );
            for failure in &summary.failures {
                log::error!("Page {} failed: {}", failure.page_number, failure.error);
            }
        }

        Command::Merge { date, publish } => {
            let store = storage::open_store(&config.storage).await?;
            let report = Aggregator::new(Arc::clone(&store), &config.storage, &config.merge)
                .merge(date, publish)
                .await?;
            log::info!(
                "Parquet written to {} ({} rows from {} shards)",
                report.location,
                report.rows,
                report.shards
            );

            if publish {
                let publisher =
                    GithubContentsPublisher::new(&config.publish, Arc::new(EnvSecretProvider))?;
                let published = publish_stored(&publisher, store.as_ref(), &report.key).await?;
                log::info!("Published {} at revision {}", published.path, published.revision);
            }
        }

        Command::SnapshotDate => {
            println!("{}", SnapshotDate::today_utc());
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!(
                "✓ Config OK ({:?} strategy, {} concurrent, listing {})",
                config.crawler.strategy,
                config.crawler.max_concurrent,
                config.crawler.listing_url(None)?
            );
        }
    }

    Ok(())
}
