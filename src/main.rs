mod config;
mod enrich;
mod error;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod sitemap;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

use crate::config::AppConfig;
use crate::enrich::{enrich_dir, ChatCompletionEnricher};
use crate::pipeline::{error_chain, BatchReport, RunOptions, ScrapeOrchestrator};
use crate::scraper::{ChromiumRenderer, PageFetcher};
use crate::sitemap::LocationFinder;

#[derive(Parser)]
#[command(name = "roster-scrape", about = "Event roster profile scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape one or more roster pages
    Scrape {
        /// Roster page URLs
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// List roster page URLs linked from the locations index
    Discover {
        /// Locations index (default: sitemap.home_url)
        #[arg(long)]
        home_url: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Discover every roster page, then scrape them all
    Crawl {
        #[arg(long)]
        home_url: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Enrich scraped biographies through the chat-completions service
    Enrich {
        /// Directory of profile CSVs (default: storage.output_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Where *_structured.csv files go (default: storage.enriched_dir)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

/// Command-line overrides for the `[scraper]` and `[storage]` settings.
#[derive(Args)]
struct RunArgs {
    /// Show the browser window
    #[arg(long)]
    headful: bool,

    /// Download profile photos
    #[arg(long)]
    save_photos: bool,

    #[arg(long)]
    max_attempts: Option<u32>,

    /// Base backoff in seconds; the n-th retry waits n times this
    #[arg(long)]
    base_wait: Option<f64>,

    #[arg(long)]
    out_dir: Option<PathBuf>,

    #[arg(long)]
    image_dir: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if self.headful {
            config.scraper.headless = false;
        }
        if self.save_photos {
            config.scraper.save_photos = true;
        }
        if let Some(n) = self.max_attempts {
            config.scraper.max_attempts = n;
        }
        if let Some(secs) = self.base_wait {
            config.scraper.base_wait_secs = secs;
        }
        if let Some(dir) = &self.out_dir {
            config.storage.output_dir = dir.clone();
        }
        if let Some(dir) = &self.image_dir {
            config.storage.image_dir = dir.clone();
        }
        config.validate().context("Invalid run options")?;
        Ok(())
    }
}

fn parse_urls(raw: &[String]) -> Result<Vec<Url>> {
    raw.iter()
        .map(|s| Url::parse(s).with_context(|| format!("Not a URL: {}", s)))
        .collect()
}

fn print_report(report: &BatchReport) {
    println!("─────────────────────────────────");
    println!("  Roster scrape summary");
    println!("─────────────────────────────────");
    for (url, n) in &report.succeeded {
        println!("  ok      {} ({} profiles)", url, n);
    }
    for failure in &report.failed {
        println!("  FAILED  {}: {}", failure, error_chain(&failure.source));
    }
    println!("─────────────────────────────────");
}

async fn scrape_all(config: AppConfig, urls: &[Url]) -> Result<()> {
    let opts = RunOptions::from(&config.scraper);
    let orchestrator = ScrapeOrchestrator::new(ChromiumRenderer::new(&config.scraper), config)
        .context("Failed to build scraper")?;

    let report = orchestrator.run_batch(urls, opts).await;
    print_report(&report);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "roster_scrape=info,warn",
        1 => "roster_scrape=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Scrape { urls, run } => {
            let _t = utils::Timer::start("Roster scrape");
            run.apply(&mut config)?;
            let urls = parse_urls(&urls)?;
            scrape_all(config, &urls).await?;
        }

        Command::Discover { home_url, run } => {
            run.apply(&mut config)?;
            let home = home_url.unwrap_or_else(|| config.sitemap.home_url.clone());
            let finder = LocationFinder::new(&config.sitemap)?;
            let fetcher = PageFetcher::new(ChromiumRenderer::new(&config.scraper));

            let urls = finder
                .discover(&fetcher, &home, RunOptions::from(&config.scraper))
                .await
                .with_context(|| format!("Discovery failed for {}", home))?;

            if urls.is_empty() {
                println!("No roster pages found at {}", home);
            } else {
                println!("{} roster pages:", urls.len());
                for url in &urls {
                    println!("  {}", url);
                }
            }
        }

        Command::Crawl { home_url, run } => {
            let _t = utils::Timer::start("Full crawl");
            run.apply(&mut config)?;
            let home = home_url.unwrap_or_else(|| config.sitemap.home_url.clone());
            let finder = LocationFinder::new(&config.sitemap)?;
            let opts = RunOptions::from(&config.scraper);
            let orchestrator =
                ScrapeOrchestrator::new(ChromiumRenderer::new(&config.scraper), config)
                    .context("Failed to build scraper")?;

            let urls = finder
                .discover(orchestrator.fetcher(), &home, opts)
                .await
                .with_context(|| format!("Discovery failed for {}", home))?;
            if urls.is_empty() {
                warn!("No roster pages found at {}", home);
            }

            let report = orchestrator.run_batch(&urls, opts).await;
            print_report(&report);
        }

        Command::Enrich { dir, out } => {
            let _t = utils::Timer::start("Biography enrichment");
            let dir = dir.unwrap_or_else(|| config.storage.output_dir.clone());
            let out = out.unwrap_or_else(|| config.storage.enriched_dir.clone());
            if config.enrich.api_key.is_empty() {
                warn!("enrich.api_key is empty; set ROSTER__ENRICH__API_KEY");
            }

            let enricher = ChatCompletionEnricher::new(&config.enrich)?;
            let written = enrich_dir(&enricher, &dir, &out).await?;
            info!("Done: {} files written to {:?}", written.len(), out);
        }
    }

    Ok(())
}
