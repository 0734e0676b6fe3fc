//! Roster URL discovery from the site's locations index.

use crate::config::SitemapConfig;
use crate::error::{Result, ScrapeError};
use crate::pipeline::RunOptions;
use crate::scraper::{PageFetcher, PageRenderer};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use tracing::{debug, info};
use url::Url;

pub struct LocationFinder {
    pattern: Regex,
    people_suffix: String,
    links: Selector,
}

impl LocationFinder {
    pub fn new(config: &SitemapConfig) -> Result<Self> {
        let pattern = Regex::new(&config.path_pattern)
            .map_err(|e| ScrapeError::Config(format!("sitemap.path_pattern: {}", e)))?;
        let links = Selector::parse("a[href]").map_err(|e| ScrapeError::Selector {
            selector: "a[href]".into(),
            reason: format!("{:?}", e),
        })?;

        Ok(Self {
            pattern,
            people_suffix: config.people_suffix.trim_matches('/').to_string(),
            links,
        })
    }

    /// Every matching location link turned into its roster URL, sorted and
    /// deduplicated. "/2025/bogota/" → "<site root>/2025/bogota/people"
    pub fn roster_urls(&self, html: &str, home_url: &Url) -> Vec<Url> {
        let doc = Html::parse_document(html);

        let urls: BTreeSet<Url> = doc
            .select(&self.links)
            .filter_map(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|href| self.pattern.is_match(href))
            .filter_map(|href| {
                let target = format!("{}/{}", href.trim_end_matches('/'), self.people_suffix);
                match home_url.join(&target) {
                    Ok(url) => Some(url),
                    Err(e) => {
                        debug!("Skipping {:?}: {}", href, e);
                        None
                    }
                }
            })
            .collect();

        urls.into_iter().collect()
    }

    /// Render the home page and list the roster URLs it links to.
    pub async fn discover<R: PageRenderer>(
        &self,
        fetcher: &PageFetcher<R>,
        home_url: &str,
        opts: RunOptions,
    ) -> Result<Vec<Url>> {
        let home = Url::parse(home_url).map_err(|e| ScrapeError::InvalidUrl {
            url: home_url.to_string(),
            reason: e.to_string(),
        })?;

        let html = fetcher
            .fetch(home.as_str(), opts.headless, opts.max_attempts, opts.base_wait)
            .await?;

        let urls = self.roster_urls(&html, &home);
        info!("Discovered {} roster pages from {}", urls.len(), home);
        Ok(urls)
    }
}
