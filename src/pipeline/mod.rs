//! Pipeline orchestrator: ties fetcher → extractor → storage together.
//!
//! ## Run modes
//!
//! `run()` — one roster URL:
//!   Fetching → Extracting (photos downloaded inline) → Writing → Done.
//!   Any failure is returned as a [`UrlFailure`] naming the URL and stage.
//!
//! `run_batch()` — many roster URLs, one after another. Each URL gets its own
//!   CSV and image directory derived from the URL slug. A failed URL is
//!   recorded and the batch moves on.

use crate::config::{AppConfig, ScraperConfig, StorageConfig};
use crate::error::{Result, ScrapeError};
use crate::models::ProfileRecord;
use crate::scraper::{PageFetcher, PageRenderer, PhotoDownloader, ProfileExtractor, Selectors};
use crate::storage::write_records;
use crate::utils::{polite_delay, slug_from_url};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Per-run knobs, normally taken from [`ScraperConfig`] and CLI overrides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunOptions {
    pub headless: bool,
    pub save_photos: bool,
    pub max_attempts: u32,
    pub base_wait: Duration,
}

impl From<&ScraperConfig> for RunOptions {
    fn from(config: &ScraperConfig) -> Self {
        Self {
            headless: config.headless,
            save_photos: config.save_photos,
            max_attempts: config.max_attempts,
            base_wait: config.base_wait(),
        }
    }
}

/// Stages that can fail. Extraction absorbs its own faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Writing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetching => "fetching",
            Stage::Writing => "writing",
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{url} failed while {stage}")]
pub struct UrlFailure {
    pub url: String,
    pub stage: Stage,
    #[source]
    pub source: ScrapeError,
}

/// Where one URL's output lands.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub csv: PathBuf,
    pub images: PathBuf,
}

impl OutputPaths {
    pub fn for_url(url: &Url, storage: &StorageConfig) -> Self {
        let slug = slug_from_url(url);
        Self {
            csv: storage.output_dir.join(format!("profiles_{}.csv", slug)),
            images: storage.image_dir.join(slug),
        }
    }
}

pub struct ScrapeOrchestrator<R> {
    fetcher: PageFetcher<R>,
    downloader: PhotoDownloader,
    selectors: Selectors,
    config: AppConfig,
}

impl<R: PageRenderer> ScrapeOrchestrator<R> {
    pub fn new(renderer: R, config: AppConfig) -> Result<Self> {
        Ok(Self {
            fetcher: PageFetcher::new(renderer),
            downloader: PhotoDownloader::new(&config.scraper)?,
            selectors: Selectors::compile(&config.selectors)?,
            config,
        })
    }

    pub fn fetcher(&self) -> &PageFetcher<R> {
        &self.fetcher
    }

    pub async fn run(
        &self,
        url: &str,
        image_dir: &Path,
        output_path: &Path,
        opts: RunOptions,
    ) -> std::result::Result<Vec<ProfileRecord>, UrlFailure> {
        let fail = |stage: Stage| {
            move |source: ScrapeError| UrlFailure {
                url: url.to_string(),
                stage,
                source,
            }
        };

        // ── Fetching ──────────────────────────────────────────────────────────
        let base_url = Url::parse(url)
            .map_err(|e| ScrapeError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })
            .map_err(fail(Stage::Fetching))?;

        let html = self
            .fetcher
            .fetch(url, opts.headless, opts.max_attempts, opts.base_wait)
            .await
            .map_err(fail(Stage::Fetching))?;

        // ── Extracting ────────────────────────────────────────────────────────
        let records = ProfileExtractor::new(&self.selectors, &self.downloader)
            .extract(&html, &base_url, opts.save_photos, image_dir)
            .await;

        if opts.save_photos {
            let saved = records.iter().filter(|r| r.photo_path.is_some()).count();
            info!("{}: {}/{} photos saved under {:?}", url, saved, records.len(), image_dir);
        }

        // ── Writing ───────────────────────────────────────────────────────────
        write_records(&records, output_path).map_err(fail(Stage::Writing))?;

        Ok(records)
    }

    pub async fn run_batch(&self, urls: &[Url], opts: RunOptions) -> BatchReport {
        let mut report = BatchReport::default();

        for (i, url) in urls.iter().enumerate() {
            if i > 0 {
                let pause = polite_delay(self.config.scraper.request_delay_ms, self.config.scraper.jitter_ms);
                tokio::time::sleep(pause).await;
            }

            let paths = OutputPaths::for_url(url, &self.config.storage);
            info!("=== [{}/{}] {} → {:?} ===", i + 1, urls.len(), url, paths.csv);

            match self.run(url.as_str(), &paths.images, &paths.csv, opts).await {
                Ok(records) => report.succeeded.push((url.to_string(), records.len())),
                Err(failure) => {
                    warn!("{}: {}", failure, error_chain(&failure.source));
                    report.failed.push(failure);
                }
            }
        }

        info!(
            "=== Done: {} URLs | {} ok | {} failed | {} records ===",
            urls.len(),
            report.succeeded.len(),
            report.failed.len(),
            report.records_written()
        );
        report
    }
}

/// "outer: cause: root cause"
pub fn error_chain(err: &ScrapeError) -> String {
    let mut out = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<(String, usize)>,
    pub failed: Vec<UrlFailure>,
}

impl BatchReport {
    pub fn records_written(&self) -> usize {
        self.succeeded.iter().map(|(_, n)| n).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_profiles;
    use crate::scraper::fetcher::tests::ScriptedRenderer;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    const ROSTER: &str = r#"<html><body>
        <p class="lead">June 2025 | Bogotá</p>
        <h2>Faculty</h2>
        <div class="media mb-5"><div class="media-body"><h5 class="font-weight-bold">Ada</h5><p>Engines.</p></div></div>
        <h2>Speakers</h2>
        <div class="media mb-5"><div class="media-body"><h5 class="font-weight-bold">Alan</h5><p>Machines.</p></div></div>
        </body></html>"#;

    fn opts() -> RunOptions {
        RunOptions {
            headless: true,
            save_photos: false,
            max_attempts: 2,
            base_wait: Duration::from_millis(1),
        }
    }

    fn config_in(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.output_dir = dir.join("raw");
        config.storage.image_dir = dir.join("raw").join("images");
        config.scraper.request_delay_ms = 0;
        config.scraper.jitter_ms = 0;
        config
    }

    /// Serves fixed HTML per URL; unknown URLs fail to render.
    struct SiteRenderer(HashMap<String, String>);

    #[async_trait]
    impl PageRenderer for SiteRenderer {
        async fn render(&self, url: &str, _headless: bool) -> Result<String> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| ScrapeError::Render(format!("connection refused: {}", url)))
        }
    }

    #[tokio::test]
    async fn test_run_writes_csv_and_returns_records() {
        let tmp = TempDir::new().unwrap();
        let orchestrator =
            ScrapeOrchestrator::new(ScriptedRenderer::serving(ROSTER), config_in(tmp.path())).unwrap();
        let out = tmp.path().join("raw").join("profiles.csv");

        let records = orchestrator
            .run("https://sicss.io/2025/bogota/people", &tmp.path().join("img"), &out, opts())
            .await
            .unwrap();

        let roles: Vec<_> = records.iter().map(|r| r.role.as_str()).collect();
        assert_eq!(roles, vec!["Faculty", "Speakers"]);
        assert!(records.iter().all(|r| r.location.as_deref() == Some("Bogotá")));
        assert_eq!(load_profiles(&out).unwrap(), records);
    }

    #[tokio::test]
    async fn test_exhausted_fetch_reports_url_and_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let renderer = Arc::new(ScriptedRenderer::failing());
        let orchestrator = ScrapeOrchestrator::new(renderer.clone(), config_in(tmp.path())).unwrap();
        let out = tmp.path().join("profiles.csv");

        let failure = orchestrator
            .run("https://sicss.io/2025/x/people", tmp.path(), &out, opts())
            .await
            .unwrap_err();

        assert_eq!(failure.url, "https://sicss.io/2025/x/people");
        assert_eq!(failure.stage, Stage::Fetching);
        assert!(matches!(failure.source, ScrapeError::FetchExhausted { attempts: 2, .. }));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_rendering() {
        let tmp = TempDir::new().unwrap();
        let renderer = Arc::new(ScriptedRenderer::serving(ROSTER));
        let orchestrator = ScrapeOrchestrator::new(renderer.clone(), config_in(tmp.path())).unwrap();

        let failure = orchestrator
            .run("not a url", tmp.path(), &tmp.path().join("p.csv"), opts())
            .await
            .unwrap_err();

        assert!(matches!(failure.source, ScrapeError::InvalidUrl { .. }));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported_as_writing_stage() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let orchestrator =
            ScrapeOrchestrator::new(ScriptedRenderer::serving(ROSTER), config_in(tmp.path())).unwrap();

        let failure = orchestrator
            .run("https://sicss.io/2025/x/people", tmp.path(), &blocker.join("p.csv"), opts())
            .await
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Writing);
    }

    #[tokio::test]
    async fn test_batch_continues_past_failed_url() {
        let tmp = TempDir::new().unwrap();
        let good_a = Url::parse("https://sicss.io/2025/bogota/people").unwrap();
        let bad = Url::parse("https://sicss.io/2025/down/people").unwrap();
        let good_b = Url::parse("https://sicss.io/2024/duke/people").unwrap();
        let site = SiteRenderer(HashMap::from([
            (good_a.to_string(), ROSTER.to_string()),
            (good_b.to_string(), "<html><body><p>No roster yet</p></body></html>".to_string()),
        ]));
        let config = config_in(tmp.path());
        let orchestrator = ScrapeOrchestrator::new(site, config.clone()).unwrap();

        let report = orchestrator
            .run_batch(&[good_a.clone(), bad.clone(), good_b.clone()], opts())
            .await;

        assert_eq!(
            report.succeeded,
            vec![(good_a.to_string(), 2), (good_b.to_string(), 0)]
        );
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].url, bad.to_string());
        assert_eq!(report.records_written(), 2);

        let raw = &config.storage.output_dir;
        assert!(raw.join("profiles_2025_bogota_people.csv").exists());
        assert!(raw.join("profiles_2024_duke_people.csv").exists());
        assert!(!raw.join("profiles_2025_down_people.csv").exists());
    }

    #[test]
    fn test_output_paths_follow_slug() {
        let storage = StorageConfig::default();
        let paths = OutputPaths::for_url(&Url::parse("https://sicss.io/2025/bogota/people").unwrap(), &storage);
        assert_eq!(paths.csv, PathBuf::from("data/raw/profiles_2025_bogota_people.csv"));
        assert_eq!(paths.images, PathBuf::from("data/raw/images/2025_bogota_people"));
    }
}
