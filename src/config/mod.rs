use crate::error::{Result, ScrapeError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub selectors: SelectorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sitemap: SitemapConfig,
    #[serde(default)]
    pub enrich: EnrichConfig,
}

/// Rendering, retry and photo download settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default)]
    pub save_photos: bool,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_wait_secs")]
    pub base_wait_secs: f64,

    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    /// How long the resource count must stay unchanged to count as network idle.
    #[serde(default = "default_idle_window_ms")]
    pub idle_window_ms: u64,

    #[serde(default = "default_photo_timeout_secs")]
    pub photo_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

/// CSS selectors describing the roster page layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectorConfig {
    #[serde(default = "default_role_heading")]
    pub role_heading: String,

    #[serde(default = "default_person_block")]
    pub person_block: String,

    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_body")]
    pub body: String,

    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_info_line")]
    pub info_line: String,

    #[serde(default = "default_info_delimiter")]
    pub info_delimiter: char,
}

/// Output locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,

    #[serde(default = "default_enriched_dir")]
    pub enriched_dir: PathBuf,
}

/// Roster URL discovery
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SitemapConfig {
    #[serde(default = "default_home_url")]
    pub home_url: String,

    #[serde(default = "default_path_pattern")]
    pub path_pattern: String,

    #[serde(default = "default_people_suffix")]
    pub people_suffix: String,
}

/// Chat-completions endpoint used for biography enrichment
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnrichConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_enrich_timeout_secs")]
    pub timeout_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_wait_secs() -> f64 {
    1.0
}
fn default_navigation_timeout_secs() -> u64 {
    30
}
fn default_idle_window_ms() -> u64 {
    500
}
fn default_photo_timeout_secs() -> u64 {
    10
}
fn default_user_agent() -> String {
    "roster-scrape/0.1 (research project; event roster collection)".to_string()
}
fn default_request_delay_ms() -> u64 {
    1000
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_role_heading() -> String {
    "h2".to_string()
}
fn default_person_block() -> String {
    "div.media.mb-5".to_string()
}
fn default_name() -> String {
    "h5.font-weight-bold".to_string()
}
fn default_body() -> String {
    "div.media-body".to_string()
}
fn default_image() -> String {
    "img".to_string()
}
fn default_info_line() -> String {
    "p.lead".to_string()
}
fn default_info_delimiter() -> char {
    '|'
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data/raw")
}
fn default_image_dir() -> PathBuf {
    PathBuf::from("data/raw/images")
}
fn default_enriched_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_home_url() -> String {
    "https://sicss.io/locations".to_string()
}
fn default_path_pattern() -> String {
    r"^/20\d{2}/[a-z0-9\-_]+/?$".to_string()
}
fn default_people_suffix() -> String {
    "people".to_string()
}
fn default_api_url() -> String {
    "https://api.deepseek.com/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "deepseek-chat".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_enrich_timeout_secs() -> u64 {
    60
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            headless: true,
            save_photos: false,
            max_attempts: default_max_attempts(),
            base_wait_secs: default_base_wait_secs(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            idle_window_ms: default_idle_window_ms(),
            photo_timeout_secs: default_photo_timeout_secs(),
            user_agent: default_user_agent(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            role_heading: default_role_heading(),
            person_block: default_person_block(),
            name: default_name(),
            body: default_body(),
            image: default_image(),
            info_line: default_info_line(),
            info_delimiter: default_info_delimiter(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            image_dir: default_image_dir(),
            enriched_dir: default_enriched_dir(),
        }
    }
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            home_url: default_home_url(),
            path_pattern: default_path_pattern(),
            people_suffix: default_people_suffix(),
        }
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_enrich_timeout_secs(),
        }
    }
}

impl ScraperConfig {
    pub fn base_wait(&self) -> Duration {
        Duration::from_secs_f64(self.base_wait_secs)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("ROSTER").separator("__"))
            .build()
            .map_err(|e| ScrapeError::Config(e.to_string()))?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| ScrapeError::Config(e.to_string()))?;
        app_cfg.validate()?;
        Ok(app_cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scraper.max_attempts == 0 {
            return Err(ScrapeError::Config("scraper.max_attempts must be at least 1".into()));
        }
        let wait = self.scraper.base_wait_secs;
        if !wait.is_finite() || wait <= 0.0 {
            return Err(ScrapeError::Config(format!(
                "scraper.base_wait_secs must be a positive number, got {wait}"
            )));
        }
        Ok(())
    }
}
