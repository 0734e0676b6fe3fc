use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrapeError {
    /// One render attempt failed (launch, navigation, timeout, CDP).
    #[error("render failed: {0}")]
    Render(String),

    #[error("fetch of {url} exhausted after {attempts} attempts")]
    FetchExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: Box<ScrapeError>,
    },

    #[error("photo retrieval from {url} failed: {reason}")]
    PhotoRetrieval { url: String, reason: String },

    #[error("could not write {path:?}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error at {path:?}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("bad selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ScrapeError>;

impl ScrapeError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence { path: path.into(), source }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv { path: path.into(), source }
    }
}
