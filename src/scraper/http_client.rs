use crate::config::ScraperConfig;
use crate::error::{Result, ScrapeError};
use crate::scraper::cleaner::sanitize_filename;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Best-effort photo retrieval. Never retries; a failure only costs the photo.
pub struct PhotoDownloader {
    inner: reqwest::Client,
}

impl PhotoDownloader {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.photo_timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .build()?;

        Ok(Self { inner })
    }

    /// Save `photo_url` as `<dest_dir>/<sanitized name>.jpg`.
    /// Returns `None` on any failure, leaving no file behind.
    pub async fn download(&self, photo_url: &Url, dest_dir: &Path, base_name: &str) -> Option<PathBuf> {
        match self.try_download(photo_url, dest_dir, base_name).await {
            Ok(path) => {
                debug!("Saved photo {} → {:?}", photo_url, path);
                Some(path)
            }
            Err(e) => {
                warn!("Photo for {:?} skipped: {}", base_name, e);
                None
            }
        }
    }

    async fn try_download(&self, photo_url: &Url, dest_dir: &Path, base_name: &str) -> Result<PathBuf> {
        let failed = |reason: String| ScrapeError::PhotoRetrieval {
            url: photo_url.to_string(),
            reason,
        };

        let stem = sanitize_filename(base_name);
        if stem.is_empty() {
            return Err(failed(format!("no usable filename in {:?}", base_name)));
        }

        let resp = self
            .inner
            .get(photo_url.as_str())
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {}", status)));
        }

        let body = resp.bytes().await.map_err(|e| failed(e.to_string()))?;
        if body.is_empty() {
            return Err(failed("empty body".into()));
        }

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| ScrapeError::persistence(dest_dir, e))?;

        let path = dest_dir.join(format!("{}.jpg", stem));
        let partial = dest_dir.join(format!("{}.jpg.part", stem));

        if let Err(e) = write_then_rename(&partial, &path, &body).await {
            tokio::fs::remove_file(&partial).await.ok();
            return Err(ScrapeError::persistence(&path, e));
        }

        Ok(path)
    }
}

/// The final path only ever appears with the complete body in it.
async fn write_then_rename(partial: &Path, path: &Path, body: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(partial, body).await?;
    tokio::fs::rename(partial, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn downloader() -> PhotoDownloader {
        PhotoDownloader::new(&ScraperConfig::default()).unwrap()
    }

    fn dir_entries(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => vec![],
        }
    }

    #[tokio::test]
    async fn test_download_writes_sanitized_jpg() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/ada.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0]))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("nested").join("2025_bogota");
        let url = Url::parse(&format!("{}/img/ada.png", server.uri())).unwrap();

        let saved = downloader().download(&url, &dest, "Ada Lovelace").await.unwrap();

        assert_eq!(saved, dest.join("Ada_Lovelace.jpg"));
        assert_eq!(std::fs::read(&saved).unwrap(), vec![0xFF, 0xD8, 0xFF, 0xE0]);
        assert_eq!(dir_entries(&dest), vec![saved]);
    }

    #[tokio::test]
    async fn test_http_404_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let url = Url::parse(&format!("{}/missing.jpg", server.uri())).unwrap();

        let saved = downloader().download(&url, tmp.path(), "Grace Hopper").await;

        assert!(saved.is_none());
        assert!(dir_entries(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let url = Url::parse(&format!("{}/blank.jpg", server.uri())).unwrap();

        assert!(downloader().download(&url, tmp.path(), "Blank").await.is_none());
        assert!(dir_entries(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_unusable_name_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8]))
            .expect(0)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let url = Url::parse(&format!("{}/x.jpg", server.uri())).unwrap();

        assert!(downloader().download(&url, tmp.path(), "???").await.is_none());
    }
}
