use rand::Rng;
use std::time::{Duration, Instant};
use tracing::info;
use url::Url;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.start.elapsed()
        );
    }
}

/// File-naming slug from a roster URL path.
/// "https://sicss.io/2025/bogota/people" → "2025_bogota_people"
pub fn slug_from_url(url: &Url) -> String {
    let slug = url.path().trim_matches('/').replace('/', "_");
    if slug.is_empty() {
        url.host_str().unwrap_or("root").replace('.', "_")
    } else {
        slug
    }
}

/// Configured delay plus up to `jitter_ms` of random extra.
pub fn polite_delay(delay_ms: u64, jitter_ms: u64) -> Duration {
    let jitter = rand::rng().random_range(0..=jitter_ms);
    Duration::from_millis(delay_ms + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_from_url() {
        let slug = |s: &str| slug_from_url(&Url::parse(s).unwrap());
        assert_eq!(slug("https://sicss.io/2025/bogota/people"), "2025_bogota_people");
        assert_eq!(slug("https://sicss.io/2025/bogota/"), "2025_bogota");
        assert_eq!(slug("https://sicss.io/"), "sicss_io");
    }

    #[test]
    fn test_polite_delay_stays_in_range() {
        for _ in 0..50 {
            let d = polite_delay(100, 20);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(120));
        }
        assert_eq!(polite_delay(5, 0), Duration::from_millis(5));
    }
}
