//! Rendered page acquisition with bounded retry.
//!
//! A [`PageRenderer`] performs exactly one attempt; [`PageFetcher`] wraps it in
//! a linear backoff schedule. The Chromium renderer owns a fresh browser per
//! attempt and always tears it down before returning.

use crate::config::ScraperConfig;
use crate::error::{Result, ScrapeError};
use crate::models::{AttemptOutcome, FetchAttempt};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_retry::Retry;
use tracing::{debug, info, warn};

// ── Backoff policy ────────────────────────────────────────────────────────────

/// Wait inserted after failed attempt `attempt` (1-based): `base × attempt`.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(attempt)
}

/// Waits between `max_attempts` attempts, i.e. `max_attempts - 1` entries.
pub fn backoff_schedule(max_attempts: u32, base: Duration) -> impl Iterator<Item = Duration> {
    (1..max_attempts.max(1)).map(move |n| backoff_delay(n, base))
}

#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

/// Run `op` up to `max_attempts` times, sleeping per [`backoff_schedule`]
/// between failures. `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    base: Duration,
    mut op: F,
) -> std::result::Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut attempts = 0u32;
    let result = Retry::start(backoff_schedule(max_attempts, base), || {
        attempts += 1;
        op(attempts)
    })
    .await;

    result.map_err(|last| Exhausted { attempts, last })
}

// ── Renderer seam ─────────────────────────────────────────────────────────────

/// One render attempt: load `url`, wait for network idle, return the HTML.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, headless: bool) -> Result<String>;
}

pub struct PageFetcher<R> {
    renderer: R,
}

impl<R: PageRenderer> PageFetcher<R> {
    pub fn new(renderer: R) -> Self {
        Self { renderer }
    }

    pub async fn fetch(&self, url: &str, headless: bool, max_attempts: u32, base_wait: Duration) -> Result<String> {
        let max_attempts = max_attempts.max(1);
        info!("Fetching {} (up to {} attempts)", url, max_attempts);

        let outcome = retry_with_backoff(max_attempts, base_wait, |number| async move {
            let waited = match number {
                1 => Duration::ZERO,
                n => backoff_delay(n - 1, base_wait),
            };
            let result = self.renderer.render(url, headless).await;
            let attempt = FetchAttempt {
                number,
                waited,
                outcome: match &result {
                    Ok(html) => AttemptOutcome::Rendered { bytes: html.len() },
                    Err(e) => AttemptOutcome::Failed(e.to_string()),
                },
            };
            match &attempt.outcome {
                AttemptOutcome::Rendered { .. } => debug!("{}: {}", url, attempt),
                AttemptOutcome::Failed(_) => warn!("{}: {}", url, attempt),
            }
            result
        })
        .await;

        outcome.map_err(|e| ScrapeError::FetchExhausted {
            url: url.to_string(),
            attempts: e.attempts,
            source: Box::new(e.last),
        })
    }
}

// ── Chromium renderer ─────────────────────────────────────────────────────────

const IDLE_PROBE: &str =
    "document.readyState === 'complete' ? performance.getEntriesByType('resource').length : -1";
const IDLE_POLL: Duration = Duration::from_millis(100);
/// Bound on each teardown step (close, kill, reap).
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

fn render_err(e: impl std::fmt::Display) -> ScrapeError {
    ScrapeError::Render(e.to_string())
}

/// Headless (or headful) Chromium over the DevTools protocol.
pub struct ChromiumRenderer {
    navigation_timeout: Duration,
    idle_window: Duration,
}

impl ChromiumRenderer {
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            idle_window: Duration::from_millis(config.idle_window_ms),
        }
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    async fn render(&self, url: &str, headless: bool) -> Result<String> {
        let session = BrowserSession::launch(headless, self.navigation_timeout).await?;

        let captured = tokio::time::timeout(self.navigation_timeout, session.capture(url, self.idle_window))
            .await
            .unwrap_or_else(|_| {
                Err(ScrapeError::Render(format!(
                    "no network idle within {:?}",
                    self.navigation_timeout
                )))
            });

        session.close().await;
        captured
    }
}

/// A launched browser plus the task driving its CDP connection.
///
/// `close` is the normal exit. If the session is dropped instead (panic,
/// cancelled future) the browser is dropped too, which kills the child
/// process, and the handler task is aborted.
struct BrowserSession {
    browser: Option<Browser>,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    async fn launch(headless: bool, request_timeout: Duration) -> Result<Self> {
        let mut builder = BrowserConfig::builder().request_timeout(request_timeout);
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(ScrapeError::Render)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(render_err)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
        });

        Ok(Self {
            browser: Some(browser),
            handler,
        })
    }

    async fn capture(&self, url: &str, idle_window: Duration) -> Result<String> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| ScrapeError::Render("browser already closed".into()))?;

        let page = browser.new_page(url).await.map_err(render_err)?;
        page.wait_for_navigation().await.map_err(render_err)?;
        wait_for_network_idle(&page, idle_window).await?;
        page.content().await.map_err(render_err)
    }

    async fn close(mut self) {
        if let Some(mut browser) = self.browser.take() {
            teardown(&mut browser, TEARDOWN_GRACE).await;
        }
        self.handler.abort();
    }
}

/// The three ways of ending a browser process.
#[async_trait]
trait BrowserProcess: Send {
    async fn request_close(&mut self) -> std::result::Result<(), String>;
    async fn force_kill(&mut self) -> std::result::Result<(), String>;
    async fn reap(&mut self) -> std::result::Result<(), String>;
}

#[async_trait]
impl BrowserProcess for Browser {
    async fn request_close(&mut self) -> std::result::Result<(), String> {
        self.close().await.map(|_| ()).map_err(|e| e.to_string())
    }

    async fn force_kill(&mut self) -> std::result::Result<(), String> {
        match self.kill().await {
            Some(Err(e)) => Err(e.to_string()),
            _ => Ok(()),
        }
    }

    async fn reap(&mut self) -> std::result::Result<(), String> {
        self.wait().await.map(|_| ()).map_err(|e| e.to_string())
    }
}

/// Close gracefully, kill if that fails or stalls, then reap. Every step is
/// bounded by `grace`, so teardown finishes even when the process is wedged.
async fn teardown<P: BrowserProcess>(process: &mut P, grace: Duration) {
    let closed = match tokio::time::timeout(grace, process.request_close()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("Browser close failed: {}", e);
            false
        }
        Err(_) => {
            warn!("Browser close timed out after {:?}", grace);
            false
        }
    };

    if !closed {
        kill_bounded(process, grace).await;
    }

    match tokio::time::timeout(grace, process.reap()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Browser did not exit cleanly: {}", e),
        Err(_) => {
            warn!("Browser still running {:?} after close; killing", grace);
            kill_bounded(process, grace).await;
        }
    }
}

async fn kill_bounded<P: BrowserProcess>(process: &mut P, grace: Duration) {
    match tokio::time::timeout(grace, process.force_kill()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Browser kill failed: {}", e),
        Err(_) => warn!("Browser kill timed out after {:?}", grace),
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.browser.take().is_some() {
            debug!("Browser session dropped without close; killing");
        }
        self.handler.abort();
    }
}

/// Resolve once the document is complete and its resource count has held
/// still for `idle_window`. Callers bound this with a timeout.
async fn wait_for_network_idle(page: &Page, idle_window: Duration) -> Result<()> {
    let mut last = -1i64;
    let mut stable_since = Instant::now();

    loop {
        let count: i64 = page
            .evaluate(IDLE_PROBE)
            .await
            .map_err(render_err)?
            .into_value()
            .map_err(render_err)?;

        if count < 0 || count != last {
            last = count;
            stable_since = Instant::now();
        } else if stable_since.elapsed() >= idle_window {
            return Ok(());
        }

        tokio::time::sleep(IDLE_POLL).await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` renders, then serves `html`.
    pub(crate) struct ScriptedRenderer {
        pub failures: u32,
        pub html: String,
        pub calls: AtomicU32,
    }

    impl ScriptedRenderer {
        pub fn serving(html: &str) -> Self {
            Self { failures: 0, html: html.to_string(), calls: AtomicU32::new(0) }
        }

        pub fn failing() -> Self {
            Self { failures: u32::MAX, html: String::new(), calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl PageRenderer for ScriptedRenderer {
        async fn render(&self, url: &str, _headless: bool) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(ScrapeError::Render(format!("scripted failure {} for {}", n, url)))
            } else {
                Ok(self.html.clone())
            }
        }
    }

    #[async_trait]
    impl<T: PageRenderer> PageRenderer for std::sync::Arc<T> {
        async fn render(&self, url: &str, headless: bool) -> Result<String> {
            (**self).render(url, headless).await
        }
    }

    const TICK: Duration = Duration::from_millis(1);

    #[test]
    fn test_backoff_is_linear_in_attempt() {
        let base = Duration::from_secs_f64(1.5);
        assert_eq!(backoff_delay(1, base), Duration::from_millis(1500));
        assert_eq!(backoff_delay(2, base), Duration::from_millis(3000));
        assert_eq!(backoff_delay(4, base), Duration::from_millis(6000));
    }

    #[test]
    fn test_schedule_has_one_wait_between_each_attempt() {
        let waits: Vec<_> = backoff_schedule(3, Duration::from_secs(1)).collect();
        assert_eq!(waits, vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(backoff_schedule(1, Duration::from_secs(1)).count(), 0);
        assert_eq!(backoff_schedule(0, Duration::from_secs(1)).count(), 0);
    }

    #[tokio::test]
    async fn test_always_failing_fetch_stops_at_max_attempts() {
        let renderer = std::sync::Arc::new(ScriptedRenderer::failing());
        let fetcher = PageFetcher::new(renderer.clone());

        let err = fetcher.fetch("https://example.org/2025/x/people", true, 3, TICK).await.unwrap_err();

        assert_eq!(renderer.calls.load(Ordering::SeqCst), 3);
        match err {
            ScrapeError::FetchExhausted { url, attempts, source } => {
                assert_eq!(url, "https://example.org/2025/x/people");
                assert_eq!(attempts, 3);
                assert!(matches!(*source, ScrapeError::Render(_)));
            }
            other => panic!("expected FetchExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let renderer = std::sync::Arc::new(ScriptedRenderer {
            failures: 2,
            html: "<html>ok</html>".into(),
            calls: AtomicU32::new(0),
        });
        let fetcher = PageFetcher::new(renderer.clone());

        let html = fetcher.fetch("https://example.org", true, 5, TICK).await.unwrap();

        assert_eq!(html, "<html>ok</html>");
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let renderer = std::sync::Arc::new(ScriptedRenderer::failing());
        let fetcher = PageFetcher::new(renderer.clone());

        tokio_test::assert_err!(fetcher.fetch("https://example.org", true, 0, TICK).await);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_wrapper_reports_attempt_numbers() {
        let mut seen = Vec::new();
        let out: std::result::Result<(), Exhausted<String>> =
            retry_with_backoff(4, TICK, |n| {
                seen.push(n);
                async move { Err(format!("no {}", n)) }
            })
            .await;

        let exhausted = out.unwrap_err();
        assert_eq!(exhausted.attempts, 4);
        assert_eq!(exhausted.last, "no 4");
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[derive(Clone, Copy)]
    enum CloseBehaviour {
        Clean,
        Fails,
        Hangs,
    }

    /// Records teardown calls; `reap` blocks while the process is alive.
    struct FakeProcess {
        close: CloseBehaviour,
        alive: bool,
        calls: Vec<&'static str>,
    }

    impl FakeProcess {
        fn new(close: CloseBehaviour) -> Self {
            Self { close, alive: true, calls: Vec::new() }
        }
    }

    #[async_trait]
    impl BrowserProcess for FakeProcess {
        async fn request_close(&mut self) -> std::result::Result<(), String> {
            self.calls.push("close");
            match self.close {
                CloseBehaviour::Clean => {
                    self.alive = false;
                    Ok(())
                }
                CloseBehaviour::Fails => Err("channel closed".into()),
                CloseBehaviour::Hangs => std::future::pending().await,
            }
        }

        async fn force_kill(&mut self) -> std::result::Result<(), String> {
            self.calls.push("kill");
            self.alive = false;
            Ok(())
        }

        async fn reap(&mut self) -> std::result::Result<(), String> {
            self.calls.push("reap");
            if self.alive {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    const GRACE: Duration = Duration::from_millis(50);

    async fn bounded_teardown(process: &mut FakeProcess) {
        tokio::time::timeout(Duration::from_secs(2), teardown(process, GRACE))
            .await
            .expect("teardown must finish");
    }

    #[tokio::test]
    async fn test_clean_close_is_reaped_without_kill() {
        let mut process = FakeProcess::new(CloseBehaviour::Clean);
        bounded_teardown(&mut process).await;
        assert_eq!(process.calls, vec!["close", "reap"]);
    }

    #[tokio::test]
    async fn test_failed_close_kills_before_reaping() {
        let mut process = FakeProcess::new(CloseBehaviour::Fails);
        bounded_teardown(&mut process).await;
        assert_eq!(process.calls, vec!["close", "kill", "reap"]);
        assert!(!process.alive);
    }

    #[tokio::test]
    async fn test_stalled_close_is_cut_off_and_killed() {
        let mut process = FakeProcess::new(CloseBehaviour::Hangs);
        bounded_teardown(&mut process).await;
        assert_eq!(process.calls, vec!["close", "kill", "reap"]);
    }
}
