//! Page fetching with optional exponential backoff.
//!
//! # Architecture
//!
//! - [`Fetcher`]: Core trait, `fetch(url) -> RawPage | FetchError`
//! - [`HttpFetcher`]: `reqwest`-backed implementation
//! - [`RetryFetch`]: Decorator that retries transient failures of any `Fetcher`
//!
//! The overall per-target timeout is enforced by the concurrency controller,
//! so any `Fetcher` implementation is bounded regardless of its own settings.
//! [`HttpFetcher`] gets a shorter per-attempt timeout when retries are on,
//! otherwise a hung attempt would use up the whole budget.
//!
//! # Retry Strategy
//!
//! Only transient errors (timeouts, connection failures, 429 and 5xx) are
//! retried. Delay doubles per attempt, is capped, and gets 0-250ms of jitter.

use crate::error::FetchError;
use crate::models::RawPage;
use rand::{rng, Rng};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36";

/// Something that can turn a url into a page body.
pub trait Fetcher {
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError>;
}

impl<T: Fetcher> Fetcher for &T {
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        (**self).fetch(url).await
    }
}

/// Plain HTTP GET with a browser-like user agent.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        let ua = HeaderValue::from_str(user_agent)
            .map_err(|e| FetchError::Network(format!("invalid user agent: {e}")))?;
        headers.insert(USER_AGENT, ua);
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ru-RU,ru;q=0.9,en;q=0.8"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        let t0 = Instant::now();
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(t0.elapsed())
            } else {
                FetchError::from(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        debug!(bytes = body.len(), elapsed_ms = t0.elapsed().as_millis() as u64, "Fetched page");
        Ok(RawPage {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`Fetcher`].
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryFetch<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T: Fetcher> RetryFetch<T> {
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift);
        let delay = delay.min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T: Fetcher> Fetcher for RetryFetch<T> {
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        let mut attempt = 0usize;
        loop {
            match self.inner.fetch(url).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries || !e.is_transient() {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        %url,
                        attempt,
                        max = self.max_retries,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Either a bare fetcher or one wrapped in [`RetryFetch`], picked at startup.
#[derive(Debug)]
pub enum AnyFetcher<T> {
    Plain(T),
    Retrying(RetryFetch<T>),
}

impl<T: Fetcher> AnyFetcher<T> {
    pub fn with_retries(inner: T, max_retries: usize) -> Self {
        if max_retries == 0 {
            AnyFetcher::Plain(inner)
        } else {
            AnyFetcher::Retrying(RetryFetch::new(inner, max_retries, Duration::from_secs(1)))
        }
    }
}

impl<T: Fetcher> Fetcher for AnyFetcher<T> {
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        match self {
            AnyFetcher::Plain(f) => f.fetch(url).await,
            AnyFetcher::Retrying(f) => f.fetch(url).await,
        }
    }
}
