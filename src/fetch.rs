use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, USER_AGENT};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Cookie, Settings};

const BASE_BACKOFF_MS: u64 = 2000;
const MAX_BACKOFF_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status(code) => *code == 429 || (500..600).contains(code),
            FetchError::Http(e) => e.is_timeout() || e.is_connect(),
        }
    }
}

/// Page source for a pass. An empty string means "no content this pass", whatever
/// the reason.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> String;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .default_headers(build_headers(settings))
            .timeout(Duration::from_secs(settings.fetch.timeout_secs.max(1)))
            .build()?;
        if settings.cookies.is_empty() {
            warn!("No cookies configured; the profile page may come back incomplete");
        } else {
            info!("Loaded {} cookies", settings.cookies.len());
        }
        Ok(HttpFetcher {
            client,
            max_retries: settings.fetch.max_retries,
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }

    pub async fn fetch_with_retry(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff = backoff(attempt);
                    warn!(
                        "Fetch of {} failed ({}), attempt {}/{}, backing off {:.1}s",
                        url,
                        e,
                        attempt + 1,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> String {
        info!("Fetching {}", url);
        let start = Instant::now();
        match self.fetch_with_retry(url).await {
            Ok(body) => {
                info!("Fetched {} chars in {}ms", body.chars().count(), start.elapsed().as_millis());
                body
            }
            Err(e) => {
                warn!("Fetch of {} failed: {}", url, e);
                String::new()
            }
        }
    }
}

/// Doubles from the base delay per attempt, capped at a minute.
fn backoff(attempt: u32) -> Duration {
    let ms = BASE_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(ms.min(MAX_BACKOFF_MS))
}

fn build_headers(settings: &Settings) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,zh-CN;q=0.8,zh;q=0.7"),
    );
    if let Ok(ua) = HeaderValue::from_str(&settings.fetch.user_agent) {
        headers.insert(USER_AGENT, ua);
    }

    for (name, value) in &settings.headers {
        // reqwest only decompresses when it negotiates the encoding itself.
        if name.eq_ignore_ascii_case("accept-encoding") {
            continue;
        }
        match (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            (Ok(n), Ok(v)) => {
                headers.insert(n, v);
            }
            _ => warn!("Skipping invalid header {:?}", name),
        }
    }

    if let Some(cookie) = cookie_header(&settings.cookies) {
        match HeaderValue::from_str(&cookie) {
            Ok(v) => {
                headers.insert(COOKIE, v);
            }
            Err(_) => warn!("Skipping cookies: not a valid header value"),
        }
    }
    headers
}

fn cookie_header(cookies: &[Cookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_joins_pairs() {
        let cookies = vec![
            Cookie { name: "a1".into(), value: "x".into() },
            Cookie { name: "web_session".into(), value: "y".into() },
        ];
        assert_eq!(cookie_header(&cookies).as_deref(), Some("a1=x; web_session=y"));
        assert_eq!(cookie_header(&[]), None);
    }

    #[test]
    fn configured_headers_override_defaults_except_encoding() {
        let mut settings = Settings::default();
        settings.headers.insert("Accept-Encoding".into(), "gzip, br".into());
        settings.headers.insert("referer".into(), "https://www.xiaohongshu.com/".into());
        settings.headers.insert("bad header".into(), "x".into());
        settings.cookies.push(Cookie { name: "a1".into(), value: "x".into() });

        let headers = build_headers(&settings);
        assert!(headers.get("accept-encoding").is_none());
        assert!(headers.get("bad header").is_none());
        assert_eq!(headers.get("referer").unwrap(), "https://www.xiaohongshu.com/");
        assert_eq!(headers.get(COOKIE).unwrap(), "a1=x");
        assert!(headers.get(USER_AGENT).is_some());
    }

    #[test]
    fn retryable_statuses() {
        assert!(FetchError::Status(429).is_retryable());
        assert!(FetchError::Status(503).is_retryable());
        assert!(!FetchError::Status(404).is_retryable());
        assert!(!FetchError::Status(403).is_retryable());
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff(0), Duration::from_secs(2));
        assert_eq!(backoff(1), Duration::from_secs(4));
        assert_eq!(backoff(4), Duration::from_secs(32));
        assert_eq!(backoff(5), Duration::from_secs(60));
        assert_eq!(backoff(64), Duration::from_secs(60));
        assert_eq!(backoff(u32::MAX), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn unreachable_host_yields_empty_page() {
        let mut settings = Settings::default();
        settings.fetch.max_retries = 0;
        settings.fetch.timeout_secs = 2;
        let fetcher = HttpFetcher::new(&settings).unwrap();
        assert_eq!(fetcher.fetch("http://127.0.0.1:9/").await, "");
    }
}
