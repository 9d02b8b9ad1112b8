use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::{debug, info, warn};

use crate::utils::error::{AppError, Result};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Titles of anti-bot interstitials served instead of the product page.
const CHALLENGE_TITLES: &[&str] = &["just a moment...", "attention required! | cloudflare"];

/// Challenge script hooks. Cloudflare also injects its bot-management beacon
/// into ordinary pages, so these only count on an error status.
const CHALLENGE_SCRIPT_MARKERS: &[&str] = &["cf-browser-verification", "challenge-platform"];

/// Why a single fetch attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchErrorKind {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("blocked by anti-bot protection (HTTP {status})")]
    BotBlocked { status: u16 },

    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("server error (HTTP {status})")]
    Server { status: u16 },

    #[error("client error (HTTP {status})")]
    Client { status: u16 },

    #[error("unexpected response (HTTP {status}): {detail}")]
    Unexpected { status: u16, detail: String },
}

impl FetchErrorKind {
    /// Definitive client errors are the only failures worth giving up on early.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchErrorKind::Client { .. })
    }
}

/// Attempt limit, delay schedule and retry classification for the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(AppError::Validation(
                "maximum fetch attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            base_backoff,
            jitter: false,
        })
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_backoff(&self) -> Duration {
        self.base_backoff
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Delay to wait before each attempt, indexed from attempt 1.
    ///
    /// Attempt 1 starts immediately; attempt `n > 1` waits
    /// `base * 2^(n-1)`. With jitter enabled each delay is scaled by a
    /// random factor in `[0, 1)`, so it never exceeds the nominal value.
    pub fn schedule(&self) -> Vec<Duration> {
        let base_ms = self.base_backoff.as_millis().min(u64::MAX as u128) as u64;
        let backoff = ExponentialBackoff::from_millis(2).factor(base_ms);

        std::iter::once(Duration::ZERO)
            .chain(
                backoff
                    .take(self.max_attempts.saturating_sub(1) as usize)
                    .map(|delay| if self.jitter { jitter(delay) } else { delay }),
            )
            .collect()
    }

    pub fn should_retry(&self, error: &FetchErrorKind, attempts_made: u32) -> bool {
        error.is_retryable() && attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(5),
            jitter: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    url: String,
    policy: RetryPolicy,
    timeout: Duration,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            policy,
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    Success { html: String, status_code: u16 },
    Failure { last_error: FetchErrorKind, attempts_made: u32 },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }
}

/// Raw response from one attempt, before status classification.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
    pub challenged: bool,
}

/// One GET against the product page. Implementations map transport failures
/// to [`FetchErrorKind`]; status handling happens in [`Fetcher`].
#[async_trait]
pub trait PageClient: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> std::result::Result<PageResponse, FetchErrorKind>;
}

/// Plain HTTP client dressed up as desktop Chrome.
pub struct HttpPageClient {
    client: reqwest::Client,
}

impl HttpPageClient {
    pub fn new(user_agent: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(browser_headers())
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
    headers.insert("sec-ch-ua-platform", HeaderValue::from_static("\"Windows\""));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
    headers
}

#[async_trait]
impl PageClient for HttpPageClient {
    async fn get(&self, url: &str, timeout: Duration) -> std::result::Result<PageResponse, FetchErrorKind> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let challenged = headers
            .get("cf-mitigated")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("challenge"))
            .unwrap_or(false)
            || (matches!(status, 403 | 503)
                && headers
                    .get(header::SERVER)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.to_ascii_lowercase().contains("cloudflare"))
                    .unwrap_or(false));

        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        Ok(PageResponse {
            status,
            body,
            challenged,
        })
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> FetchErrorKind {
    if err.is_timeout() {
        FetchErrorKind::Timeout {
            after_ms: timeout.as_millis() as u64,
        }
    } else {
        FetchErrorKind::Network {
            message: err.to_string(),
        }
    }
}

/// Decides what a response means for the retry loop.
pub fn classify_response(response: PageResponse) -> std::result::Result<String, FetchErrorKind> {
    let status = response.status;
    if response.challenged || looks_like_challenge(status, &response.body) {
        return Err(FetchErrorKind::BotBlocked { status });
    }

    match status {
        200 if response.body.trim().is_empty() => Err(FetchErrorKind::Unexpected {
            status,
            detail: "empty body".to_string(),
        }),
        200 => Ok(response.body),
        403 => Err(FetchErrorKind::BotBlocked { status }),
        408 => Err(FetchErrorKind::Timeout { after_ms: 0 }),
        429 => Err(FetchErrorKind::RateLimited),
        400..=499 => Err(FetchErrorKind::Client { status }),
        500..=599 => Err(FetchErrorKind::Server { status }),
        _ => Err(FetchErrorKind::Unexpected {
            status,
            detail: "expected HTTP 200".to_string(),
        }),
    }
}

fn looks_like_challenge(status: u16, body: &str) -> bool {
    // Interstitials are small; real product pages can mention these strings in scripts
    if body.len() > 64 * 1024 {
        return false;
    }
    let lower = body.to_ascii_lowercase();
    let titled = page_title(&lower)
        .map(|title| CHALLENGE_TITLES.contains(&title))
        .unwrap_or(false);
    titled
        || (!(200..300).contains(&status)
            && CHALLENGE_SCRIPT_MARKERS.iter().any(|marker| lower.contains(marker)))
}

fn page_title(lower: &str) -> Option<&str> {
    let start = lower.find("<title")?;
    let open_end = start + lower[start..].find('>')? + 1;
    let close = open_end + lower[open_end..].find("</title>")?;
    Some(lower[open_end..close].trim())
}

pub struct Fetcher<C> {
    client: C,
}

impl<C: PageClient> Fetcher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetches the page, retrying per the request's policy. Never panics or
    /// returns early with an error: every failure ends up in the outcome.
    pub async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let policy = request.policy();
        let max_attempts = policy.max_attempts();
        let mut delays = policy.schedule().into_iter();
        let mut attempts_made = 0;

        loop {
            let delay = delays.next().unwrap_or(Duration::ZERO);
            if !delay.is_zero() {
                info!(
                    url = request.url(),
                    attempt = attempts_made + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before next fetch attempt"
                );
                tokio::time::sleep(delay).await;
            }

            attempts_made += 1;
            info!(
                url = request.url(),
                attempt = attempts_made,
                max_attempts,
                "Fetching product page"
            );

            let result = match tokio::time::timeout(
                request.timeout(),
                self.client.get(request.url(), request.timeout()),
            )
            .await
            {
                Ok(result) => result.and_then(classify_response),
                Err(_) => Err(FetchErrorKind::Timeout {
                    after_ms: request.timeout().as_millis() as u64,
                }),
            };

            match result {
                Ok(html) => {
                    info!(
                        url = request.url(),
                        attempt = attempts_made,
                        bytes = html.len(),
                        "Fetch succeeded"
                    );
                    return FetchOutcome::Success {
                        html,
                        status_code: 200,
                    };
                }
                Err(error) if policy.should_retry(&error, attempts_made) => {
                    warn!(
                        url = request.url(),
                        attempt = attempts_made,
                        max_attempts,
                        error = %error,
                        "Fetch attempt failed, will retry"
                    );
                }
                Err(error) => {
                    warn!(
                        url = request.url(),
                        attempts_made,
                        retryable = error.is_retryable(),
                        error = %error,
                        "Fetch failed"
                    );
                    return FetchOutcome::Failure {
                        last_error: error,
                        attempts_made,
                    };
                }
            }
        }
    }
}

impl Fetcher<HttpPageClient> {
    pub fn http(user_agent: Option<&str>) -> Result<Self> {
        debug!(user_agent = user_agent.unwrap_or(DEFAULT_USER_AGENT), "Creating HTTP page client");
        Ok(Self::new(HttpPageClient::new(user_agent)?))
    }
}

#[cfg(feature = "browser")]
pub use browser::BrowserPageClient;

#[cfg(feature = "browser")]
mod browser {
    use super::{FetchErrorKind, PageClient, PageResponse, DEFAULT_USER_AGENT};
    use crate::utils::error::{AppError, Result};
    use async_trait::async_trait;
    use headless_chrome::{Browser, LaunchOptions};
    use std::sync::Arc;
    use std::time::Duration;

    /// Renders the page in headless Chrome so JavaScript challenges can run.
    /// The DevTools protocol exposes no status code here, so a completed
    /// navigation is reported as HTTP 200 and challenge detection relies on
    /// the rendered body.
    pub struct BrowserPageClient {
        browser: Arc<Browser>,
        user_agent: String,
    }

    impl BrowserPageClient {
        pub fn new(chrome_path: Option<&str>, user_agent: Option<&str>) -> Result<Self> {
            let mut launch_options = LaunchOptions::default_builder()
                .headless(true)
                .sandbox(false)
                .args(vec![
                    std::ffi::OsStr::new("--no-sandbox"),
                    std::ffi::OsStr::new("--disable-dev-shm-usage"),
                    std::ffi::OsStr::new("--disable-gpu"),
                ])
                .build()
                .map_err(|e| AppError::Browser(format!("Failed to create launch options: {}", e)))?;

            if let Some(path) = chrome_path {
                launch_options.path = Some(std::path::PathBuf::from(path));
            }

            let browser = Browser::new(launch_options)
                .map_err(|e| AppError::Browser(format!("Failed to launch browser: {}", e)))?;

            Ok(Self {
                browser: Arc::new(browser),
                user_agent: user_agent.unwrap_or(DEFAULT_USER_AGENT).to_string(),
            })
        }
    }

    #[async_trait]
    impl PageClient for BrowserPageClient {
        async fn get(&self, url: &str, _timeout: Duration) -> std::result::Result<PageResponse, FetchErrorKind> {
            let browser = Arc::clone(&self.browser);
            let user_agent = self.user_agent.clone();
            let url = url.to_string();

            let rendered = tokio::task::spawn_blocking(move || -> std::result::Result<String, String> {
                let tab = browser.new_tab().map_err(|e| e.to_string())?;
                tab.set_user_agent(&user_agent, None, None)
                    .map_err(|e| e.to_string())?;
                tab.navigate_to(&url).map_err(|e| e.to_string())?;
                tab.wait_until_navigated().map_err(|e| e.to_string())?;
                let content = tab.get_content().map_err(|e| e.to_string());
                let _ = tab.close(true);
                content
            })
            .await
            .map_err(|e| FetchErrorKind::Network {
                message: format!("browser task failed: {}", e),
            })?;

            rendered
                .map(|body| PageResponse {
                    status: 200,
                    body,
                    challenged: false,
                })
                .map_err(|message| FetchErrorKind::Network { message })
        }
    }
}
