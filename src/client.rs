//! Retrying HTTP client shared by the model and tracker adapters.
//!
//! Every request is retried a bounded number of times on HTTP 429 (honouring
//! `Retry-After`), on any 5xx, and on connect/timeout transport errors. The
//! delay before retry `n` is `min(base * 2^n + jitter, max_delay)` with jitter
//! drawn uniformly from `[0, max_jitter)`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::{clog_debug, clog_warn};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 120;
const USER_AGENT: &str = concat!("conductor/", env!("CARGO_PKG_VERSION"));

/// Backoff parameters for one class of calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (zero-based) for a given jitter.
    pub fn delay_for(&self, attempt: u32, jitter: Duration) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let exp_ms = base_ms.saturating_mul(factor);
        let total = exp_ms.saturating_add(jitter.as_millis() as u64);
        Duration::from_millis(total).min(self.max_delay)
    }

    /// Delay before retry `attempt` with a freshly drawn jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter_ms = match self.max_jitter.as_millis() as u64 {
            0 => 0,
            max => rand::thread_rng().gen_range(0..max),
        };
        self.delay_for(attempt, Duration::from_millis(jitter_ms))
    }

    /// Delay honouring a server-supplied `Retry-After`, capped at `max_delay`.
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint.min(self.max_delay),
            None => self.backoff(attempt),
        }
    }
}

/// Outcome of a single attempt, as judged by the caller.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Retry {
        error: Error,
        retry_after: Option<Duration>,
    },
    Fail(Error),
}

/// Drive `op` until it succeeds, fails permanently, or retries run out.
///
/// `op` receives the zero-based attempt number.
pub async fn retry_with_policy<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(error) => return Err(error),
            Attempt::Retry { error, retry_after } => {
                if attempt >= policy.max_retries {
                    clog_warn!("Giving up after {} retries: {}", attempt, error);
                    return Err(error);
                }
                let delay = policy.delay_with_hint(attempt, retry_after);
                clog_warn!(
                    "Attempt {} failed ({}), retrying in {}ms",
                    attempt + 1,
                    error,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// A re-sendable HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Map a status code and body onto a retry decision.
pub fn classify_status(
    status: u16,
    body: String,
    retry_after: Option<Duration>,
) -> Attempt<HttpResponse> {
    match status {
        429 => Attempt::Retry {
            error: Error::api(status, &body),
            retry_after,
        },
        500..=599 => Attempt::Retry {
            error: Error::api(status, &body),
            retry_after: None,
        },
        200..=399 => Attempt::Done(HttpResponse { status, body }),
        _ => Attempt::Fail(Error::api(status, &body)),
    }
}

/// Parse `Retry-After` given in seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// HTTP client applying [`RetryPolicy`] to every call.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    http: Client,
    policy: RetryPolicy,
    bearer: Option<String>,
}

impl RetryingClient {
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            policy,
            bearer: None,
        })
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `request`, retrying transient failures.
    pub async fn call(&self, request: &HttpRequest) -> Result<HttpResponse> {
        retry_with_policy(&self.policy, |attempt| async move {
            clog_debug!(
                "HTTP {} {} (attempt {})",
                request.method,
                request.url,
                attempt + 1
            );
            self.send_once(request).await
        })
        .await
    }

    async fn send_once(&self, request: &HttpRequest) -> Attempt<HttpResponse> {
        let mut builder = self.http.request(request.method.clone(), &request.url);
        if let Some(token) = &self.bearer {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) if e.is_connect() || e.is_timeout() => {
                return Attempt::Retry {
                    error: Error::Http(e),
                    retry_after: None,
                }
            }
            Err(e) => return Attempt::Fail(Error::Http(e)),
        };

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        match response.text().await {
            Ok(body) => classify_status(status, body, retry_after),
            Err(e) => Attempt::Retry {
                error: Error::Http(e),
                retry_after: None,
            },
        }
    }
}
