//! Fetcher pool
//!
//! This module handles every document read the harvester makes, including:
//! - Building the HTTP client with the configured user agent string
//! - A [`Transport`] seam so tests can script responses
//! - A shared worker budget bounding in-flight requests
//! - Per-attempt deadlines and retry with backoff on transient failures
//! - Error classification into permanent and transient failures

use crate::config::{Config, UserAgentConfig};
use crate::crawler::discoverer::CandidateUrl;
use crate::crawler::retry::{classify_http_status, FailureType, RetryDecision, RetryPolicy};
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, redirect::Policy, Client};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Raw response from a transport
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// A request that produced no response
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn failure_type(&self) -> FailureType {
        match self {
            Self::InvalidRequest(_) => FailureType::Permanent,
            Self::Timeout | Self::Connect(_) | Self::Other(_) => FailureType::Transient,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_builder() {
            Self::InvalidRequest(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

/// Document transport used by the fetcher pool
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues one GET; non-2xx statuses are responses, not errors
    async fn get(&self, url: &Url, timeout: Duration) -> Result<TransportResponse, TransportError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```no_run
/// use catalog_harvest::config::UserAgentConfig;
/// use catalog_harvest::crawler::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "CatalogHarvest".to_string(),
///     crawler_version: "0.1".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "ops@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    // Format: CrawlerName/Version (+ContactURL; ContactEmail)
    let user_agent = format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    );

    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Reads the `charset` parameter of a `Content-Type` header value
fn declared_charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
            .filter(|v| !v.is_empty())
    })
}

/// [`Transport`] backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        // Bodies reach the extractor as UTF-8; other declared charsets are
        // transcoded here
        let body = match content_type.as_deref().and_then(declared_charset) {
            Some(charset) if !charset.eq_ignore_ascii_case("utf-8") => {
                response.text().await?.into_bytes()
            }
            _ => response.bytes().await?.to_vec(),
        };

        Ok(TransportResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Why a fetch produced no body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// Not retried: 4xx status or malformed request
    Permanent(String),
    /// Transient failures used up every attempt
    Exhausted(String),
    /// The run was cancelled while the fetch was pending
    Cancelled,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent(detail) => write!(f, "permanent failure: {}", detail),
            Self::Exhausted(detail) => write!(f, "retries exhausted: {}", detail),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of a fetch operation
#[derive(Debug, Clone)]
pub enum FetchResult {
    /// Successfully fetched the document
    Body { body: Vec<u8>, attempts: u32 },

    /// Gave up on the document
    Failure { reason: FetchFailure, attempts: u32 },
}

impl FetchResult {
    pub fn is_body(&self) -> bool {
        matches!(self, Self::Body { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Body { attempts, .. } | Self::Failure { attempts, .. } => *attempts,
        }
    }
}

/// Concurrency-bounded map from URL to [`FetchResult`]
///
/// Every attempt holds one permit from a semaphore shared by all callers, so
/// no more than `max_in_flight` requests are ever outstanding no matter how
/// many tasks call [`FetcherPool::fetch`]. Permits are released during
/// backoff.
pub struct FetcherPool {
    transport: Arc<dyn Transport>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    policy: RetryPolicy,
    request_timeout: Duration,
}

impl FetcherPool {
    pub fn new(
        transport: Arc<dyn Transport>,
        max_in_flight: usize,
        policy: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            transport,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            policy,
            request_timeout,
        }
    }

    /// Builds a pool over [`HttpTransport`] from the crawler configuration
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let transport = HttpTransport::new(&config.user_agent)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Builds a pool over any transport using the crawler configuration
    pub fn with_transport(transport: Arc<dyn Transport>, config: &Config) -> Self {
        let crawler = &config.crawler;
        let policy = RetryPolicy::new(
            crawler.max_attempts,
            Duration::from_millis(crawler.base_delay_ms),
            Duration::from_millis(crawler.max_delay_ms),
        );
        Self::new(
            transport,
            crawler.max_concurrent_fetches as usize,
            policy,
            crawler.request_timeout(),
        )
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Fetches a candidate's document
    pub async fn fetch(&self, candidate: &CandidateUrl, cancel: &CancellationToken) -> FetchResult {
        self.fetch_url(&candidate.url, cancel).await
    }

    /// Fetches any URL under the pool's budget and retry policy
    ///
    /// Never fails past this boundary: every outcome is a [`FetchResult`].
    pub async fn fetch_url(&self, url: &Url, cancel: &CancellationToken) -> FetchResult {
        let mut attempt = 1;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(attempt),
                outcome = self.attempt(url) => outcome,
            };

            let (failure_type, detail) = match outcome {
                Ok(response) => {
                    debug!(
                        url = %url,
                        attempts = attempt,
                        bytes = response.body.len(),
                        content_type = response.content_type.as_deref().unwrap_or("-"),
                        "fetched"
                    );
                    return FetchResult::Body {
                        body: response.body,
                        attempts: attempt,
                    };
                }
                Err(failure) => failure,
            };

            match self.policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    debug!(url = %url, attempt, detail = %detail, "fetch attempt failed");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return cancelled(attempt),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt = next;
                }
                RetryDecision::DoNotRetry { .. } => {
                    let reason = match failure_type {
                        FailureType::Permanent => FetchFailure::Permanent(detail),
                        FailureType::Transient => FetchFailure::Exhausted(detail),
                    };
                    return FetchResult::Failure {
                        reason,
                        attempts: attempt,
                    };
                }
            }
        }
    }

    /// One bounded attempt: wait for a permit, then race the transport
    /// against the request deadline
    async fn attempt(&self, url: &Url) -> Result<TransportResponse, (FailureType, String)> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| (FailureType::Permanent, "fetcher pool closed".to_string()))?;

        let response = tokio::time::timeout(
            self.request_timeout,
            self.transport.get(url, self.request_timeout),
        )
        .await
        .map_err(|_| {
            (
                FailureType::Transient,
                TransportError::Timeout.to_string(),
            )
        })?
        .map_err(|e| (e.failure_type(), e.to_string()))?;

        if (200..300).contains(&response.status) {
            Ok(response)
        } else {
            Err((
                classify_http_status(response.status),
                format!("HTTP {}", response.status),
            ))
        }
    }
}

fn cancelled(attempts: u32) -> FetchResult {
    FetchResult::Failure {
        reason: FetchFailure::Cancelled,
        attempts,
    }
}
