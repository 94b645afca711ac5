use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Catalog-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub extraction: ExtractionConfig,
    pub output: OutputConfig,
}

/// Where the catalog starts and how far discovery may walk
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// First listing page of the catalog
    #[serde(rename = "root-url")]
    pub root_url: String,

    /// Hard cap on listing pages walked per run (0 = no cap)
    #[serde(rename = "max-listing-pages", default)]
    pub max_listing_pages: u32,

    /// Consecutive listing-page failures tolerated; one more stops discovery
    #[serde(
        rename = "max-consecutive-listing-failures",
        default = "default_listing_failures"
    )]
    pub max_consecutive_listing_failures: u32,
}

/// Fetcher pool behavior
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Worker budget shared by every fetch in the run
    #[serde(rename = "max-concurrent-fetches")]
    pub max_concurrent_fetches: u32,

    /// Attempts per URL, including the first one
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any backoff delay (milliseconds)
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Deadline for each individual attempt (milliseconds)
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Extraction endpoint configuration (both the server and its callers)
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Remote endpoint base URL; absent means extraction runs in-process
    #[serde(rename = "endpoint-url", default)]
    pub endpoint_url: Option<String>,

    /// Listen address used by `--serve`
    #[serde(rename = "bind-addr", default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite file holding the dedup ledger
    #[serde(rename = "ledger-path")]
    pub ledger_path: PathBuf,

    /// Deadline attached to every extraction call (milliseconds)
    #[serde(rename = "call-timeout-ms")]
    pub call_timeout_ms: u64,

    /// Attempts per document when the endpoint is unreachable
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Largest document the endpoint will extract; larger ones are
    /// rejected as malformed
    #[serde(rename = "max-document-bytes", default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
}

impl ExtractionConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the JSON output store
    #[serde(rename = "records-path")]
    pub records_path: PathBuf,

    /// Optional markdown run report
    #[serde(rename = "report-path", default)]
    pub report_path: Option<PathBuf>,
}

fn default_listing_failures() -> u32 {
    1
}

fn default_max_document_bytes() -> usize {
    crate::endpoint::DEFAULT_MAX_DOCUMENT_BYTES
}

fn default_bind_addr() -> String {
    "127.0.0.1:50051".to_string()
}
