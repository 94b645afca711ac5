//! Catalog-Harvest: a paginated product catalog harvester
//!
//! This crate walks the listing pages of a product catalog, fetches every
//! product page under a bounded worker budget, hands each document to an
//! extraction endpoint that validates and de-duplicates it, and persists the
//! accepted records as a keyed JSON output store.

pub mod config;
pub mod crawler;
pub mod endpoint;
pub mod extract;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for run-level Catalog-Harvest operations
///
/// Per-item failures never surface here; they are contained by the
/// dispatcher and counted in the run report.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Ledger error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Catalog root {url} is unreachable: {reason}")]
    CatalogUnreachable { url: String, reason: String },

    #[error("Extraction endpoint unreachable: {0}")]
    EndpointUnreachable(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Catalog-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{harvest, CandidateUrl, FetchResult, Harvester};
pub use extract::{Availability, ExtractionOutcome, ExtractionRequest, Record, RejectionKind};
pub use output::RunReport;
