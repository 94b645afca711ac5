//! Configuration module for Catalog-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use catalog_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Worker budget: {}", config.crawler.max_concurrent_fetches);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CatalogConfig, Config, CrawlerConfig, ExtractionConfig, OutputConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
