//! Output module for harvested records and run reports
//!
//! This module handles:
//! - Collecting accepted records with a second, output-side dedup layer
//! - Reading and atomically rewriting the JSON output store
//! - Run report counters, console printing, and markdown reports

mod collector;
mod json_store;
mod markdown;
pub mod stats;

pub use collector::Collector;
pub use json_store::JsonOutputStore;
pub use markdown::{format_markdown_report, write_markdown_report};
pub use stats::{
    load_statistics, print_report, print_statistics, RunReport, RunStatus, StoreStatistics,
};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Existing output store {path} is unreadable: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    #[error("Ledger error: {0}")]
    Ledger(#[from] crate::storage::StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
