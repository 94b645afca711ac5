//! Extraction endpoint
//!
//! Wraps the pure extractor with the dedup ledger, and exposes the pair to
//! callers through the [`ExtractionClient`] trait. A caller does not know
//! whether the endpoint runs in its own process ([`LocalExtractionClient`])
//! or behind HTTP ([`HttpExtractionClient`] talking to [`serve`]).
//!
//! # Deadlines
//!
//! Every [`ExtractionRequest`] carries a deadline. The endpoint refuses to
//! commit a key once that deadline has elapsed, so a caller that gave up on
//! a call never has its key silently consumed by it. A commit that lands just
//! before the caller's own timer fires is still possible; the caller then
//! sees `DuplicateKey` on retry. The output store's own dedup layer does not
//! recover that record, it only keeps it from being written twice.

mod client;
mod protocol;
mod server;

pub use client::{HttpExtractionClient, LocalExtractionClient};
pub use protocol::{ExtractResponse, DEADLINE_HEADER, EXTRACT_PATH, HEALTH_PATH, SOURCE_URL_HEADER};
pub use server::{build_router, serve, serve_listener};

use crate::config::ExtractionConfig;
use crate::extract::{extract_record, ExtractionOutcome, ExtractionRequest, Rejection};
use crate::storage::{open_ledger, Ledger, SqliteLedger, StorageError, StorageResult};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Endpoint-side failure that is not a business rejection
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("deadline of {}ms elapsed before the key was committed", .0.as_millis())]
    DeadlineExceeded(Duration),

    #[error("ledger error: {0}")]
    Ledger(#[from] StorageError),
}

/// Caller-side failure to get an outcome out of the endpoint
///
/// Every variant is worth retrying; a business rejection is never an
/// `RpcError`.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("call exceeded its deadline")]
    DeadlineExceeded,

    #[error("endpoint internal error: {0}")]
    Internal(String),

    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl RpcError {
    /// Whether repeating the same call could produce a different result
    ///
    /// A protocol error means the endpoint could not understand the request
    /// (or the caller could not understand the answer); sending the same
    /// bytes again gets the same answer.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }
}

/// How the dispatcher reaches the extraction endpoint
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Extracts one document
    async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionOutcome, RpcError>;

    /// Checks that the endpoint is reachable and its ledger is loaded
    async fn health(&self) -> Result<(), RpcError>;
}

/// Extractor plus dedup ledger
///
/// The ledger sits behind one mutex, so the membership check and the insert
/// for a key are a single step for all concurrent callers. Parsing happens
/// outside the lock.
pub struct ExtractionEndpoint {
    ledger: Mutex<SqliteLedger>,
    max_document_bytes: usize,
}

/// Largest document accepted when no limit is configured
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 8 * 1024 * 1024;

impl ExtractionEndpoint {
    pub fn new(ledger: SqliteLedger) -> Self {
        Self {
            ledger: Mutex::new(ledger),
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }

    /// Opens the ledger file and loads every accepted key before returning
    pub fn open(path: &Path) -> StorageResult<Self> {
        Ok(Self::new(open_ledger(path)?))
    }

    /// Opens the configured ledger with the configured document limit
    pub fn from_config(config: &ExtractionConfig) -> StorageResult<Self> {
        Ok(Self::open(&config.ledger_path)?.with_max_document_bytes(config.max_document_bytes))
    }

    /// Documents longer than `limit` bytes are rejected as malformed, both
    /// in-process and over HTTP
    pub fn with_max_document_bytes(mut self, limit: usize) -> Self {
        self.max_document_bytes = limit.max(1);
        self
    }

    pub fn max_document_bytes(&self) -> usize {
        self.max_document_bytes
    }

    /// Number of keys in the ledger
    pub fn ledger_len(&self) -> StorageResult<usize> {
        let ledger = self.ledger.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(ledger.len())
    }

    /// Seeds the ledger with keys known to be accepted elsewhere
    pub fn reconcile<'a, I>(&self, keys: I, source: &str) -> StorageResult<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut ledger = self.ledger.lock().map_err(|_| StorageError::Poisoned)?;
        ledger.reconcile(keys, source)
    }

    /// Extracts one document and, if it is valid and new, records its key
    ///
    /// The request deadline is measured from when this call starts.
    pub fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionOutcome, EndpointError> {
        let started = Instant::now();

        if request.body.len() > self.max_document_bytes {
            let rejection = oversized(self.max_document_bytes);
            debug!(url = %request.source_url, bytes = request.body.len(), "document rejected: too large");
            return Ok(ExtractionOutcome::Rejected(rejection));
        }

        let record = match extract_record(&request.body) {
            Ok(record) => record,
            Err(rejection) => {
                debug!(
                    url = %request.source_url,
                    kind = %rejection.kind,
                    detail = %rejection.detail,
                    "document rejected"
                );
                return Ok(ExtractionOutcome::Rejected(rejection));
            }
        };

        let mut ledger = self.ledger.lock().map_err(|_| StorageError::Poisoned)?;

        if started.elapsed() >= request.deadline {
            return Err(EndpointError::DeadlineExceeded(request.deadline));
        }

        if ledger.try_insert(&record.upc, &request.source_url)? {
            Ok(ExtractionOutcome::Accepted(record))
        } else {
            debug!(url = %request.source_url, key = %record.upc, "duplicate key");
            Ok(ExtractionOutcome::Rejected(Rejection::duplicate(&record.upc)))
        }
    }
}

/// Rejection for a document over the size limit
pub(crate) fn oversized(limit: usize) -> Rejection {
    Rejection::malformed(format!("document exceeds {} bytes", limit))
}
