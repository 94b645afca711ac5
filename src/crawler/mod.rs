//! Crawler module for catalog harvesting
//!
//! This module contains the pipeline that turns a catalog root into records:
//! - Listing page discovery as a lazy stream of candidate URLs
//! - Bounded, retrying document fetches
//! - Dispatching documents to the extraction endpoint
//! - Overall run wiring: output store, ledger reconciliation, reporting

mod discoverer;
mod dispatcher;
mod fetcher;
mod parser;
mod retry;

pub use discoverer::{CandidateUrl, Discoverer, DiscoveryProgress};
pub use dispatcher::Dispatcher;
pub use fetcher::{
    build_http_client, FetchFailure, FetchResult, FetcherPool, HttpTransport, Transport,
    TransportError, TransportResponse,
};
pub use parser::{parse_listing, ListingPage};
pub use retry::{classify_http_status, FailureType, RetryDecision, RetryPolicy};

use crate::config::Config;
use crate::endpoint::{
    ExtractionClient, ExtractionEndpoint, HttpExtractionClient, LocalExtractionClient,
};
use crate::output::{write_markdown_report, Collector, JsonOutputStore, RunReport};
use crate::{HarvestError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Label recorded as the source of keys seeded from the output store
const RECONCILE_SOURCE: &str = "output-store";

/// One configured harvest run
pub struct Harvester {
    config: Config,
    pool: Arc<FetcherPool>,
    client: Arc<dyn ExtractionClient>,
    local_endpoint: Option<Arc<ExtractionEndpoint>>,
    config_hash: Option<String>,
}

impl Harvester {
    /// Builds the HTTP fetcher pool and the extraction client the
    /// configuration asks for
    ///
    /// Without `endpoint-url` the ledger is opened here, in-process.
    pub fn from_config(config: Config) -> Result<Self> {
        let pool = Arc::new(FetcherPool::from_config(&config)?);

        match config.extraction.endpoint_url.clone() {
            Some(url) => {
                let client = HttpExtractionClient::new(&url)
                    .map_err(|e| HarvestError::EndpointUnreachable(e.to_string()))?;
                Ok(Self::with_client(config, pool, Arc::new(client)))
            }
            None => {
                let endpoint = ExtractionEndpoint::from_config(&config.extraction)?;
                Ok(Self::with_endpoint(config, pool, Arc::new(endpoint)))
            }
        }
    }

    /// Uses an in-process endpoint; its ledger is reconciled with the output
    /// store when the run starts
    pub fn with_endpoint(
        config: Config,
        pool: Arc<FetcherPool>,
        endpoint: Arc<ExtractionEndpoint>,
    ) -> Self {
        Self {
            config,
            pool,
            client: Arc::new(LocalExtractionClient::new(Arc::clone(&endpoint))),
            local_endpoint: Some(endpoint),
            config_hash: None,
        }
    }

    /// Uses any extraction client; no ledger reconciliation is done
    pub fn with_client(
        config: Config,
        pool: Arc<FetcherPool>,
        client: Arc<dyn ExtractionClient>,
    ) -> Self {
        Self {
            config,
            pool,
            client,
            local_endpoint: None,
            config_hash: None,
        }
    }

    pub fn config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// Runs discovery, fetching, and extraction, then persists the output
    ///
    /// The output store and report are written when the run completes or is
    /// cancelled. A run-fatal error writes nothing.
    pub async fn run(self, cancel: CancellationToken) -> Result<RunReport> {
        let store = JsonOutputStore::new(&self.config.output.records_path);
        let existing = store.load()?;
        store.ensure_writable()?;
        let mut collector = Collector::seeded(existing);
        info!(
            path = %store.path().display(),
            records = collector.len(),
            "output store loaded"
        );

        if let Some(endpoint) = &self.local_endpoint {
            let added = endpoint.reconcile(collector.keys(), RECONCILE_SOURCE)?;
            if added > 0 {
                info!(added, "ledger reconciled from output store");
            }
        }

        let mut report = RunReport::new();
        report.config_hash = self.config_hash.clone();

        let discoverer = Discoverer::from_config(Arc::clone(&self.pool), &self.config.catalog)?;
        let progress = discoverer.progress();

        let extraction = &self.config.extraction;
        let policy = RetryPolicy::new(
            extraction.max_attempts,
            Duration::from_millis(self.config.crawler.base_delay_ms),
            Duration::from_millis(self.config.crawler.max_delay_ms),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.client),
            policy,
            extraction.call_timeout(),
        );

        info!(
            root = %self.config.catalog.root_url,
            max_in_flight = self.pool.max_in_flight(),
            "harvest started"
        );
        let status = dispatcher
            .run(
                discoverer.discover(cancel.clone()),
                &mut collector,
                &mut report,
                &cancel,
            )
            .await?;

        report.discovered = progress.discovered();
        report.listing_pages = progress.listing_pages();
        report.listing_failures = progress.listing_failures();
        report.collector_duplicates = collector.duplicates();

        store.write(collector.records())?;
        report.records_written = collector.len();
        report.finish(status);

        if let Some(path) = &self.config.output.report_path {
            write_markdown_report(&report, path)?;
        }

        info!(
            status = report.status.as_str(),
            fetched = report.fetched,
            accepted = report.accepted,
            rejected = report.total_rejected(),
            skipped = report.total_skipped(),
            records = report.records_written,
            "harvest finished"
        );
        Ok(report)
    }
}

/// Runs a complete harvest from configuration
///
/// This is the main entry point for a run. It will:
/// 1. Load the existing output store and seed the collector with it
/// 2. Open (and reconcile) the ledger, or connect to a remote endpoint
/// 3. Walk the catalog and fetch every product page
/// 4. Extract, de-duplicate, and collect records
/// 5. Rewrite the output store and the optional markdown report
pub async fn harvest(config: Config, cancel: CancellationToken) -> Result<RunReport> {
    Harvester::from_config(config)?.run(cancel).await
}
