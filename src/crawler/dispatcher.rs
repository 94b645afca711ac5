//! Dispatcher
//!
//! Drives discovery, fetching, and extraction for one run. Each candidate
//! becomes an independent task that fetches its document and hands the body
//! to the extraction endpoint; at most `max_in_flight` such tasks exist at
//! once. Every per-item failure is contained here and turned into an
//! [`ItemOutcome`]; only conditions that make the whole run pointless are
//! returned as errors.
//!
//! # Cancellation
//!
//! Once the run's token is cancelled no new candidate is taken. In-flight
//! fetches and backoff waits end immediately. An extraction call that is
//! already in progress is allowed to finish (it is bounded by its deadline)
//! so a key the ledger commits is never separated from its record.

use crate::crawler::discoverer::CandidateUrl;
use crate::crawler::fetcher::{FetchFailure, FetchResult, FetcherPool};
use crate::crawler::retry::{FailureType, RetryDecision, RetryPolicy};
use crate::endpoint::{ExtractionClient, RpcError};
use crate::extract::{ExtractionOutcome, ExtractionRequest, Record, RejectionKind};
use crate::output::{Collector, RunReport, RunStatus};
use crate::state::{ItemOutcome, SkipReason};
use crate::HarvestError;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Items between progress log lines
const PROGRESS_INTERVAL: usize = 50;

/// What one candidate's task reports back
#[derive(Debug)]
struct ItemReport {
    url: Url,
    fetched: bool,
    outcome: ItemOutcome,
    record: Option<Record>,
}

/// Shared, read-only state of the per-item tasks
struct ItemContext {
    pool: Arc<FetcherPool>,
    client: Arc<dyn ExtractionClient>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

pub struct Dispatcher {
    context: Arc<ItemContext>,
    max_in_flight: usize,
}

impl Dispatcher {
    /// `policy` governs retries of the extraction call; the pool carries its
    /// own policy for fetches
    pub fn new(
        pool: Arc<FetcherPool>,
        client: Arc<dyn ExtractionClient>,
        policy: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        let max_in_flight = pool.max_in_flight();
        Self {
            context: Arc::new(ItemContext {
                pool,
                client,
                policy,
                call_timeout,
            }),
            max_in_flight,
        }
    }

    /// Runs the pipeline until discovery is exhausted or the run is cancelled
    ///
    /// Accepted records go into `collector`; every terminal outcome is
    /// counted in `report`.
    pub async fn run(
        &self,
        mut candidates: BoxStream<'static, Result<CandidateUrl, HarvestError>>,
        collector: &mut Collector,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> Result<RunStatus, HarvestError> {
        self.probe_endpoint(cancel).await?;

        let mut in_flight: JoinSet<ItemReport> = JoinSet::new();
        let mut discovery_done = false;
        let mut cancelled = false;
        let mut extraction_succeeded = false;

        loop {
            if discovery_done && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !cancelled => {
                    info!(in_flight = in_flight.len(), "cancellation requested; draining in-flight items");
                    cancelled = true;
                    discovery_done = true;
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    let item = match joined {
                        Ok(item) => item,
                        Err(e) => {
                            error!(error = %e, "item task failed");
                            continue;
                        }
                    };

                    if matches!(item.outcome, ItemOutcome::Skipped(SkipReason::ExtractionUnavailable))
                        && !extraction_succeeded
                        && self.probe_endpoint(cancel).await.is_err()
                    {
                        in_flight.shutdown().await;
                        return Err(HarvestError::EndpointUnreachable(format!(
                            "no extraction call succeeded; last item was {}",
                            item.url
                        )));
                    }
                    if item.record.is_some() || item.outcome.is_rejected() {
                        extraction_succeeded = true;
                    }

                    Self::settle(item, collector, report);
                    let done = report.total_items();
                    if done % PROGRESS_INTERVAL == 0 {
                        info!(
                            items = done,
                            accepted = report.accepted,
                            in_flight = in_flight.len(),
                            "harvest progress"
                        );
                    }
                }

                next = candidates.next(), if !discovery_done && in_flight.len() < self.max_in_flight => {
                    match next {
                        Some(Ok(candidate)) => {
                            let context = Arc::clone(&self.context);
                            let cancel = cancel.clone();
                            in_flight.spawn(process(context, candidate, cancel));
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "discovery failed");
                            in_flight.shutdown().await;
                            return Err(e);
                        }
                        None => {
                            debug!("discovery exhausted");
                            discovery_done = true;
                        }
                    }
                }
            }
        }

        Ok(if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        })
    }

    /// Checks the endpoint under the extraction retry policy
    async fn probe_endpoint(&self, cancel: &CancellationToken) -> Result<(), HarvestError> {
        let mut attempt = 1;
        loop {
            let err = match self.context.client.health().await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            match self.context.policy.should_retry(FailureType::Transient, attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    debug!(attempt, detail = %err, "extraction endpoint health check failed");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt = next;
                }
                RetryDecision::DoNotRetry { .. } => {
                    error!(attempts = attempt, detail = %err, "extraction endpoint unreachable");
                    return Err(HarvestError::EndpointUnreachable(err.to_string()));
                }
            }
        }
    }

    fn settle(item: ItemReport, collector: &mut Collector, report: &mut RunReport) {
        if item.fetched {
            report.fetched += 1;
        }
        report.record(item.outcome);

        if let Some(record) = item.record {
            let key = record.upc.clone();
            if collector.accept(record) {
                debug!(url = %item.url, key = %key, "record accepted");
            } else {
                warn!(
                    url = %item.url,
                    key = %key,
                    "endpoint accepted a key the output store already holds"
                );
            }
        }
    }
}

/// Fetch-and-extract cycle for one candidate
async fn process(
    context: Arc<ItemContext>,
    candidate: CandidateUrl,
    cancel: CancellationToken,
) -> ItemReport {
    let url = candidate.url.clone();
    let skipped = |fetched: bool, reason: SkipReason| ItemReport {
        url: candidate.url.clone(),
        fetched,
        outcome: ItemOutcome::Skipped(reason),
        record: None,
    };

    let body = match context.pool.fetch(&candidate, &cancel).await {
        FetchResult::Body { body, .. } => body,
        FetchResult::Failure { reason, attempts } => {
            let skip = match &reason {
                FetchFailure::Permanent(_) => SkipReason::FetchPermanent,
                FetchFailure::Exhausted(_) => SkipReason::FetchExhausted,
                FetchFailure::Cancelled => SkipReason::Cancelled,
            };
            if skip != SkipReason::Cancelled {
                warn!(
                    url = %url,
                    kind = %skip,
                    attempts,
                    detail = %reason,
                    source = %candidate.source,
                    "item skipped"
                );
            }
            return skipped(false, skip);
        }
    };

    if cancel.is_cancelled() {
        return skipped(true, SkipReason::Cancelled);
    }

    let mut attempt = 1;
    loop {
        let request = ExtractionRequest {
            source_url: url.to_string(),
            body: body.clone(),
            deadline: context.call_timeout,
        };

        let err: RpcError = match context.client.extract(request).await {
            Ok(ExtractionOutcome::Accepted(record)) => {
                return ItemReport {
                    url,
                    fetched: true,
                    outcome: ItemOutcome::Accepted,
                    record: Some(record),
                };
            }
            Ok(ExtractionOutcome::Rejected(rejection)) => {
                if rejection.kind == RejectionKind::DuplicateKey {
                    debug!(url = %url, key = %rejection.detail, "duplicate key");
                } else {
                    warn!(
                        url = %url,
                        kind = %rejection.kind,
                        detail = %rejection.detail,
                        "document rejected"
                    );
                }
                return ItemReport {
                    url,
                    fetched: true,
                    outcome: ItemOutcome::Rejected(rejection.kind),
                    record: None,
                };
            }
            Err(e) => e,
        };

        let failure_type = if err.is_retryable() {
            FailureType::Transient
        } else {
            FailureType::Permanent
        };
        match context.policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry { delay, attempt: next } => {
                debug!(url = %url, attempt, detail = %err, "extraction call failed");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return skipped(true, SkipReason::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt = next;
            }
            RetryDecision::DoNotRetry { .. } => {
                warn!(
                    url = %url,
                    kind = %SkipReason::ExtractionUnavailable,
                    attempts = attempt,
                    detail = %err,
                    "item skipped"
                );
                return skipped(true, SkipReason::ExtractionUnavailable);
            }
        }
    }
}
