//! Catalog discovery
//!
//! Walks listing pages from the catalog root and yields product URLs as a
//! lazy stream. The next listing page is fetched only once every candidate
//! from the previous one has been taken, so discovery never runs ahead of
//! the dispatcher by more than one page. Each call to
//! [`Discoverer::discover`] starts again from the root; no cursor is kept
//! between runs.

use crate::config::CatalogConfig;
use crate::crawler::fetcher::{FetchFailure, FetchResult, FetcherPool};
use crate::crawler::parser::parse_listing;
use crate::url::{next_listing_page, normalize_url};
use crate::{HarvestError, UrlResult};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// A product page location plus the listing page that produced it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateUrl {
    pub url: Url,
    pub source: Url,
}

/// Counters shared between a discovery stream and whoever reports on it
#[derive(Debug, Default)]
pub struct DiscoveryProgress {
    listing_pages: AtomicUsize,
    listing_failures: AtomicUsize,
    discovered: AtomicUsize,
}

impl DiscoveryProgress {
    /// Listing pages fetched and parsed
    pub fn listing_pages(&self) -> usize {
        self.listing_pages.load(Ordering::Relaxed)
    }

    /// Listing pages given up on after retries
    pub fn listing_failures(&self) -> usize {
        self.listing_failures.load(Ordering::Relaxed)
    }

    /// Unique candidate URLs yielded so far
    pub fn discovered(&self) -> usize {
        self.discovered.load(Ordering::Relaxed)
    }
}

/// Enumerates candidate URLs for one catalog
pub struct Discoverer {
    pool: Arc<FetcherPool>,
    root: Url,
    max_pages: u32,
    max_consecutive_failures: u32,
    progress: Arc<DiscoveryProgress>,
}

impl Discoverer {
    /// `max_pages == 0` means no cap
    pub fn new(
        pool: Arc<FetcherPool>,
        root: Url,
        max_pages: u32,
        max_consecutive_failures: u32,
    ) -> Self {
        Self {
            pool,
            root,
            max_pages,
            max_consecutive_failures: max_consecutive_failures.max(1),
            progress: Arc::new(DiscoveryProgress::default()),
        }
    }

    pub fn from_config(pool: Arc<FetcherPool>, config: &CatalogConfig) -> UrlResult<Self> {
        let root = normalize_url(&config.root_url)?;
        Ok(Self::new(
            pool,
            root,
            config.max_listing_pages,
            config.max_consecutive_listing_failures,
        ))
    }

    pub fn progress(&self) -> Arc<DiscoveryProgress> {
        Arc::clone(&self.progress)
    }

    /// Returns a lazy stream of candidates starting from the catalog root
    ///
    /// The stream ends when a listing page has no next link, when the page
    /// cap is reached, after too many consecutive listing failures, or on
    /// cancellation. Failing to fetch the root itself yields one
    /// [`HarvestError::CatalogUnreachable`] and then ends.
    pub fn discover(
        &self,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<CandidateUrl, HarvestError>> {
        let walk = Walk {
            pool: Arc::clone(&self.pool),
            progress: Arc::clone(&self.progress),
            cancel,
            max_pages: self.max_pages,
            max_consecutive_failures: self.max_consecutive_failures,
            next_page: Some(self.root.clone()),
            pending: VecDeque::new(),
            seen: HashSet::new(),
            visited_pages: HashSet::new(),
            pages_walked: 0,
            consecutive_failures: 0,
        };

        stream::unfold(walk, |mut walk| async move {
            loop {
                if let Some(candidate) = walk.pending.pop_front() {
                    return Some((Ok(candidate), walk));
                }

                let Some(page) = walk.next_page.take() else {
                    return None;
                };
                if walk.cancel.is_cancelled() || walk.page_cap_reached() {
                    return None;
                }

                if let Err(e) = walk.visit(page).await {
                    return Some((Err(e), walk));
                }
            }
        })
        .boxed()
    }
}

struct Walk {
    pool: Arc<FetcherPool>,
    progress: Arc<DiscoveryProgress>,
    cancel: CancellationToken,
    max_pages: u32,
    max_consecutive_failures: u32,
    next_page: Option<Url>,
    pending: VecDeque<CandidateUrl>,
    seen: HashSet<Url>,
    visited_pages: HashSet<Url>,
    pages_walked: u32,
    consecutive_failures: u32,
}

impl Walk {
    fn page_cap_reached(&self) -> bool {
        self.max_pages > 0 && self.pages_walked >= self.max_pages
    }

    /// Fetches one listing page and queues its candidates
    ///
    /// Leaves `next_page` empty when the walk should stop.
    async fn visit(&mut self, page: Url) -> Result<(), HarvestError> {
        let is_root = self.pages_walked == 0;
        self.pages_walked += 1;
        self.visited_pages.insert(page.clone());

        match self.pool.fetch_url(&page, &self.cancel).await {
            FetchResult::Body { body, .. } => {
                let listing = parse_listing(&String::from_utf8_lossy(&body), &page);
                self.consecutive_failures = 0;
                let pages = self.progress.listing_pages.fetch_add(1, Ordering::Relaxed) + 1;

                let mut added = 0;
                for url in listing.product_links {
                    if self.seen.insert(url.clone()) {
                        self.pending.push_back(CandidateUrl {
                            url,
                            source: page.clone(),
                        });
                        added += 1;
                    }
                }
                self.progress.discovered.fetch_add(added, Ordering::Relaxed);
                debug!(url = %page, candidates = added, "listing page parsed");
                if pages % 10 == 0 {
                    info!(
                        listing_pages = pages,
                        discovered = self.progress.discovered(),
                        "discovery progress"
                    );
                }

                self.next_page = listing
                    .next_page
                    .filter(|next| !self.visited_pages.contains(next));
                Ok(())
            }
            FetchResult::Failure {
                reason: FetchFailure::Cancelled,
                ..
            } => Ok(()),
            FetchResult::Failure { reason, attempts } if is_root => {
                Err(HarvestError::CatalogUnreachable {
                    url: page.to_string(),
                    reason: format!("{} after {} attempt(s)", reason, attempts),
                })
            }
            FetchResult::Failure { reason, attempts } => {
                self.progress.listing_failures.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures += 1;

                if self.consecutive_failures > self.max_consecutive_failures {
                    warn!(
                        url = %page,
                        attempts,
                        detail = %reason,
                        "listing page failed; stopping discovery"
                    );
                    return Ok(());
                }

                self.next_page = next_listing_page(&page)
                    .filter(|next| !self.visited_pages.contains(next));
                warn!(
                    url = %page,
                    attempts,
                    detail = %reason,
                    next = ?self.next_page.as_ref().map(Url::as_str),
                    "listing page failed; continuing with derived next page"
                );
                Ok(())
            }
        }
    }
}
