//! Integration tests for the harvester
//!
//! These tests use wiremock to serve mock catalogs, scripted transports for
//! timing-sensitive properties, and a real extraction endpoint (in-process or
//! over HTTP) to test full runs end-to-end.

use async_trait::async_trait;
use catalog_harvest::config::{
    CatalogConfig, Config, CrawlerConfig, ExtractionConfig, OutputConfig, UserAgentConfig,
};
use catalog_harvest::crawler::{
    FetchFailure, FetchResult, FetcherPool, RetryPolicy, Transport, TransportError,
    TransportResponse,
};
use catalog_harvest::endpoint::{
    serve_listener, ExtractionClient, ExtractionEndpoint, HttpExtractionClient,
    LocalExtractionClient, RpcError, DEADLINE_HEADER, DEFAULT_MAX_DOCUMENT_BYTES, EXTRACT_PATH,
};
use catalog_harvest::extract::{ExtractionOutcome, ExtractionRequest, Record, RejectionKind};
use catalog_harvest::output::{JsonOutputStore, RunStatus};
use catalog_harvest::state::SkipReason;
use catalog_harvest::storage::SqliteLedger;
use catalog_harvest::{HarvestError, Harvester};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ===== Fixtures =====

fn product_page(upc: &str) -> String {
    format!(
        r#"<html><body>
        <div class="product_main"><h1>Book {upc}</h1>
          <p class="instock availability">
              In stock (4 available)
          </p></div>
        <table class="table table-striped">
          <tr><th>UPC</th><td>{upc}</td></tr>
          <tr><th>Product Type</th><td>Books</td></tr>
          <tr><th>Price (excl. tax)</th><td>Â£12.50</td></tr>
          <tr><th>Price (incl. tax)</th><td>Â£12.50</td></tr>
          <tr><th>Tax</th><td>Â£0.00</td></tr>
        </table></body></html>"#
    )
}

fn listing_page(products: &[String], next: Option<&str>) -> String {
    let pods: String = products
        .iter()
        .map(|p| {
            format!(
                r#"<li><article class="product_pod"><h3><a href="{}/index.html" title="{}">{}</a></h3></article></li>"#,
                p, p, p
            )
        })
        .collect();
    let pager = next
        .map(|n| format!(r#"<ul class="pager"><li class="next"><a href="{}">next</a></li></ul>"#, n))
        .unwrap_or_default();
    format!("<html><body><ol class=\"row\">{}</ol>{}</body></html>", pods, pager)
}

fn product_ids(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(|i| format!("p{:02}", i)).collect()
}

/// Creates a test configuration rooted at `root_url` with state under `dir`
fn create_test_config(root_url: &str, dir: &Path) -> Config {
    Config {
        catalog: CatalogConfig {
            root_url: root_url.to_string(),
            max_listing_pages: 0,
            max_consecutive_listing_failures: 1,
        },
        crawler: CrawlerConfig {
            max_concurrent_fetches: 4,
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
            request_timeout_ms: 2000,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        extraction: ExtractionConfig {
            endpoint_url: None,
            bind_addr: "127.0.0.1:0".to_string(),
            ledger_path: dir.join("ledger.db"),
            call_timeout_ms: 5000,
            max_attempts: 2,
            max_document_bytes: 1024 * 1024,
        },
        output: OutputConfig {
            records_path: dir.join("records.json"),
            report_path: Some(dir.join("report.md")),
        },
    }
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "text/html")
}

/// Mounts a single-page catalog with the given products
async fn mount_small_catalog(server: &MockServer, products: &[String]) {
    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(html(listing_page(products, None)))
        .mount(server)
        .await;
    for p in products {
        Mock::given(method("GET"))
            .and(path(format!("/catalogue/{}/index.html", p)))
            .respond_with(html(product_page(p)))
            .mount(server)
            .await;
    }
}

fn read_output(config: &Config) -> Vec<Record> {
    JsonOutputStore::new(&config.output.records_path)
        .load()
        .expect("Failed to read output store")
}

fn assert_unique_keys(records: &[Record]) {
    let keys: HashSet<&str> = records.iter().map(|r| r.upc.as_str()).collect();
    assert_eq!(keys.len(), records.len(), "output store holds duplicate keys");
}

// ===== End-to-end runs over HTTP =====

#[tokio::test]
async fn test_end_to_end_three_listing_pages() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let pages = [product_ids(1..=7), product_ids(8..=14), product_ids(15..=20)];
    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(html(listing_page(&pages[0], Some("page-2.html"))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-2.html"))
        .respond_with(html(listing_page(&pages[1], Some("page-3.html"))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-3.html"))
        .respond_with(html(listing_page(&pages[2], None)))
        .mount(&server)
        .await;

    // Two missing products
    for missing in ["p05", "p12"] {
        Mock::given(method("GET"))
            .and(path(format!("/catalogue/{}/index.html", missing)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
    }

    // One product that times out twice before answering
    Mock::given(method("GET"))
        .and(path("/catalogue/p09/index.html"))
        .respond_with(html(product_page("p09")).set_delay(Duration::from_secs(3)))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    for p in product_ids(1..=20) {
        if p == "p05" || p == "p12" {
            continue;
        }
        Mock::given(method("GET"))
            .and(path(format!("/catalogue/{}/index.html", p)))
            .respond_with(html(product_page(&p)))
            .mount(&server)
            .await;
    }

    let mut config = create_test_config(
        &format!("{}/catalogue/page-1.html", server.uri()),
        dir.path(),
    );
    config.crawler.request_timeout_ms = 500;

    let report = Harvester::from_config(config.clone())
        .unwrap()
        .run(CancellationToken::new())
        .await
        .expect("Harvest failed");

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.listing_pages, 3);
    assert_eq!(report.discovered, 20);
    assert_eq!(report.fetched, 18);
    assert_eq!(report.accepted, 18);
    assert_eq!(report.skipped_count(SkipReason::FetchPermanent), 2);
    assert_eq!(report.skipped_count(SkipReason::FetchExhausted), 0);
    assert_eq!(report.total_rejected(), 0);
    assert_eq!(report.total_items(), 20);

    let records = read_output(&config);
    assert_eq!(records.len(), 18);
    assert_unique_keys(&records);
    assert!(records.iter().any(|r| r.upc == "p09"));
    assert!(!records.iter().any(|r| r.upc == "p05" || r.upc == "p12"));

    let sample = records.iter().find(|r| r.upc == "p01").unwrap();
    assert_eq!(sample.price_excl_tax, Decimal::new(1250, 2));
    assert_eq!(sample.availability.to_string(), "In stock (4 available)");

    let markdown = std::fs::read_to_string(dir.path().join("report.md")).unwrap();
    assert!(markdown.contains("| Skipped: fetch_permanent | 2 |"));
}

#[tokio::test]
async fn test_rerun_reports_duplicates_and_keeps_output() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_small_catalog(&server, &product_ids(1..=3)).await;

    let config = create_test_config(
        &format!("{}/catalogue/page-1.html", server.uri()),
        dir.path(),
    );

    let first = Harvester::from_config(config.clone())
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.accepted, 3);

    let second = Harvester::from_config(config.clone())
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    // A duplicate is fetched and rejected, never skipped
    assert_eq!(second.fetched, 3);
    assert_eq!(second.accepted, 0);
    assert_eq!(second.rejected_count(RejectionKind::DuplicateKey), 3);
    assert_eq!(second.total_skipped(), 0);
    assert_eq!(second.records_written, 3);
    assert_eq!(read_output(&config).len(), 3);
}

#[tokio::test]
async fn test_lost_ledger_is_rebuilt_from_output() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_small_catalog(&server, &product_ids(1..=3)).await;

    let config = create_test_config(
        &format!("{}/catalogue/page-1.html", server.uri()),
        dir.path(),
    );

    Harvester::from_config(config.clone())
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    std::fs::remove_file(&config.extraction.ledger_path).unwrap();
    let _ = std::fs::remove_file(dir.path().join("ledger.db-wal"));
    let _ = std::fs::remove_file(dir.path().join("ledger.db-shm"));

    let report = Harvester::from_config(config.clone())
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.rejected_count(RejectionKind::DuplicateKey), 3);
    assert_eq!(report.collector_duplicates, 0);
    assert_eq!(read_output(&config).len(), 3);
}

#[tokio::test]
async fn test_collector_backstop_with_empty_ledger() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_small_catalog(&server, &product_ids(1..=3)).await;

    let config = create_test_config(
        &format!("{}/catalogue/page-1.html", server.uri()),
        dir.path(),
    );

    Harvester::from_config(config.clone())
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Simulated restart: an endpoint with an empty ledger that knows nothing
    // about the output store
    let fresh = Arc::new(ExtractionEndpoint::new(SqliteLedger::new_in_memory().unwrap()));
    let client = Arc::new(LocalExtractionClient::new(fresh));
    let pool = Arc::new(FetcherPool::from_config(&config).unwrap());

    let report = Harvester::with_client(config.clone(), pool, client)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.accepted, 3);
    assert_eq!(report.collector_duplicates, 3);
    let records = read_output(&config);
    assert_eq!(records.len(), 3);
    assert_unique_keys(&records);
}

#[tokio::test]
async fn test_existing_store_with_uppercase_keys_is_not_duplicated() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_small_catalog(&server, &product_ids(1..=2)).await;

    let config = create_test_config(
        &format!("{}/catalogue/page-1.html", server.uri()),
        dir.path(),
    );

    // Written by an older run that kept keys as printed on the page
    let legacy: Record = serde_json::from_str(
        r#"{"name":"Book P01 (legacy)","availability":"In stock","upc":"P01","price_excl_tax":12.5,"tax":0.0}"#,
    )
    .unwrap();
    JsonOutputStore::new(&config.output.records_path)
        .write(&[legacy])
        .unwrap();

    let report = Harvester::from_config(config.clone())
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected_count(RejectionKind::DuplicateKey), 1);

    let records = read_output(&config);
    assert_eq!(records.len(), 2);
    assert_unique_keys(&records);
    assert_eq!(records[0].upc, "p01");
    assert_eq!(records[0].name, "Book P01 (legacy)");
}

// ===== Run-fatal conditions =====

#[tokio::test]
async fn test_catalog_root_unreachable_is_fatal() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = create_test_config(
        &format!("{}/catalogue/page-1.html", server.uri()),
        dir.path(),
    );

    let result = Harvester::from_config(config.clone())
        .unwrap()
        .run(CancellationToken::new())
        .await;

    assert!(matches!(result, Err(HarvestError::CatalogUnreachable { .. })));
    assert!(!config.output.records_path.exists());
}

#[tokio::test]
async fn test_endpoint_unreachable_is_fatal() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_small_catalog(&server, &product_ids(1..=2)).await;

    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let mut config = create_test_config(
        &format!("{}/catalogue/page-1.html", server.uri()),
        dir.path(),
    );
    config.extraction.endpoint_url = Some(format!("http://{}", closed));

    let result = Harvester::from_config(config.clone())
        .unwrap()
        .run(CancellationToken::new())
        .await;

    assert!(matches!(result, Err(HarvestError::EndpointUnreachable(_))));
    assert!(!config.output.records_path.exists());
}

#[tokio::test]
async fn test_invalid_existing_output_is_fatal() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_small_catalog(&server, &product_ids(1..=2)).await;

    let config = create_test_config(
        &format!("{}/catalogue/page-1.html", server.uri()),
        dir.path(),
    );
    std::fs::write(&config.output.records_path, "[{\"broken\": ").unwrap();

    let result = Harvester::from_config(config.clone())
        .unwrap()
        .run(CancellationToken::new())
        .await;

    assert!(matches!(result, Err(HarvestError::Output(_))));
    assert_eq!(
        std::fs::read_to_string(&config.output.records_path).unwrap(),
        "[{\"broken\": "
    );
}

// ===== Extraction endpoint over HTTP =====

/// Starts an HTTP endpoint on an ephemeral port; dropping the sender stops it
async fn start_endpoint() -> (String, tokio::sync::oneshot::Sender<()>) {
    start_endpoint_with_limit(DEFAULT_MAX_DOCUMENT_BYTES).await
}

async fn start_endpoint_with_limit(limit: usize) -> (String, tokio::sync::oneshot::Sender<()>) {
    let endpoint = Arc::new(
        ExtractionEndpoint::new(SqliteLedger::new_in_memory().unwrap())
            .with_max_document_bytes(limit),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        serve_listener(endpoint, listener, async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });

    (format!("http://{}", addr), tx)
}

fn request_for(upc: &str) -> ExtractionRequest {
    ExtractionRequest {
        source_url: format!("https://shop.test/catalogue/{}/index.html", upc),
        body: product_page(upc).into_bytes(),
        deadline: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_http_endpoint_accepts_then_rejects_duplicate() {
    let (base, _shutdown) = start_endpoint().await;
    let client = HttpExtractionClient::new(&base).unwrap();

    client.health().await.expect("health check failed");

    let first = client.extract(request_for("k1")).await.unwrap();
    match first {
        ExtractionOutcome::Accepted(record) => {
            assert_eq!(record.upc, "k1");
            assert_eq!(record.price_excl_tax, Decimal::new(1250, 2));
        }
        other => panic!("expected Accepted, got {:?}", other),
    }

    let second = client.extract(request_for("k1")).await.unwrap();
    assert_eq!(second.rejection_kind(), Some(RejectionKind::DuplicateKey));
}

#[tokio::test]
async fn test_http_endpoint_reports_invalid_documents() {
    let (base, _shutdown) = start_endpoint().await;
    let client = HttpExtractionClient::new(&base).unwrap();

    let mut request = request_for("k2");
    request.body = b"<html><body>no product here</body></html>".to_vec();

    let outcome = client.extract(request).await.unwrap();
    assert_eq!(
        outcome.rejection_kind(),
        Some(RejectionKind::MalformedDocument)
    );
}

/// A product page padded past `bytes` with an HTML comment
fn padded_request(upc: &str, bytes: usize) -> ExtractionRequest {
    let mut request = request_for(upc);
    let page = product_page(upc);
    request.body = format!("{}<!-- {} -->", page, "x".repeat(bytes)).into_bytes();
    request
}

#[tokio::test]
async fn test_http_endpoint_accepts_multi_megabyte_documents() {
    let (base, _shutdown) = start_endpoint().await;
    let client = HttpExtractionClient::new(&base).unwrap();

    let outcome = client.extract(padded_request("big1", 3 * 1024 * 1024)).await.unwrap();
    assert!(outcome.is_accepted(), "got {:?}", outcome.rejection_kind());
}

#[tokio::test]
async fn test_oversized_document_rejected_the_same_locally_and_over_http() {
    let limit = 64 * 1024;
    let (base, _shutdown) = start_endpoint_with_limit(limit).await;
    let remote = HttpExtractionClient::new(&base).unwrap();
    let local = LocalExtractionClient::new(Arc::new(
        ExtractionEndpoint::new(SqliteLedger::new_in_memory().unwrap())
            .with_max_document_bytes(limit),
    ));

    let over_http = remote.extract(padded_request("big2", limit + 1024)).await.unwrap();
    let in_process = local.extract(padded_request("big2", limit + 1024)).await.unwrap();

    assert_eq!(over_http, in_process);
    assert_eq!(
        over_http.rejection_kind(),
        Some(RejectionKind::MalformedDocument)
    );

    // The key is still free once a small enough copy arrives
    let accepted = remote.extract(request_for("big2")).await.unwrap();
    assert!(accepted.is_accepted());
}

#[tokio::test]
async fn test_http_endpoint_requires_deadline() {
    let (base, _shutdown) = start_endpoint().await;

    let response = reqwest::Client::new()
        .post(format!("{}{}", base, EXTRACT_PATH))
        .body(product_page("k3"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "MALFORMED_REQUEST");

    // The rejected call must not have consumed the key
    let response = reqwest::Client::new()
        .post(format!("{}{}", base, EXTRACT_PATH))
        .header(DEADLINE_HEADER, "5000")
        .body(product_page("k3"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn test_harvest_through_remote_endpoint() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_small_catalog(&server, &product_ids(1..=4)).await;
    let (base, _shutdown) = start_endpoint().await;

    let mut config = create_test_config(
        &format!("{}/catalogue/page-1.html", server.uri()),
        dir.path(),
    );
    config.extraction.endpoint_url = Some(base);

    let report = Harvester::from_config(config.clone())
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.accepted, 4);
    assert_eq!(read_output(&config).len(), 4);
    // The ledger file is only used by in-process extraction
    assert!(!config.extraction.ledger_path.exists());
}

// ===== Scripted transports =====

/// Serves a generated catalog from memory with a fixed latency per request
struct FakeCatalog {
    pages: HashMap<String, String>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    product_fetches: AtomicUsize,
}

impl FakeCatalog {
    const ROOT: &'static str = "https://shop.test/catalogue/page-1.html";

    fn new(products: usize, latency: Duration) -> Self {
        let ids = product_ids(1..=products);
        let mut pages = HashMap::new();
        pages.insert(Self::ROOT.to_string(), listing_page(&ids, None));
        for id in &ids {
            pages.insert(
                format!("https://shop.test/catalogue/{}/index.html", id),
                product_page(id),
            );
        }
        Self {
            pages,
            latency,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            product_fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transport for FakeCatalog {
    async fn get(&self, url: &Url, _timeout: Duration) -> Result<TransportResponse, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if url.path().ends_with("/index.html") {
            self.product_fetches.fetch_add(1, Ordering::SeqCst);
        }

        tokio::time::sleep(self.latency).await;
        let response = match self.pages.get(url.as_str()) {
            Some(body) => TransportResponse {
                status: 200,
                content_type: Some("text/html".to_string()),
                body: body.clone().into_bytes(),
            },
            None => TransportResponse {
                status: 404,
                content_type: None,
                body: Vec::new(),
            },
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(response)
    }
}

#[tokio::test]
async fn test_in_flight_fetches_never_exceed_budget() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(FakeCatalog::new(40, Duration::from_millis(15)));

    let mut config = create_test_config(FakeCatalog::ROOT, dir.path());
    config.crawler.max_concurrent_fetches = 3;

    let pool = Arc::new(FetcherPool::with_transport(catalog.clone(), &config));
    let endpoint = Arc::new(ExtractionEndpoint::open(&config.extraction.ledger_path).unwrap());

    let report = Harvester::with_endpoint(config.clone(), pool, endpoint)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.accepted, 40);
    let max = catalog.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "saw {} fetches in flight with a budget of 3", max);
    assert!(max >= 2, "fetches never overlapped");
}

/// Times out a fixed number of times, then answers
struct SlowThenFast {
    slow_calls: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for SlowThenFast {
    async fn get(&self, _url: &Url, _timeout: Duration) -> Result<TransportResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.slow_calls {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(TransportResponse {
            status: 200,
            content_type: Some("text/html".to_string()),
            body: b"ok".to_vec(),
        })
    }
}

fn slow_pool(slow_calls: usize, attempts: u32) -> (Arc<SlowThenFast>, FetcherPool) {
    let transport = Arc::new(SlowThenFast {
        slow_calls,
        calls: AtomicUsize::new(0),
    });
    let pool = FetcherPool::new(
        transport.clone(),
        2,
        RetryPolicy::immediate(attempts),
        Duration::from_millis(50),
    );
    (transport, pool)
}

#[tokio::test]
async fn test_fetch_succeeds_after_n_minus_one_timeouts() {
    let (transport, pool) = slow_pool(2, 3);
    let url = Url::parse("https://shop.test/p01/index.html").unwrap();

    let result = pool.fetch_url(&url, &CancellationToken::new()).await;

    assert!(matches!(result, FetchResult::Body { attempts: 3, .. }));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_fetch_fails_after_n_timeouts() {
    let (transport, pool) = slow_pool(3, 3);
    let url = Url::parse("https://shop.test/p01/index.html").unwrap();

    let result = pool.fetch_url(&url, &CancellationToken::new()).await;

    assert!(matches!(
        result,
        FetchResult::Failure {
            reason: FetchFailure::Exhausted(_),
            attempts: 3
        }
    ));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
}

// ===== Cancellation =====

/// Delegates to a real client and cancels the run after `limit` accepts
struct CancelAfterAccepts {
    inner: LocalExtractionClient,
    accepted: AtomicUsize,
    limit: usize,
    cancel: CancellationToken,
}

#[async_trait]
impl ExtractionClient for CancelAfterAccepts {
    async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionOutcome, RpcError> {
        let outcome = self.inner.extract(request).await?;
        if outcome.is_accepted() && self.accepted.fetch_add(1, Ordering::SeqCst) + 1 == self.limit {
            self.cancel.cancel();
        }
        Ok(outcome)
    }

    async fn health(&self) -> Result<(), RpcError> {
        self.inner.health().await
    }
}

#[tokio::test]
async fn test_cancellation_flushes_accepted_records() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(FakeCatalog::new(50, Duration::from_millis(1)));

    let mut config = create_test_config(FakeCatalog::ROOT, dir.path());
    config.crawler.max_concurrent_fetches = 1;

    let cancel = CancellationToken::new();
    let endpoint = Arc::new(ExtractionEndpoint::open(&config.extraction.ledger_path).unwrap());
    let client = Arc::new(CancelAfterAccepts {
        inner: LocalExtractionClient::new(endpoint),
        accepted: AtomicUsize::new(0),
        limit: 10,
        cancel: cancel.clone(),
    });
    let pool = Arc::new(FetcherPool::with_transport(catalog.clone(), &config));

    let report = Harvester::with_client(config.clone(), pool, client)
        .run(cancel)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.accepted, 10);
    assert_eq!(catalog.product_fetches.load(Ordering::SeqCst), 10);

    let records = read_output(&config);
    assert_eq!(records.len(), 10);
    assert_unique_keys(&records);
}

// ===== Non-retryable extraction failures =====

/// Answers every call with an error that repeating cannot fix
struct GarbledEndpoint {
    calls: AtomicUsize,
}

#[async_trait]
impl ExtractionClient for GarbledEndpoint {
    async fn extract(&self, _request: ExtractionRequest) -> Result<ExtractionOutcome, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RpcError::Protocol("missing or invalid x-deadline-ms header".to_string()))
    }

    async fn health(&self) -> Result<(), RpcError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_protocol_errors_are_not_retried() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(FakeCatalog::new(3, Duration::from_millis(1)));

    let mut config = create_test_config(FakeCatalog::ROOT, dir.path());
    config.extraction.max_attempts = 4;

    let client = Arc::new(GarbledEndpoint {
        calls: AtomicUsize::new(0),
    });
    let pool = Arc::new(FetcherPool::with_transport(catalog, &config));

    let report = Harvester::with_client(config.clone(), pool, client.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.skipped_count(SkipReason::ExtractionUnavailable), 3);
    assert_eq!(report.accepted, 0);
}

// ===== Declared charsets =====

fn latin1(text: &str) -> Vec<u8> {
    text.chars().map(|c| c as u8).collect()
}

#[tokio::test]
async fn test_latin1_product_page_is_decoded() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(html(listing_page(&product_ids(1..=1), None)))
        .mount(&server)
        .await;
    let page = product_page("p01").replace("Book p01", "Café p01").replace("Â£", "£");
    Mock::given(method("GET"))
        .and(path("/catalogue/p01/index.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(latin1(&page))
                .insert_header("content-type", "text/html; charset=ISO-8859-1"),
        )
        .mount(&server)
        .await;

    let config = create_test_config(
        &format!("{}/catalogue/page-1.html", server.uri()),
        dir.path(),
    );

    let report = Harvester::from_config(config.clone())
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected_count(RejectionKind::MalformedDocument), 0);
    let records = read_output(&config);
    assert_eq!(records[0].name, "Café p01");
    assert_eq!(records[0].price_excl_tax, Decimal::new(1250, 2));
}
