//! HTTP server for the extraction endpoint

use crate::endpoint::protocol::{
    ExtractResponse, DEADLINE_HEADER, EXTRACT_PATH, HEALTH_PATH, SOURCE_URL_HEADER,
};
use crate::endpoint::{oversized, EndpointError, ExtractionEndpoint};
use crate::extract::{ExtractionOutcome, ExtractionRequest};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Request bodies are capped at the endpoint's document limit
pub fn build_router(endpoint: Arc<ExtractionEndpoint>) -> Router {
    let body_limit = endpoint.max_document_bytes();
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(EXTRACT_PATH, post(extract))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(endpoint)
}

/// Binds `addr` and serves until `shutdown` resolves
pub async fn serve<F>(
    endpoint: Arc<ExtractionEndpoint>,
    addr: SocketAddr,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    serve_listener(endpoint, listener, shutdown).await
}

/// Serves on an already bound listener until `shutdown` resolves
pub async fn serve_listener<F>(
    endpoint: Arc<ExtractionEndpoint>,
    listener: TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(
        addr = %listener.local_addr()?,
        ledger_keys = endpoint.ledger_len().unwrap_or_default(),
        "extraction endpoint listening"
    );
    axum::serve(listener, build_router(endpoint))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health(State(endpoint): State<Arc<ExtractionEndpoint>>) -> impl IntoResponse {
    match endpoint.ledger_len() {
        Ok(keys) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "ledger_keys": keys })),
        ),
        Err(e) => {
            warn!(error = %e, "health check: ledger unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded" })),
            )
        }
    }
}

async fn extract(
    State(endpoint): State<Arc<ExtractionEndpoint>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let response = match body {
        Ok(body) => handle_extract(endpoint, &headers, body).await,
        Err(rejection) => body_rejected(&endpoint, &headers, rejection),
    };
    let status =
        StatusCode::from_u16(response.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response)).into_response()
}

async fn handle_extract(
    endpoint: Arc<ExtractionEndpoint>,
    headers: &HeaderMap,
    body: Bytes,
) -> ExtractResponse {
    let Some(deadline) = parse_deadline(headers) else {
        return ExtractResponse::MalformedRequest {
            detail: format!("missing or invalid {} header", DEADLINE_HEADER),
        };
    };

    let source_url = headers
        .get(SOURCE_URL_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let request = ExtractionRequest {
        source_url,
        body: body.to_vec(),
        deadline,
    };

    let task = tokio::task::spawn_blocking(move || endpoint.extract(&request));
    let response = match tokio::time::timeout(deadline, task).await {
        Ok(Ok(Ok(outcome))) => outcome.into(),
        Ok(Ok(Err(EndpointError::DeadlineExceeded(_)))) | Err(_) => {
            ExtractResponse::DeadlineExceeded {
                detail: format!("deadline of {}ms elapsed", deadline.as_millis()),
            }
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "extraction failed");
            ExtractResponse::Internal {
                detail: e.to_string(),
            }
        }
        Ok(Err(join_error)) => {
            error!(error = %join_error, "extraction task failed");
            ExtractResponse::Internal {
                detail: "extraction task failed".to_string(),
            }
        }
    };

    debug!(status = response.http_status(), "extract request served");
    response
}

/// Maps an unreadable request body to a response
///
/// A body over the limit is a property of the document, so it gets the same
/// terminal rejection the in-process endpoint gives it.
fn body_rejected(
    endpoint: &ExtractionEndpoint,
    headers: &HeaderMap,
    rejection: BytesRejection,
) -> ExtractResponse {
    let source_url = headers
        .get(SOURCE_URL_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        debug!(url = %source_url, "document rejected: too large");
        ExtractionOutcome::Rejected(oversized(endpoint.max_document_bytes())).into()
    } else {
        warn!(url = %source_url, error = %rejection.body_text(), "unreadable request body");
        ExtractResponse::MalformedRequest {
            detail: rejection.body_text(),
        }
    }
}

/// Reads a positive millisecond deadline from the request headers
fn parse_deadline(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(DEADLINE_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}
