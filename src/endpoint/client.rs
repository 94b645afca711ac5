//! Extraction clients

use crate::endpoint::protocol::{
    ExtractResponse, DEADLINE_HEADER, EXTRACT_PATH, HEALTH_PATH, SOURCE_URL_HEADER,
};
use crate::endpoint::{EndpointError, ExtractionClient, ExtractionEndpoint, RpcError};
use crate::extract::{ExtractionOutcome, ExtractionRequest, Rejection};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Calls an [`ExtractionEndpoint`] living in the same process
///
/// Ledger writes are blocking SQLite calls, so each extraction runs on the
/// blocking pool.
#[derive(Clone)]
pub struct LocalExtractionClient {
    endpoint: Arc<ExtractionEndpoint>,
}

impl LocalExtractionClient {
    pub fn new(endpoint: Arc<ExtractionEndpoint>) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Arc<ExtractionEndpoint> {
        &self.endpoint
    }
}

#[async_trait]
impl ExtractionClient for LocalExtractionClient {
    async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionOutcome, RpcError> {
        let endpoint = Arc::clone(&self.endpoint);
        let deadline = request.deadline;
        let task = tokio::task::spawn_blocking(move || endpoint.extract(&request));

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(Ok(outcome))) => Ok(outcome),
            Ok(Ok(Err(EndpointError::DeadlineExceeded(_)))) | Err(_) => {
                Err(RpcError::DeadlineExceeded)
            }
            Ok(Ok(Err(e))) => Err(RpcError::Internal(e.to_string())),
            Ok(Err(join_error)) => Err(RpcError::Internal(join_error.to_string())),
        }
    }

    async fn health(&self) -> Result<(), RpcError> {
        self.endpoint
            .ledger_len()
            .map(|_| ())
            .map_err(|e| RpcError::Unavailable(e.to_string()))
    }
}

/// Calls an extraction endpoint served over HTTP
#[derive(Debug, Clone)]
pub struct HttpExtractionClient {
    client: Client,
    extract_url: Url,
    health_url: Url,
}

impl HttpExtractionClient {
    pub fn new(base_url: &str) -> Result<Self, RpcError> {
        let base = Url::parse(base_url).map_err(|e| RpcError::Protocol(e.to_string()))?;
        let client = Client::builder()
            .build()
            .map_err(|e| RpcError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            extract_url: join(&base, EXTRACT_PATH)?,
            health_url: join(&base, HEALTH_PATH)?,
        })
    }
}

#[async_trait]
impl ExtractionClient for HttpExtractionClient {
    async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionOutcome, RpcError> {
        let response = self
            .client
            .post(self.extract_url.clone())
            .timeout(request.deadline)
            .header(SOURCE_URL_HEADER, request.source_url.as_str())
            .header(DEADLINE_HEADER, request.deadline.as_millis().to_string())
            .body(request.body)
            .send()
            .await
            .map_err(transport_error)?;

        // A proxy in front of the endpoint may refuse the body without a
        // JSON answer
        if response.status() == StatusCode::PAYLOAD_TOO_LARGE
            && !is_json(response.headers())
        {
            return Ok(ExtractionOutcome::Rejected(Rejection::malformed(
                "document refused as too large",
            )));
        }

        let payload: ExtractResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                RpcError::DeadlineExceeded
            } else {
                RpcError::Protocol(e.to_string())
            }
        })?;
        payload.into_outcome()
    }

    async fn health(&self) -> Result<(), RpcError> {
        let response = self
            .client
            .get(self.health_url.clone())
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RpcError::Unavailable(format!(
                "health check returned HTTP {}",
                response.status().as_u16()
            )))
        }
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

fn join(base: &Url, path: &str) -> Result<Url, RpcError> {
    base.join(path).map_err(|e| RpcError::Protocol(e.to_string()))
}

fn transport_error(e: reqwest::Error) -> RpcError {
    if e.is_timeout() {
        RpcError::DeadlineExceeded
    } else {
        RpcError::Unavailable(e.to_string())
    }
}
