//! Wire format of the extraction RPC
//!
//! `POST /v1/extract` carries the raw document as the body plus two headers:
//!
//! | Header          | Required | Meaning                                   |
//! |-----------------|----------|-------------------------------------------|
//! | `x-deadline-ms` | yes      | caller's remaining budget in milliseconds |
//! | `x-source-url`  | no       | where the document came from              |
//!
//! The response is an [`ExtractResponse`] as JSON, tagged by `status`.

use crate::endpoint::RpcError;
use crate::extract::{ExtractionOutcome, Record, Rejection, RejectionKind};
use serde::{Deserialize, Serialize};

pub const EXTRACT_PATH: &str = "/v1/extract";
pub const HEALTH_PATH: &str = "/healthz";
pub const SOURCE_URL_HEADER: &str = "x-source-url";
pub const DEADLINE_HEADER: &str = "x-deadline-ms";

/// Every response the endpoint can send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractResponse {
    Ok { record: Record },
    InvalidArgument { kind: RejectionKind, detail: String },
    AlreadyExists { key: String },
    DeadlineExceeded { detail: String },
    Internal { detail: String },
    MalformedRequest { detail: String },
}

impl ExtractResponse {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Ok { .. } => 200,
            Self::InvalidArgument { .. } => 422,
            Self::AlreadyExists { .. } => 409,
            Self::DeadlineExceeded { .. } => 504,
            Self::Internal { .. } => 500,
            Self::MalformedRequest { .. } => 400,
        }
    }

    /// Converts a response back into an outcome on the caller's side
    pub fn into_outcome(self) -> Result<ExtractionOutcome, RpcError> {
        match self {
            Self::Ok { record } => Ok(ExtractionOutcome::Accepted(record)),
            Self::InvalidArgument { kind, detail } => {
                Ok(ExtractionOutcome::Rejected(Rejection::new(kind, detail)))
            }
            Self::AlreadyExists { key } => {
                Ok(ExtractionOutcome::Rejected(Rejection::duplicate(&key)))
            }
            Self::DeadlineExceeded { .. } => Err(RpcError::DeadlineExceeded),
            Self::Internal { detail } => Err(RpcError::Internal(detail)),
            Self::MalformedRequest { detail } => Err(RpcError::Protocol(detail)),
        }
    }
}

impl From<ExtractionOutcome> for ExtractResponse {
    fn from(outcome: ExtractionOutcome) -> Self {
        match outcome {
            ExtractionOutcome::Accepted(record) => Self::Ok { record },
            ExtractionOutcome::Rejected(Rejection {
                kind: RejectionKind::DuplicateKey,
                detail,
            }) => Self::AlreadyExists { key: detail },
            ExtractionOutcome::Rejected(Rejection { kind, detail }) => {
                Self::InvalidArgument { kind, detail }
            }
        }
    }
}
