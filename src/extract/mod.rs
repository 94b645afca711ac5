//! Product page extraction
//!
//! This module turns one product document into a validated [`Record`] or a
//! typed [`Rejection`]. It is pure: nothing here touches the network or the
//! dedup ledger. The stateful wrapper lives in [`crate::endpoint`].

mod normalize;
mod parser;
mod record;

pub use normalize::{canonical_key, collapse_whitespace, parse_price};
pub use parser::extract_record;
pub use record::{Availability, Record};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One document handed to the extraction endpoint
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// Where the body was fetched from (diagnostics only)
    pub source_url: String,

    /// Raw document bytes as received from the transport
    pub body: Vec<u8>,

    /// How long the caller is willing to wait for this call
    pub deadline: Duration,
}

/// Why a document was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Body is not a readable product document
    MalformedDocument,
    /// A required field is absent or empty
    MissingField,
    /// A field is present but cannot be normalized
    InvalidValue,
    /// The natural key was already accepted
    DuplicateKey,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedDocument => "malformed_document",
            Self::MissingField => "missing_field",
            Self::InvalidValue => "invalid_value",
            Self::DuplicateKey => "duplicate_key",
        }
    }

    pub fn all_kinds() -> [Self; 4] {
        [
            Self::MalformedDocument,
            Self::MissingField,
            Self::InvalidValue,
            Self::DuplicateKey,
        ]
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal business decision not to accept a document
///
/// `detail` carries the field name for field-level rejections and the
/// canonical key for [`RejectionKind::DuplicateKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub detail: String,
}

impl Rejection {
    pub fn new(kind: RejectionKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(RejectionKind::MalformedDocument, detail)
    }

    pub fn missing(field: &str) -> Self {
        Self::new(RejectionKind::MissingField, field)
    }

    pub fn invalid(field: &str) -> Self {
        Self::new(RejectionKind::InvalidValue, field)
    }

    pub fn duplicate(key: &str) -> Self {
        Self::new(RejectionKind::DuplicateKey, key)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// Result of extracting one document
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Accepted(Record),
    Rejected(Rejection),
}

impl ExtractionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn rejection_kind(&self) -> Option<RejectionKind> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected(rejection) => Some(rejection.kind),
        }
    }
}
