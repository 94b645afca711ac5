/// Terminal outcomes for a single candidate URL
use crate::extract::RejectionKind;
use std::fmt;

/// Why a candidate produced neither a record nor a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The fetch failed in a way retrying cannot fix (e.g. HTTP 404)
    FetchPermanent,

    /// Every fetch attempt failed transiently
    FetchExhausted,

    /// The extraction endpoint could not be reached after retries
    ExtractionUnavailable,

    /// The run was cancelled before the item finished
    Cancelled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchPermanent => "fetch_permanent",
            Self::FetchExhausted => "fetch_exhausted",
            Self::ExtractionUnavailable => "extraction_unavailable",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn all_reasons() -> [Self; 4] {
        [
            Self::FetchPermanent,
            Self::FetchExhausted,
            Self::ExtractionUnavailable,
            Self::Cancelled,
        ]
    }

    /// Returns true if the skip happened before any body was received
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::FetchPermanent | Self::FetchExhausted)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single terminal outcome of one candidate URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemOutcome {
    /// A new record was accepted by the endpoint
    Accepted,

    /// The endpoint made a business decision not to accept the document
    Rejected(RejectionKind),

    /// Neither of the above
    Skipped(SkipReason),
}

impl ItemOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected(kind) => write!(f, "rejected ({})", kind),
            Self::Skipped(reason) => write!(f, "skipped ({})", reason),
        }
    }
}
