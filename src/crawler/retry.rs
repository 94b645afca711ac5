//! Retry policy with exponential backoff and jitter
//!
//! Shared by the fetcher pool (per URL) and the dispatcher (per extraction
//! call). A failure is first classified into a [`FailureType`]; the
//! [`RetryPolicy`] then decides whether another attempt is worth making and
//! how long to wait before it.

use rand::Rng;
use std::time::Duration;
use tracing::debug;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Jitter is drawn from `0..=delay / JITTER_DIVISOR`
const JITTER_DIVISOR: u64 = 4;

/// Classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Timeout, connection failure, 5xx
    Transient,
    /// 4xx, malformed URL
    Permanent,
}

/// Whether to make another attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        /// 1-indexed number of the attempt about to be made
        attempt: u32,
    },
    DoNotRetry {
        reason: String,
    },
}

/// Bounded exponential backoff
///
/// ```text
/// delay(n) = min(base * 2^(n-1), max) + jitter,  jitter <= delay / 4
/// ```
///
/// The result never exceeds `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to at least 1
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// A policy that retries immediately, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what to do after attempt number `attempt` (1-indexed) failed
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.delay_for(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Backoff to wait after attempt number `attempt` failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as u64;

        let raw_ms = (base_ms * BACKOFF_MULTIPLIER.powi(exponent)).min(max_ms as f64) as u64;

        let jitter_ms = match raw_ms / JITTER_DIVISOR {
            0 => 0,
            bound => rand::thread_rng().gen_range(0..=bound),
        };

        Duration::from_millis((raw_ms + jitter_ms).min(max_ms))
    }
}

/// Classifies an HTTP status code
///
/// | Status | Type      |
/// |--------|-----------|
/// | 4xx    | Permanent |
/// | 5xx    | Transient |
/// | other  | Permanent |
///
/// Callers only classify non-success statuses.
pub fn classify_http_status(status: u16) -> FailureType {
    match status {
        500..=599 => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}
