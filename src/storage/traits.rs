//! Ledger trait and error types

use thiserror::Error;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger lock poisoned")]
    Poisoned,
}

/// Result type for ledger operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A set of accepted natural keys that never shrinks
///
/// Callers that share a ledger between tasks must serialize calls to
/// [`Ledger::try_insert`]; the membership check and the insert are one step
/// only from the point of view of a single caller.
pub trait Ledger: Send {
    /// Returns true if `key` has already been accepted
    fn contains(&self, key: &str) -> bool;

    /// Records `key` as accepted
    ///
    /// Returns `Ok(true)` if the key was new and is now durably recorded,
    /// `Ok(false)` if it was already present. Nothing is written when the
    /// key is already present.
    fn try_insert(&mut self, key: &str, source_url: &str) -> StorageResult<bool>;

    /// Number of keys in the ledger
    fn len(&self) -> usize;

    /// Returns true if no key has ever been accepted
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
