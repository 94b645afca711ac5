//! Storage module for the dedup ledger
//!
//! The ledger is the extraction endpoint's durable record of every natural
//! key it has accepted. It is backed by SQLite so the key set survives
//! restarts of the endpoint, and it is loaded eagerly into memory before the
//! first request is served.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteLedger;
pub use traits::{Ledger, StorageError, StorageResult};

use std::path::Path;

/// Opens (or creates) the ledger at `path`
pub fn open_ledger(path: &Path) -> StorageResult<SqliteLedger> {
    SqliteLedger::open(path)
}
