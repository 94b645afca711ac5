//! SQLite ledger implementation

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Ledger, StorageResult};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;

/// SQLite-backed ledger with an in-memory key cache
///
/// The cache is filled from the `accepted_keys` table when the ledger is
/// opened, so membership checks never touch the database. Inserts go to the
/// database first and to the cache only once they are committed.
pub struct SqliteLedger {
    conn: Connection,
    keys: HashSet<String>,
}

impl SqliteLedger {
    /// Opens or creates a ledger file and loads every accepted key
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;
        initialize_schema(&conn)?;

        let keys = load_keys(&conn)?;
        Ok(Self { conn, keys })
    }

    /// Creates a ledger that lives only as long as the process
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            keys: HashSet::new(),
        })
    }

    /// Adds keys that are known to be accepted but missing from the ledger
    ///
    /// Used at startup with the keys already present in the output store, so
    /// a lost or stale ledger file is rebuilt from the output. Returns how
    /// many keys were added.
    pub fn reconcile<'a, I>(&mut self, keys: I, source: &str) -> StorageResult<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut added = Vec::new();
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO accepted_keys (natural_key, source_url, accepted_at)
                 VALUES (?1, ?2, ?3)",
            )?;
            for key in keys {
                if self.keys.contains(key) {
                    continue;
                }
                if stmt.execute(params![key, source, now])? > 0 {
                    added.push(key.to_string());
                }
            }
        }
        tx.commit()?;

        let count = added.len();
        self.keys.extend(added);
        Ok(count)
    }

    /// Returns the accepted keys in sorted order
    pub fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.iter().cloned().collect();
        keys.sort();
        keys
    }
}

impl Ledger for SqliteLedger {
    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn try_insert(&mut self, key: &str, source_url: &str) -> StorageResult<bool> {
        if self.keys.contains(key) {
            return Ok(false);
        }

        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO accepted_keys (natural_key, source_url, accepted_at)
             VALUES (?1, ?2, ?3)",
            params![key, source_url, Utc::now().to_rfc3339()],
        )?;

        // Another process sharing the file may have written the key first
        self.keys.insert(key.to_string());
        Ok(changed > 0)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

fn load_keys(conn: &Connection) -> StorageResult<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT natural_key FROM accepted_keys")?;
    let keys = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(keys)
}
