//! Ledger schema

/// SQL schema for the ledger database
pub const SCHEMA_SQL: &str = r#"
-- Every natural key the extraction endpoint has accepted
CREATE TABLE IF NOT EXISTS accepted_keys (
    natural_key TEXT PRIMARY KEY,
    source_url TEXT NOT NULL,
    accepted_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ledger_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Current schema version, recorded in `ledger_meta`
pub const SCHEMA_VERSION: u32 = 1;

/// Initializes the ledger schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO ledger_meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}
