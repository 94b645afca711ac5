//! Accepted-record collector
//!
//! The collector is the output-side dedup layer. The endpoint's ledger is the
//! primary authority on whether a key is new; the collector is the backstop
//! for when the ledger has lost state (fresh ledger file, restarted
//! endpoint) and re-accepts a key the output store already holds.

use crate::extract::Record;
use std::collections::HashSet;
use tracing::debug;

/// Ordered, key-unique collection of records
#[derive(Debug, Default)]
pub struct Collector {
    records: Vec<Record>,
    keys: HashSet<String>,
    seeded: usize,
    duplicates: usize,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the records already in the output store
    ///
    /// Records with a key seen earlier in `existing` are dropped.
    pub fn seeded(existing: Vec<Record>) -> Self {
        let mut collector = Self::new();
        for record in existing {
            collector.accept(record);
        }
        collector.seeded = collector.records.len();
        collector.duplicates = 0;
        collector
    }

    /// Appends a record unless its key is already present
    ///
    /// Returns false (and counts a duplicate) when the record was dropped.
    pub fn accept(&mut self, record: Record) -> bool {
        if !self.keys.insert(record.upc.clone()) {
            self.duplicates += 1;
            debug!(key = %record.upc, "collector dropped duplicate record");
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Total records, seeded ones included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records added since the collector was seeded
    pub fn new_records(&self) -> usize {
        self.records.len() - self.seeded
    }

    /// Records dropped by [`Collector::accept`] as duplicates
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.upc.as_str())
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}
