//! Run report and output store statistics
//!
//! [`RunReport`] is the tally a harvest run produces: every candidate URL
//! lands in exactly one of accepted, rejected (by kind), or skipped (by
//! reason). [`StoreStatistics`] summarizes what is on disk for `--stats`.

use crate::extract::{Availability, RejectionKind};
use crate::output::json_store::JsonOutputStore;
use crate::output::OutputResult;
use crate::state::{ItemOutcome, SkipReason};
use crate::storage::{open_ledger, Ledger};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Counters for one harvest run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub config_hash: Option<String>,

    /// Unique candidate URLs yielded by discovery
    pub discovered: usize,
    pub listing_pages: usize,
    pub listing_failures: usize,

    /// Candidates whose document body was retrieved
    pub fetched: usize,
    pub accepted: usize,
    pub rejected: HashMap<RejectionKind, usize>,
    pub skipped: HashMap<SkipReason, usize>,

    /// Accepted records the collector dropped because the output store
    /// already held their key
    pub collector_duplicates: usize,

    /// Records in the output store after the run
    pub records_written: usize,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            config_hash: None,
            discovered: 0,
            listing_pages: 0,
            listing_failures: 0,
            fetched: 0,
            accepted: 0,
            rejected: HashMap::new(),
            skipped: HashMap::new(),
            collector_duplicates: 0,
            records_written: 0,
        }
    }

    /// Counts one item's terminal outcome
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Accepted => self.accepted += 1,
            ItemOutcome::Rejected(kind) => *self.rejected.entry(kind).or_insert(0) += 1,
            ItemOutcome::Skipped(reason) => *self.skipped.entry(reason).or_insert(0) += 1,
        }
    }

    pub fn rejected_count(&self, kind: RejectionKind) -> usize {
        self.rejected.get(&kind).copied().unwrap_or(0)
    }

    pub fn skipped_count(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    pub fn total_rejected(&self) -> usize {
        self.rejected.values().sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.skipped.values().sum()
    }

    /// Items that reached a terminal outcome
    pub fn total_items(&self) -> usize {
        self.accepted + self.total_rejected() + self.total_skipped()
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_seconds())
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Prints a run report to stdout in a formatted manner
pub fn print_report(report: &RunReport) {
    println!("=== Harvest Report ===\n");

    println!("Run:");
    println!("  Status: {}", report.status.as_str());
    println!("  Started: {}", report.started_at.to_rfc3339());
    if let Some(seconds) = report.duration_seconds() {
        println!("  Duration: {}s", seconds);
    }
    println!();

    println!("Discovery:");
    println!("  Listing pages: {}", report.listing_pages);
    println!("  Listing failures: {}", report.listing_failures);
    println!("  Discovered: {}", report.discovered);
    println!();

    println!("Items:");
    println!("  Fetched: {}", report.fetched);
    println!("  Accepted: {}", report.accepted);
    println!("  Rejected: {}", report.total_rejected());
    for kind in RejectionKind::all_kinds() {
        let count = report.rejected_count(kind);
        if count > 0 {
            println!("    {}: {}", kind, count);
        }
    }
    println!("  Skipped: {}", report.total_skipped());
    for reason in SkipReason::all_reasons() {
        let count = report.skipped_count(reason);
        if count > 0 {
            println!("    {}: {}", reason, count);
        }
    }
    println!();

    println!("Output:");
    println!("  Collector duplicates: {}", report.collector_duplicates);
    println!("  Records in store: {}", report.records_written);
}

/// Summary of the output store and ledger on disk
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStatistics {
    pub records: usize,
    pub in_stock: usize,
    pub out_of_stock: usize,
    pub other_availability: usize,
    pub total_price_excl_tax: Decimal,

    /// `None` when no ledger file exists yet
    pub ledger_keys: Option<usize>,

    /// Keys in the output store that the ledger does not know about
    pub unledgered_records: Option<usize>,
}

/// Loads statistics from the output store and ledger
pub fn load_statistics(store: &JsonOutputStore, ledger_path: &Path) -> OutputResult<StoreStatistics> {
    let records = store.load()?;

    let mut stats = StoreStatistics {
        records: records.len(),
        in_stock: 0,
        out_of_stock: 0,
        other_availability: 0,
        total_price_excl_tax: Decimal::ZERO,
        ledger_keys: None,
        unledgered_records: None,
    };

    for record in &records {
        match record.availability {
            Availability::InStock { .. } => stats.in_stock += 1,
            Availability::OutOfStock => stats.out_of_stock += 1,
            Availability::Other(_) => stats.other_availability += 1,
        }
        stats.total_price_excl_tax += record.price_excl_tax;
    }

    if ledger_path.exists() {
        let ledger = open_ledger(ledger_path)?;
        stats.ledger_keys = Some(ledger.len());
        stats.unledgered_records = Some(
            records
                .iter()
                .filter(|r| !ledger.contains(&r.upc))
                .count(),
        );
    }

    Ok(stats)
}

/// Prints store statistics to stdout in a formatted manner
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Output Store Statistics ===\n");

    println!("Records: {}", stats.records);
    println!("  In stock: {}", stats.in_stock);
    println!("  Out of stock: {}", stats.out_of_stock);
    println!("  Other: {}", stats.other_availability);
    println!("Total price (excl. tax): {}", stats.total_price_excl_tax);
    println!();

    match stats.ledger_keys {
        Some(keys) => {
            println!("Ledger keys: {}", keys);
            if let Some(missing) = stats.unledgered_records.filter(|m| *m > 0) {
                println!(
                    "  {} output record(s) not in the ledger; they will be reconciled on the next run",
                    missing
                );
            }
        }
        None => println!("Ledger: not created yet"),
    }
}
