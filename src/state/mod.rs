//! Per-item outcome tracking
//!
//! Every candidate URL the dispatcher admits ends in exactly one
//! [`ItemOutcome`]. The run report is a tally of these outcomes.

mod item_state;

pub use item_state::{ItemOutcome, SkipReason};
