//! Markdown run report
//!
//! Writes a human-readable summary of a harvest run next to the output
//! store.

use crate::extract::RejectionKind;
use crate::output::stats::RunReport;
use crate::output::OutputResult;
use crate::state::SkipReason;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the markdown report for `report` to `output_path`
pub fn write_markdown_report(report: &RunReport, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_report(report);

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a run report as markdown
pub fn format_markdown_report(report: &RunReport) -> String {
    let mut md = String::new();

    md.push_str("# Catalog Harvest Report\n\n");

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Started**: {}\n", report.started_at.to_rfc3339()));
    if let Some(finished) = report.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished.to_rfc3339()));
    }
    if let Some(duration) = report.duration_seconds() {
        md.push_str(&format!(
            "- **Duration**: {} seconds ({:.2} minutes)\n",
            duration,
            duration as f64 / 60.0
        ));
    }
    md.push_str(&format!("- **Status**: {}\n", report.status.as_str()));
    if let Some(hash) = &report.config_hash {
        md.push_str(&format!("- **Config Hash**: {}\n", hash));
    }
    md.push('\n');

    md.push_str("## Discovery\n\n");
    md.push_str(&format!("- **Listing Pages**: {}\n", report.listing_pages));
    md.push_str(&format!(
        "- **Listing Failures**: {}\n",
        report.listing_failures
    ));
    md.push_str(&format!("- **Discovered URLs**: {}\n\n", report.discovered));

    md.push_str("## Items\n\n");
    md.push_str("| Outcome | Count |\n");
    md.push_str("|---------|-------|\n");
    md.push_str(&format!("| Fetched | {} |\n", report.fetched));
    md.push_str(&format!("| Accepted | {} |\n", report.accepted));
    for kind in RejectionKind::all_kinds() {
        md.push_str(&format!(
            "| Rejected: {} | {} |\n",
            kind,
            report.rejected_count(kind)
        ));
    }
    for reason in SkipReason::all_reasons() {
        md.push_str(&format!(
            "| Skipped: {} | {} |\n",
            reason,
            report.skipped_count(reason)
        ));
    }
    md.push('\n');

    md.push_str("## Output\n\n");
    md.push_str(&format!(
        "- **Collector Duplicates**: {}\n",
        report.collector_duplicates
    ));
    md.push_str(&format!(
        "- **Records in Store**: {}\n",
        report.records_written
    ));

    md
}
