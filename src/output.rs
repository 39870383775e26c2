//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Batch progress
//!
//! One line per poll while a run is active, then a summary:
//!
//! ```text
//! Started: 120 files (3 already done)
//! [  17/120]  14%  /photos/2019/IMG_0412.jpg
//! [ 120/120] 100%
//! Completed in 42.1s
//!     Processed: 120
//!     Succeeded: 115
//!     Skipped:   3
//!     Failed:    2
//!     Size:      1.2 GB → 640.5 MB (saved 591.5 MB)
//!     Failed files:
//!         /photos/2019/broken.heic
//! ```
//!
//! ## Format statistics
//!
//! ```text
//! jpg           812    1.1 GB
//! png            40  300.2 MB
//! no_extension    2      12 B
//! Total         854    1.4 GB
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>` or `String`)
//! for testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::engine::Started;
use crate::inventory::{Entry, EntryKind, FormatStats, Listing};
use crate::ledger::ProgressSnapshot;
use crate::transform::ToolAvailability;

// ============================================================================
// Shared helpers
// ============================================================================

/// Human-readable byte count with binary units.
///
/// ```text
/// 512        → 512 B
/// 1536       → 1.5 KB
/// 1073741824 → 1.0 GB
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn percent(processed: usize, total: usize) -> usize {
    if total == 0 {
        100
    } else {
        processed * 100 / total
    }
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}

// ============================================================================
// Batch runs
// ============================================================================

pub fn format_started(started: &Started) -> String {
    if started.excluded == 0 {
        format!("Started: {} files", started.total)
    } else {
        format!(
            "Started: {} files ({} already done)",
            started.total, started.excluded
        )
    }
}

/// One progress line. The current file is omitted once nothing is in flight.
pub fn format_progress_line(snapshot: &ProgressSnapshot) -> String {
    let width = snapshot.total.to_string().len();
    let counter = format!(
        "[{:>width$}/{}] {:>3}%",
        snapshot.processed,
        snapshot.total,
        percent(snapshot.processed, snapshot.total),
    );
    if snapshot.current_file.is_empty() {
        counter
    } else {
        format!("{counter}  {}", snapshot.current_file)
    }
}

/// Summary of a completed run.
pub fn format_summary(snapshot: &ProgressSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    match (snapshot.start_time, snapshot.end_time) {
        (Some(start), Some(end)) => {
            let secs = (end - start).num_milliseconds() as f64 / 1000.0;
            lines.push(format!("Completed in {secs:.1}s"));
        }
        _ => lines.push("Completed".to_string()),
    }
    lines.push(format!("    Processed: {}", snapshot.processed));
    lines.push(format!("    Succeeded: {}", snapshot.succeeded()));
    lines.push(format!("    Skipped:   {}", snapshot.skipped_files.len()));
    lines.push(format!("    Failed:    {}", snapshot.failed_files.len()));

    let saved = snapshot.saved_bytes();
    let delta = if saved >= 0 {
        format!("saved {}", format_bytes(saved as u64))
    } else {
        format!("grew {}", format_bytes(saved.unsigned_abs()))
    };
    lines.push(format!(
        "    Size:      {} → {} ({delta})",
        format_bytes(snapshot.original_size),
        format_bytes(snapshot.final_size),
    ));

    if !snapshot.failed_files.is_empty() {
        lines.push("    Failed files:".to_string());
        for path in &snapshot.failed_files {
            lines.push(format!("        {}", path.display()));
        }
    }
    lines
}

pub fn print_summary(snapshot: &ProgressSnapshot) {
    print_lines(&format_summary(snapshot));
}

// ============================================================================
// Inventory
// ============================================================================

pub fn format_format_stats(stats: &FormatStats) -> Vec<String> {
    let name_width = stats
        .formats
        .keys()
        .map(String::len)
        .chain(std::iter::once("Total".len()))
        .max()
        .unwrap_or(0);
    let mut lines: Vec<String> = stats
        .formats
        .iter()
        .map(|(ext, count)| {
            format!(
                "{ext:<name_width$}  {:>6}  {:>9}",
                count.count,
                format_bytes(count.size)
            )
        })
        .collect();
    lines.push(format!(
        "{:<name_width$}  {:>6}  {:>9}",
        "Total",
        stats.total_files,
        format_bytes(stats.total_size)
    ));
    lines
}

pub fn print_format_stats(stats: &FormatStats) {
    print_lines(&format_format_stats(stats));
}

fn entry_line(entry: &Entry, show_path: bool) -> String {
    let label = if show_path {
        entry.path.display().to_string()
    } else {
        entry.name.clone()
    };
    match entry.kind {
        EntryKind::Dir => format!("{label}/"),
        EntryKind::File => format!("{label}  ({})", format_bytes(entry.size)),
    }
}

pub fn format_listing(listing: &Listing) -> Vec<String> {
    let mut lines = vec![listing.current_path.display().to_string()];
    lines.extend(
        listing
            .entries
            .iter()
            .map(|entry| format!("    {}", entry_line(entry, false))),
    );
    lines
}

pub fn print_listing(listing: &Listing) {
    print_lines(&format_listing(listing));
}

pub fn format_search_results(results: &[Entry]) -> Vec<String> {
    if results.is_empty() {
        return vec!["No matches".to_string()];
    }
    results.iter().map(|entry| entry_line(entry, true)).collect()
}

pub fn print_search_results(results: &[Entry]) {
    print_lines(&format_search_results(results));
}

// ============================================================================
// Tools
// ============================================================================

/// Tool availability followed by the formats that can be written.
pub fn format_tools(availability: &ToolAvailability, writable: &[String]) -> Vec<String> {
    let mut lines = vec!["Tools".to_string()];
    for (tool, found) in availability.iter() {
        let status = if found { "found" } else { "missing" };
        lines.push(format!("    {tool:<10} {status}"));
    }
    lines.push("Writable formats".to_string());
    if writable.is_empty() {
        lines.push("    (none)".to_string());
    } else {
        lines.push(format!("    {}", writable.join(", ")));
    }
    lines
}

pub fn print_tools(availability: &ToolAvailability, writable: &[String]) {
    print_lines(&format_tools(availability, writable));
}

// ============================================================================
// Tests
// ============================================================================
