//! Run and status summaries.
//!
//! TTY mode prints comfy-table tables to stderr; non-TTY mode logs one
//! line per fact.

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Color, Table};
use inshort_core::{fmt_duration, fmt_num, Outcome, QuotaLimits, QuotaState, QuotaStatus, RunReport};
use inshort_store::ProgressRecord;

fn table(title: &str) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title).fg(Color::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    table
}

/// Binary size with one decimal: `1.5 MiB`
pub fn fmt_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn outcome_cell(outcome: &Outcome) -> Cell {
    let color = match outcome {
        Outcome::Completed => Color::Green,
        Outcome::Interrupted => Color::Yellow,
        Outcome::Failed(_) => Color::Red,
    };
    Cell::new(outcome.label()).fg(color)
}

/// Everything printed when an ingest run ends.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub report: RunReport,
    pub dataset_bytes: Option<u64>,
    pub quota: QuotaStatus,
}

impl RunSummary {
    pub fn format_table(&self) -> String {
        let r = &self.report;
        let rate = r.throughput();
        let mut table = table("Ingest run");
        table.add_row(vec![Cell::new("Outcome"), outcome_cell(&r.outcome)]);
        if let Outcome::Failed(reason) = &r.outcome {
            table.add_row(vec![Cell::new("Reason"), Cell::new(reason).fg(Color::Red)]);
        }
        table.add_row(vec![
            Cell::new("Collected this run").fg(Color::Green),
            Cell::new(fmt_num(r.collected_this_run)).fg(Color::Green),
        ]);
        table.add_row(vec![
            "Total collected".to_string(),
            format!("{} / {}", fmt_num(r.total_collected), fmt_num(r.target)),
        ]);
        table.add_row(vec![
            "Skipped (already processed)".to_string(),
            fmt_num(r.skipped_already_processed),
        ]);
        if r.skipped_unidentified > 0 {
            table.add_row(vec![
                "Skipped (no identifier)".to_string(),
                fmt_num(r.skipped_unidentified),
            ]);
        }
        table.add_row(vec!["Failed items".to_string(), fmt_num(r.failed_items)]);
        table.add_row(vec!["Pages fetched".to_string(), fmt_num(r.pages_fetched)]);
        table.add_row(vec!["Requests made".to_string(), fmt_num(r.requests_made)]);
        table.add_row(vec!["Elapsed".to_string(), fmt_duration(r.elapsed)]);
        table.add_row(vec![
            "Throughput".to_string(),
            format!("{:.1} items/hour", rate.per_hour()),
        ]);
        table.add_row(vec!["Next page offset".to_string(), r.next_page_offset.to_string()]);
        table.add_row(vec![
            "Dataset size".to_string(),
            self.dataset_bytes.map_or_else(|| "-".to_string(), fmt_bytes),
        ]);
        table.add_row(vec![
            "Quota this hour".to_string(),
            format!(
                "{} used, {} left",
                self.quota.made_this_hour, self.quota.remaining_this_hour
            ),
        ]);
        format!("\n{table}")
    }

    pub fn print(&self) {
        eprintln!("{}", self.format_table());
    }

    /// Minimal summary for non-TTY mode.
    pub fn log(&self) {
        let r = &self.report;
        log::info!(
            "Ingest {}: {} new, {} total of {}, {} skipped, {} failed",
            r.outcome.label(),
            fmt_num(r.collected_this_run),
            fmt_num(r.total_collected),
            fmt_num(r.target),
            fmt_num(r.skipped_already_processed),
            fmt_num(r.failed_items)
        );
        log::info!(
            "{} pages, {} requests in {} ({:.1} items/hour)",
            fmt_num(r.pages_fetched),
            fmt_num(r.requests_made),
            fmt_duration(r.elapsed),
            r.throughput().per_hour()
        );
        if let Some(bytes) = self.dataset_bytes {
            log::info!("Dataset: {}", fmt_bytes(bytes));
        }
        log::info!(
            "Quota: {} used this hour, {} left",
            self.quota.made_this_hour,
            self.quota.remaining_this_hour
        );
    }
}

/// Snapshot of the durable files for `inshort status`.
#[derive(Debug, Clone)]
pub struct StatusSummary {
    /// `None` if no progress file exists yet
    pub progress: Option<ProgressRecord>,
    pub dataset_records: Option<usize>,
    pub dataset_bytes: Option<u64>,
    pub quota: Option<QuotaState>,
    pub limits: QuotaLimits,
}

impl StatusSummary {
    pub fn format_table(&self) -> String {
        let mut table = table("Ingest status");
        match &self.progress {
            Some(p) => {
                table.add_row(vec!["Processed".to_string(), fmt_num(p.total_collected)]);
                table.add_row(vec!["Next page offset".to_string(), p.next_page_offset.to_string()]);
                table.add_row(vec![
                    "Last run".to_string(),
                    if p.interrupted { "interrupted" } else { "clean" }.to_string(),
                ]);
                table.add_row(vec![
                    "Session start".to_string(),
                    p.session_start.map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
                ]);
                table.add_row(vec![
                    "Last updated".to_string(),
                    p.last_updated.map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
                ]);
                if let Some(err) = &p.last_error {
                    table.add_row(vec![Cell::new("Last error"), Cell::new(err).fg(Color::Yellow)]);
                }
            }
            None => {
                table.add_row(vec!["Progress".to_string(), "no progress file".to_string()]);
            }
        }
        table.add_row(vec![
            "Dataset records".to_string(),
            self.dataset_records
                .map_or_else(|| "-".to_string(), |n| fmt_num(n as u64)),
        ]);
        table.add_row(vec![
            "Dataset size".to_string(),
            self.dataset_bytes.map_or_else(|| "-".to_string(), fmt_bytes),
        ]);
        let quota = self.quota.clone().unwrap_or_default();
        table.add_row(vec![
            "Requests this hour".to_string(),
            format!("{} / {}", quota.requests_made_this_hour, self.limits.max_per_hour),
        ]);
        table.add_row(vec![
            "Requests this minute".to_string(),
            format!("{} / {}", quota.requests_made_this_minute, self.limits.max_per_minute),
        ]);
        table.add_row(vec![
            "Last request".to_string(),
            quota
                .last_request_at
                .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
        ]);
        format!("\n{table}")
    }
}
