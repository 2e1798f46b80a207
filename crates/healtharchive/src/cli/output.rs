//! Table and JSON output helpers for read commands.

use comfy_table::{Cell, Color, ContentArrangement, Table};

use healtharchive_store::JobStatus;

/// Build a compact table with the house style.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.to_vec());
    table
}

/// Status cell with the conventional color coding.
pub fn status_cell(status: JobStatus) -> Cell {
    Cell::new(status.as_str()).fg(status_color(status))
}

pub fn status_color(status: JobStatus) -> Color {
    match status {
        JobStatus::Queued => Color::Yellow,
        JobStatus::Running => Color::Cyan,
        JobStatus::Completed => Color::Blue,
        JobStatus::Indexed => Color::Green,
        JobStatus::Retryable => Color::Magenta,
        JobStatus::Failed | JobStatus::IndexFailed => Color::Red,
        JobStatus::InfraError | JobStatus::InfraErrorConfig => Color::DarkRed,
    }
}

/// Serialize a value as pretty JSON for `--json` output.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn opt_str(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

pub fn opt_num(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}
