use capture_core::CaptureStatus;
use colored::{ColoredString, Colorize};
use serde::Serialize;

pub fn header(title: &str) {
    println!("{}", title.bold().underline());
}

pub fn subheader(title: &str) {
    println!("{}", title.bold());
}

pub fn hint(msg: &str) {
    println!("{} {}", "hint:".cyan().bold(), msg.dimmed());
}

pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

pub fn field(name: &str, value: impl std::fmt::Display) {
    println!("  {:<16} {}", format!("{name}:"), value);
}

pub fn json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn status(status: CaptureStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        CaptureStatus::Exported | CaptureStatus::ExportedDuplicate => label.green(),
        CaptureStatus::ExportedPlaceholder => label.yellow(),
        CaptureStatus::Quarantined => label.red(),
        CaptureStatus::Staged | CaptureStatus::Processed => label.cyan()
    }
}

/// Ledger timestamps are Unix milliseconds.
pub fn timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}
