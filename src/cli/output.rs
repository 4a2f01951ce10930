use crate::download::events::DownloadEvent;
use crate::download::record::DownloadRecord;

/// Format a single download record for display
pub fn format_record(record: &DownloadRecord) -> String {
    let mut output = format!("{} -> {}", record.remote_url(), record.destination().display());
    if record.retry_count() > 0 {
        output.push_str(&format!(" (retry {})", record.retry_count()));
    }
    output
}

/// Format multiple downloads for display (human or JSON)
pub fn format_records(records: &[DownloadRecord], json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(records).unwrap_or_else(|_| "[]".to_string());
    }

    if records.is_empty() {
        return "No active downloads.".to_string();
    }

    let mut lines: Vec<_> = records.iter().map(format_record).collect();
    lines.sort();
    lines.join("\n")
}

/// One JSON line per event
pub fn format_event(event: &DownloadEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
}

pub fn format_progress(name: &str, fraction: f32) -> String {
    format!("{}: {:>3.0}%", name, fraction * 100.0)
}
