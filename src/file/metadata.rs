use chrono::{DateTime, Utc};
use filetime::{set_file_mtime, FileTime};
use std::path::Path;

/// Parse an HTTP `Last-Modified` value (RFC 7231 / RFC 2822 date)
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Set the file's mtime from a `Last-Modified` header. Unparseable dates are ignored.
///
/// Returns whether the timestamp was applied.
pub fn apply_last_modified(path: &Path, last_modified: Option<&str>) -> std::io::Result<bool> {
    let Some(dt) = last_modified.and_then(parse_http_date) else {
        return Ok(false);
    };
    set_file_mtime(path, FileTime::from_unix_time(dt.timestamp(), 0))?;
    Ok(true)
}
