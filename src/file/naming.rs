use url::Url;

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL",
    "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8", "COM9",
    "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Name used when a URL has no usable last path segment
pub const FALLBACK_FILENAME: &str = "download";

pub fn sanitize_filename(name: &str) -> String {
    let mut result: String = name
        .chars()
        .map(|c| {
            if INVALID_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Check for reserved names
    let upper = result.to_uppercase();
    let base = upper.split('.').next().unwrap_or("");
    if RESERVED_NAMES.contains(&base) {
        result = format!("_{}", result);
    }

    // Remove trailing spaces and dots
    result = result.trim_end_matches([' ', '.']).to_string();

    if result.is_empty() {
        result = "_".to_string();
    }

    result
}

/// Last path component of a URL, percent-decoded, without query or fragment.
///
/// Falls back to [`FALLBACK_FILENAME`] for URLs like `https://host/`.
pub fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(percent_decode)
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

/// Filename from a `Content-Disposition` header value, if present
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
