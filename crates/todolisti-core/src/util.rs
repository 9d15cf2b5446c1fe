//! Shared utility functions used across multiple modules.

use chrono::{DateTime, TimeZone, Utc};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Normalize an email address for comparisons (trimmed, lowercase).
pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current time truncated to millisecond precision, matching what the store keeps.
pub fn now() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

/// Convert a stored Unix-millisecond column into a UTC timestamp.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

/// Convert an optional stored Unix-millisecond column.
pub fn from_millis_opt(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.map(from_millis)
}

/// Unix milliseconds for storage.
pub fn to_millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}
