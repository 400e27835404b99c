//! Timestamp helpers for persisted records.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A UTC timestamp.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 string with microseconds.
///
/// # Examples
///
/// ```
/// use lzflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_timestamp(&Utc::now())
}

/// Formats a timestamp the same way [`iso_timestamp`] does.
#[must_use]
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns `now + timeout`, saturating on overflow.
#[must_use]
pub fn deadline_after(timeout: Duration) -> Timestamp {
    let now = Utc::now();
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        let ts = DateTime::parse_from_rfc3339("2024-01-15T10:30:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(&ts), "2024-01-15T10:30:00.123456+00:00");
    }

    #[test]
    fn test_deadline_after_is_in_future() {
        let deadline = deadline_after(Duration::from_secs(60));
        assert!(deadline > now_utc());
    }

    #[test]
    fn test_deadline_after_saturates() {
        let deadline = deadline_after(Duration::from_secs(u64::MAX));
        assert_eq!(deadline, DateTime::<Utc>::MAX_UTC);
    }
}
