//! DateTime utilities.
//!
//! The job store and the connectors exchange times as milliseconds since the
//! Unix epoch; these helpers convert at the edges.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Current time in milliseconds since the epoch.
///
/// # Examples
///
/// ```
/// use crawler_common::datetime::now_millis;
///
/// assert!(now_millis() > 0);
/// ```
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds to a UTC DateTime, if representable.
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Time remaining until `target_millis`, or `None` if it has already passed.
pub fn until_millis(target_millis: i64, now_millis: i64) -> Option<Duration> {
    let remaining = target_millis - now_millis;
    if remaining > 0 {
        Some(Duration::from_millis(remaining as u64))
    } else {
        None
    }
}

/// Format epoch milliseconds for log output.
pub fn format_millis(millis: i64) -> String {
    match from_millis(millis) {
        Some(dt) => dt.to_rfc3339(),
        None => millis.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_until_millis() {
        assert_eq!(until_millis(1_500, 1_000), Some(Duration::from_millis(500)));
        assert_eq!(until_millis(1_000, 1_000), None);
        assert_eq!(until_millis(500, 1_000), None);
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_now_is_after_epoch() {
        let now = now_millis();
        assert!(from_millis(now).is_some());
    }
}
