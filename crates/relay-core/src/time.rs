//! Timestamp helpers.

use chrono::{SecondsFormat, Utc};

/// Current UTC time as ISO-8601 with millisecond precision and a `Z` suffix,
/// e.g. `2026-10-15T08:30:00.123Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_has_millis_and_zulu() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2026-10-15T08:30:00.123Z".len());
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
