use chrono::{DateTime, Days, NaiveDateTime, Utc};

/// The textual form timestamps are stored in.
pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Query-string form accepted by the vendor's `__gt` filters.
const FILTER_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Converts an ISO-8601 timestamp into the storage form, in UTC.
///
/// Values without an offset are taken to already be UTC.
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc).format(STORAGE_FORMAT).to_string());
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| naive.format(STORAGE_FORMAT).to_string())
}

/// Parses a timestamp read back from the database.
pub fn parse_stored(raw: &str) -> Option<NaiveDateTime> {
    // MySQL renders fractional seconds when the column has them
    let whole_seconds = raw.trim().split('.').next().unwrap_or_default();
    NaiveDateTime::parse_from_str(whole_seconds, STORAGE_FORMAT).ok()
}

/// Lower bound for an incremental fetch: the newest stored value minus an overlap,
/// so records that arrive late or get backfilled are picked up again.
pub fn lookback_filter(latest: NaiveDateTime, overlap_days: u32) -> String {
    latest
        .checked_sub_days(Days::new(overlap_days.into()))
        .unwrap_or(NaiveDateTime::MIN)
        .format(FILTER_FORMAT)
        .to_string()
}
