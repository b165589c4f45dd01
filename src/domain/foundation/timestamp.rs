//! Timestamp value object for immutable points in time.
//!
//! This type never reads the wall clock. The current instant comes from
//! the injected [`Clock`](crate::ports::Clock).

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: i64 = 86_400;

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Creates a timestamp from Unix seconds.
    ///
    /// Returns `None` for values chrono cannot represent.
    pub fn from_unix_secs(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(Self)
    }

    /// Parses an RFC 3339 string such as `2024-01-01T00:00:00Z`.
    pub fn parse_rfc3339(value: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc)))
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Returns the timestamp as Unix seconds.
    pub fn as_unix_secs(&self) -> i64 {
        self.0.timestamp()
    }

    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Returns the duration from another timestamp to this one.
    ///
    /// Returns negative duration if other is after self.
    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        self.0.signed_duration_since(other.0)
    }

    /// Creates a new timestamp by adding the specified number of days.
    ///
    /// Negative values subtract days.
    pub fn add_days(&self, days: i64) -> Self {
        Self(self.0 + Duration::days(days))
    }

    /// Like [`add_days`](Self::add_days), but `None` when the result is out of range.
    pub fn checked_add_days(&self, days: i64) -> Option<Self> {
        let delta = Duration::try_days(days)?;
        self.0.checked_add_signed(delta).map(Self)
    }

    /// Creates a new timestamp by adding the specified number of seconds.
    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0 + Duration::seconds(secs))
    }

    /// Whole days from `from` until this instant, rounded up.
    ///
    /// Zero or negative when this instant is not after `from`.
    pub fn days_until_ceil(&self, from: &Timestamp) -> i64 {
        let secs = self.duration_since(from).num_seconds();
        if secs <= 0 {
            secs / SECONDS_PER_DAY
        } else {
            (secs + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn ts(value: &str) -> Timestamp {
        Timestamp::parse_rfc3339(value).unwrap()
    }

    #[test]
    fn timestamp_from_unix_secs_works() {
        // 2024-01-15T00:00:00Z
        let ts = Timestamp::from_unix_secs(1705276800).unwrap();
        assert_eq!(ts.as_datetime().year(), 2024);
        assert_eq!(ts.as_datetime().month(), 1);
        assert_eq!(ts.as_datetime().day(), 15);
    }

    #[test]
    fn timestamp_from_unix_secs_rejects_out_of_range() {
        assert!(Timestamp::from_unix_secs(i64::MAX).is_none());
    }

    #[test]
    fn checked_add_days_reports_overflow() {
        let start = ts("2024-01-01T00:00:00Z");
        assert_eq!(start.checked_add_days(31), Some(ts("2024-02-01T00:00:00Z")));
        assert_eq!(start.checked_add_days(i64::from(u32::MAX)), None);
        assert_eq!(start.checked_add_days(i64::MIN), None);
    }

    #[test]
    fn timestamp_as_unix_secs_roundtrips() {
        let ts = Timestamp::from_unix_secs(1705276800).unwrap();
        assert_eq!(ts.as_unix_secs(), 1705276800);
    }

    #[test]
    fn timestamp_ordering_works() {
        let earlier = ts("2024-01-01T00:00:00Z");
        let later = ts("2024-01-02T00:00:00Z");

        assert!(earlier < later);
        assert!(earlier.is_before(&later));
        assert!(later.is_after(&earlier));
    }

    #[test]
    fn timestamp_add_days_accepts_negative_values() {
        let base = ts("2024-01-10T00:00:00Z");
        assert_eq!(base.add_days(3), ts("2024-01-13T00:00:00Z"));
        assert_eq!(base.add_days(-3), ts("2024-01-07T00:00:00Z"));
    }

    #[test]
    fn days_until_ceil_rounds_partial_days_up() {
        let now = ts("2024-01-01T12:00:00Z");
        assert_eq!(ts("2024-01-02T00:00:00Z").days_until_ceil(&now), 1);
        assert_eq!(ts("2024-01-03T12:00:00Z").days_until_ceil(&now), 2);
        assert_eq!(now.days_until_ceil(&now), 0);
        assert_eq!(ts("2023-12-30T12:00:00Z").days_until_ceil(&now), -2);
    }

    #[test]
    fn timestamp_serializes_to_json() {
        let json = serde_json::to_string(&ts("2024-01-15T10:30:00Z")).unwrap();
        assert!(json.contains("2024-01-15"));
    }

    #[test]
    fn timestamp_deserializes_from_json() {
        let ts: Timestamp = serde_json::from_str("\"2024-01-15T10:30:00Z\"").unwrap();
        assert_eq!(ts.as_datetime().year(), 2024);
    }
}
