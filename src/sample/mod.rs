mod adapter;
mod error;

pub use adapter::parse_payload;
pub use error::ParseError;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

const CAPTURED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DAY_FORMAT: &str = "%Y-%m-%d";

/// UTC calendar day a sample belongs to. Used for grouping and retention.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
#[schema(value_type = String, format = Date, example = "2026-10-19")]
pub struct DayBucket(NaiveDate);

impl DayBucket {
    pub fn from_datetime(instant: DateTime<Utc>) -> Self {
        DayBucket(instant.date_naive())
    }

    pub fn today() -> Self {
        Self::from_datetime(Utc::now())
    }

    #[cfg(test)]
    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Days since 0001-01-01 (day 1). Orders the same as the date itself.
    pub fn day_number(&self) -> i32 {
        self.0.num_days_from_ce()
    }

    pub fn from_day_number(number: i32) -> Option<Self> {
        NaiveDate::from_num_days_from_ce_opt(number).map(DayBucket)
    }

    pub fn days_before(&self, days: u32) -> Self {
        DayBucket(self.0 - Duration::days(i64::from(days)))
    }

    /// Whole days from `earlier` to `self`; negative when `earlier` is later.
    pub fn days_since(&self, earlier: DayBucket) -> i64 {
        (self.0 - earlier.0).num_days()
    }
}

impl From<NaiveDate> for DayBucket {
    fn from(date: NaiveDate) -> Self {
        DayBucket(date)
    }
}

impl fmt::Display for DayBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DAY_FORMAT))
    }
}

impl FromStr for DayBucket {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), DAY_FORMAT).map(DayBucket)
    }
}

/// One normalized position observation.
///
/// Build through [`Sample::new`] so `captured_at` and `day` are always derived
/// from the same instant as `captured_at_unix`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Sample {
    pub captured_at_unix: i64,
    #[schema(example = "2026-10-19 14:03:12")]
    pub captured_at: String,
    pub day: DayBucket,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub velocity: Option<f64>,
}

impl Sample {
    pub fn new(
        captured_at: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        altitude: Option<f64>,
        velocity: Option<f64>,
    ) -> Self {
        Sample {
            captured_at_unix: captured_at.timestamp(),
            captured_at: captured_at.format(CAPTURED_AT_FORMAT).to_string(),
            day: DayBucket::from_datetime(captured_at),
            latitude,
            longitude,
            altitude,
            velocity,
        }
    }

    #[cfg(test)]
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.captured_at_unix, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn derives_text_and_day_from_the_same_instant() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 23, 59, 59).unwrap();
        let sample = Sample::new(at, 10.0, 20.0, Some(420.0), None);

        assert_eq!(sample.captured_at_unix, at.timestamp());
        assert_eq!(sample.captured_at, "2026-10-19 23:59:59");
        assert_eq!(sample.day.to_string(), "2026-10-19");
        assert_eq!(sample.instant(), Some(at));
    }

    #[test]
    fn midnight_starts_a_new_bucket() {
        let before = Utc.with_ymd_and_hms(2026, 10, 19, 23, 59, 59).unwrap();
        let after = before + Duration::seconds(1);

        let a = DayBucket::from_datetime(before);
        let b = DayBucket::from_datetime(after);
        assert!(a < b);
        assert_eq!(b.days_since(a), 1);
        assert_eq!(b.days_before(1), a);
    }

    #[test]
    fn day_numbers_order_like_dates() {
        let early: DayBucket = "1970-01-01".parse().unwrap();
        let late = DayBucket::from(NaiveDate::from_ymd_opt(57_769, 11, 30).unwrap());

        assert!(early.day_number() < late.day_number());
        assert_eq!(DayBucket::from_day_number(early.day_number()), Some(early));
        assert_eq!(DayBucket::from_day_number(late.day_number()), Some(late));
        assert_eq!(DayBucket::from_day_number(i32::MAX), None);
    }

    #[test]
    fn parses_and_rejects_day_text() {
        let day: DayBucket = "2026-01-05".parse().unwrap();
        assert_eq!(day.to_string(), "2026-01-05");
        assert!("Day 3".parse::<DayBucket>().is_err());
        assert!("2026-13-01".parse::<DayBucket>().is_err());
    }

    #[test]
    fn day_bucket_serializes_as_plain_date() {
        let day: DayBucket = "2026-02-28".parse().unwrap();
        assert_eq!(serde_json::to_string(&day).unwrap(), "\"2026-02-28\"");
        let back: DayBucket = serde_json::from_str("\"2026-02-28\"").unwrap();
        assert_eq!(back, day);
    }
}
