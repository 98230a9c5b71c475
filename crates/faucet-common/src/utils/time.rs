use chrono::{DateTime, NaiveDate, Utc};

/// Calendar day (UTC) a timestamp falls on; the key of the daily reward pool.
pub fn day_of(timestamp: DateTime<Utc>) -> NaiveDate {
    timestamp.date_naive()
}
