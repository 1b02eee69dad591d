use chrono::{DateTime, Utc};

/// Wall-clock time in Unix epoch milliseconds.
///
/// Lease expirations are compared against this clock, so they are expressed
/// in the same unit the storage nodes use for TTLs.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_datetime(epoch_millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(epoch_millis)
}
