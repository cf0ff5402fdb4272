use chrono::{DateTime, Utc};

/// Текущее Unix-время в миллисекундах.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Unix ms → UTC datetime. `None` for values chrono cannot represent.
pub fn datetime_from_ms(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}
