/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Drop the sub-second part of a Unix ms timestamp.
pub fn truncate_to_second(ms: i64) -> i64 {
    ms - ms.rem_euclid(1000)
}

/// Duration → whole milliseconds, saturating at `i64::MAX`.
pub fn duration_ms(d: std::time::Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
