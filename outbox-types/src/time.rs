use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as Unix epoch milliseconds.
///
/// Returns 0 if the system clock is before the epoch.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
