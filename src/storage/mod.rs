use std::time::{SystemTime, UNIX_EPOCH};

pub mod csv;
pub mod hash;
pub mod sink;

/// Local wall clock in milliseconds since the unix epoch.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
