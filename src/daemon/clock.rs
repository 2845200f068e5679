//! Monotonic wall clock for operation timestamps.
//!
//! Operation timestamps and `modified_at` maintenance need millisecond wall
//! time that never moves backward, even when the system clock does.

use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond wall clock with a monotonicity floor.
///
/// `now_ms` returns the system time, but never less than the last value it
/// returned, so the timestamp of the highest-versioned operation is always
/// the highest timestamp in the log.
pub struct Clock {
    last_ms: i64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            last_ms: system_now_ms(),
        }
    }

    /// Current wall time in milliseconds, clamped to be non-decreasing.
    pub fn now_ms(&mut self) -> i64 {
        let now = system_now_ms();
        if now > self.last_ms {
            self.last_ms = now;
        }
        self.last_ms
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

fn system_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
