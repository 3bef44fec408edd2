//! Monotonic millisecond clock for stamping change batches.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Hands out strictly increasing Unix-millisecond timestamps.
///
/// Follows wall time while it moves forward; otherwise steps one millisecond
/// past the last value handed out or observed.
#[derive(Debug, Default)]
pub(crate) struct Clock {
    last: AtomicI64,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Never hand out a timestamp at or below `ts`.
    pub(crate) fn observe(&self, ts: i64) {
        self.last.fetch_max(ts, Ordering::SeqCst);
    }

    pub(crate) fn next(&self) -> i64 {
        let now = now_millis();
        let prev = match self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            }) {
            Ok(prev) | Err(prev) => prev,
        };
        now.max(prev + 1)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
