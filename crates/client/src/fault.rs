//! Interval-windowed bookie error accounting.
//!
//! Each connection pool owns one [`ErrorCounter`]. Completion paths record
//! errors concurrently; the fault snapshot reads the counter without
//! resetting it.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Count of bookie errors within the current interval.
///
/// The interval number and the count share one `AtomicU64` (high and low 32
/// bits), so rolling into a new interval and incrementing happen in a single
/// compare-and-swap.
#[derive(Debug)]
pub struct ErrorCounter {
    origin: Instant,
    interval: Duration,
    state: AtomicU64,
}

impl ErrorCounter {
    /// Creates a counter with the given window length.
    ///
    /// A zero interval is treated as one millisecond.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self::with_origin(interval, Instant::now())
    }

    fn with_origin(interval: Duration, origin: Instant) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        Self { origin, interval, state: AtomicU64::new(0) }
    }

    /// Records one error now.
    pub fn record_error(&self) {
        self.record_error_at(Instant::now());
    }

    /// Records one error at `now`.
    pub fn record_error_at(&self, now: Instant) {
        let epoch = self.epoch_of(now);
        let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |packed| {
            let (current_epoch, count) = unpack(packed);
            if current_epoch == epoch {
                Some(pack(epoch, count.saturating_add(1)))
            } else {
                Some(pack(epoch, 1))
            }
        });
    }

    /// Errors recorded in the interval containing now.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count_at(Instant::now())
    }

    /// Errors recorded in the interval containing `now`.
    #[must_use]
    pub fn count_at(&self, now: Instant) -> u64 {
        let (epoch, count) = unpack(self.state.load(Ordering::Acquire));
        if epoch == self.epoch_of(now) { u64::from(count) } else { 0 }
    }

    /// Whether the count has reached `threshold`. A threshold of 0 never trips.
    #[must_use]
    pub fn is_faulty(&self, threshold: u64) -> bool {
        threshold > 0 && self.count() >= threshold
    }

    fn epoch_of(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.origin).as_millis();
        let window = self.interval.as_millis().max(1);
        // Truncation wraps after 2^32 intervals.
        (elapsed / window) as u32
    }
}

fn pack(epoch: u32, count: u32) -> u64 {
    (u64::from(epoch) << 32) | u64::from(count)
}

fn unpack(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, packed as u32)
}
