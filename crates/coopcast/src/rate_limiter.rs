//! Minimum-interval publish admission.
//!
//! The last granted admission is a single atomic, so concurrent triggers race
//! on a compare-and-swap rather than a read-then-write. Only granted
//! admissions move the window; denied attempts leave it untouched.
//!
//! The interval is unsigned, so a negative minimum cannot be expressed; config
//! rejects one at parse time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Marker for "nothing admitted yet" in `last_admit_ns`.
const NEVER: u64 = u64::MAX;

/// Admits at most one publish per `min_interval`.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    epoch: Instant,
    /// Nanoseconds after `epoch` of the last granted admission.
    last_admit_ns: AtomicU64,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            epoch: Instant::now(),
            last_admit_ns: AtomicU64::new(NEVER),
        }
    }

    /// Try to take the publish slot at `now`.
    ///
    /// Returns true and records `now` if at least `min_interval` has passed
    /// since the previous granted admission (or none was ever granted).
    /// Of several callers presenting times inside one window, exactly one wins.
    pub fn try_admit(&self, now: Instant) -> bool {
        let now_ns = self.nanos_since_epoch(now);
        let interval_ns = u64::try_from(self.min_interval.as_nanos()).unwrap_or(u64::MAX);

        let mut current = self.last_admit_ns.load(Ordering::Acquire);
        loop {
            if current != NEVER {
                // An older timestamp than the last grant never re-opens the window.
                if now_ns < current || now_ns - current < interval_ns {
                    return false;
                }
            }

            match self.last_admit_ns.compare_exchange_weak(
                current,
                now_ns,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Time since the last granted admission, if any.
    pub fn since_last_admission(&self, now: Instant) -> Option<Duration> {
        let last = self.last_admit_ns.load(Ordering::Acquire);
        if last == NEVER {
            return None;
        }
        Some(Duration::from_nanos(self.nanos_since_epoch(now).saturating_sub(last)))
    }

    fn nanos_since_epoch(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.epoch).as_nanos();
        // Clamp below u64::MAX so a real timestamp never collides with NEVER.
        u64::try_from(elapsed).unwrap_or(NEVER).min(NEVER - 1)
    }
}
