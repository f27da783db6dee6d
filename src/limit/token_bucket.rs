//! Token bucket with lazy refill
//!
//! The bucket holds up to `capacity` bytes of credit and refills at `rate`
//! bytes per second. Refill is computed from elapsed monotonic time at
//! consumption time; there is no background tick. A rate of zero disables
//! the bucket entirely (unlimited), which is how "no limit configured" is
//! expressed throughout the gateway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Lazily refilled token bucket
///
/// Capacity and rate are adjustable at runtime (rule pushes, RADIUS-supplied
/// client limits); fill-level state is guarded by a short mutex so
/// concurrent consumers never observe torn updates.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum fill level in bytes
    capacity: AtomicU64,
    /// Refill rate in bytes per second; 0 means unlimited
    rate: AtomicU64,
    /// Fill level and refill stamp
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    fill: u64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket, initially full
    #[must_use]
    pub fn new(capacity: u64, rate: u64) -> Self {
        Self::new_at(capacity, rate, Instant::now())
    }

    /// Create a bucket with an explicit creation instant (test clock)
    #[must_use]
    pub fn new_at(capacity: u64, rate: u64, now: Instant) -> Self {
        Self {
            capacity: AtomicU64::new(capacity),
            rate: AtomicU64::new(rate),
            state: Mutex::new(BucketState {
                fill: capacity,
                last_refill: now,
            }),
        }
    }

    /// Whether this bucket imposes any limit at all
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.rate.load(Ordering::Relaxed) == 0
    }

    /// Configured capacity in bytes
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Configured rate in bytes per second
    #[must_use]
    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    /// Replace capacity and rate, clamping the current fill to the new
    /// capacity. Used when RADIUS or a rule push changes a client's limit.
    pub fn set_limit(&self, capacity: u64, rate: u64) {
        self.capacity.store(capacity, Ordering::Relaxed);
        self.rate.store(rate, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.fill = state.fill.min(capacity);
    }

    /// Try to consume `size` bytes using the monotonic clock
    pub fn try_consume(&self, size: u64) -> bool {
        self.try_consume_at(size, Instant::now())
    }

    /// Try to consume `size` bytes at the given instant
    ///
    /// Refills from elapsed time first, then consumes if the fill covers
    /// the request. Returns `false` without charging anything otherwise.
    pub fn try_consume_at(&self, size: u64, now: Instant) -> bool {
        if self.is_unlimited() {
            return true;
        }

        let capacity = self.capacity.load(Ordering::Relaxed);
        let rate = self.rate.load(Ordering::Relaxed);

        let mut state = self.state.lock();
        Self::refill(&mut state, capacity, rate, now);

        if state.fill >= size {
            state.fill -= size;
            true
        } else {
            false
        }
    }

    /// Return previously consumed bytes, capped at capacity
    ///
    /// A packet denied at a later limiting scope refunds the charge made at
    /// an earlier scope so the denial leaves every bucket untouched.
    pub fn refund(&self, size: u64) {
        if self.is_unlimited() {
            return;
        }
        let capacity = self.capacity.load(Ordering::Relaxed);
        let mut state = self.state.lock();
        state.fill = (state.fill + size).min(capacity);
    }

    /// Current fill level after refilling to `now` (primarily for tests
    /// and status display)
    pub fn fill_at(&self, now: Instant) -> u64 {
        if self.is_unlimited() {
            return self.capacity.load(Ordering::Relaxed);
        }
        let capacity = self.capacity.load(Ordering::Relaxed);
        let rate = self.rate.load(Ordering::Relaxed);
        let mut state = self.state.lock();
        Self::refill(&mut state, capacity, rate, now);
        state.fill
    }

    fn refill(state: &mut BucketState, capacity: u64, rate: u64, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let add = elapsed.as_nanos() * u128::from(rate) / NANOS_PER_SEC;
        let add = u64::try_from(add).unwrap_or(u64::MAX);
        state.fill = state.fill.saturating_add(add).min(capacity);
        state.last_refill = now;
    }
}
