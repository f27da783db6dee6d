//! Upstream uplinks and the peer-to-peer throttle
//!
//! Each upstream carries a per-direction p2p token bucket. Unlike the
//! session and client buckets, exhausting a p2p bucket arms a cooldown
//! window during which p2p traffic on that upstream is denied outright,
//! even though the bucket mathematically refills partway through. This
//! keeps repeated bursty p2p flows from oscillating the bucket at the
//! edge of its capacity.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::limit::{SpeedMeter, TokenBucket};
use crate::packet::{Direction, PerDirection};

/// How long p2p traffic stays denied after its bucket is exhausted
pub const P2P_THROTTLE_WINDOW: Duration = Duration::from_secs(120);

/// A token bucket with a post-exhaustion denial window
#[derive(Debug)]
pub struct ThrottledBucket {
    bucket: TokenBucket,
    window: Duration,
    /// Deny unconditionally until this instant
    throttled_until: Mutex<Option<Instant>>,
}

impl ThrottledBucket {
    /// Create a throttled bucket with an explicit window and clock
    #[must_use]
    pub fn new_at(capacity: u64, rate: u64, window: Duration, now: Instant) -> Self {
        Self {
            bucket: TokenBucket::new_at(capacity, rate, now),
            window,
            throttled_until: Mutex::new(None),
        }
    }

    /// Try to consume `size` bytes at the given instant
    ///
    /// While the throttle window is armed, every request is denied without
    /// consulting the bucket. A bucket denial arms the window.
    pub fn try_consume_at(&self, size: u64, now: Instant) -> bool {
        if self.bucket.is_unlimited() {
            return true;
        }

        {
            let mut throttled = self.throttled_until.lock();
            match *throttled {
                Some(until) if now < until => return false,
                Some(_) => *throttled = None,
                None => {}
            }
        }

        if self.bucket.try_consume_at(size, now) {
            return true;
        }

        *self.throttled_until.lock() = Some(now + self.window);
        false
    }

    /// Whether the denial window is armed at `now`
    #[must_use]
    pub fn is_throttled_at(&self, now: Instant) -> bool {
        matches!(*self.throttled_until.lock(), Some(until) if now < until)
    }

    /// Underlying bucket, for limit updates and status display
    #[must_use]
    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }
}

/// One uplink with its p2p policer
#[derive(Debug)]
pub struct Upstream {
    id: usize,
    p2p: PerDirection<ThrottledBucket>,
    speed: PerDirection<SpeedMeter>,
}

impl Upstream {
    /// Create an upstream with per-direction p2p limits in bytes/second
    ///
    /// The bucket capacity is one second of credit at the configured rate.
    #[must_use]
    pub fn new_at(id: usize, p2p_limit: PerDirection<u64>, now: Instant) -> Self {
        Self {
            id,
            p2p: PerDirection::from_fn(|dir| {
                ThrottledBucket::new_at(p2p_limit[dir], p2p_limit[dir], P2P_THROTTLE_WINDOW, now)
            }),
            speed: PerDirection::from_fn(|_| SpeedMeter::new_at(now)),
        }
    }

    /// Upstream index
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// p2p policer for one direction
    #[must_use]
    pub fn p2p(&self, dir: Direction) -> &ThrottledBucket {
        &self.p2p[dir]
    }

    /// Record forwarded bytes on this upstream
    pub fn record_forward(&self, dir: Direction, bytes: u64, now: Instant) {
        self.speed[dir].update_at(bytes, now);
    }

    /// Speed meter for one direction
    #[must_use]
    pub fn speed(&self, dir: Direction) -> &SpeedMeter {
        &self.speed[dir]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_arms_on_exhaustion() {
        let start = Instant::now();
        let b = ThrottledBucket::new_at(1000, 100, Duration::from_secs(120), start);

        assert!(b.try_consume_at(1000, start));
        assert!(!b.try_consume_at(1, start));
        assert!(b.is_throttled_at(start));
    }

    #[test]
    fn test_throttle_outlasts_refill() {
        // At 100 B/s the bucket is mathematically full again after 10s,
        // but the window holds for the full 120s.
        let start = Instant::now();
        let b = ThrottledBucket::new_at(1000, 100, Duration::from_secs(120), start);

        assert!(b.try_consume_at(1000, start));
        assert!(!b.try_consume_at(1, start));

        let refilled = start + Duration::from_secs(60);
        assert!(!b.try_consume_at(1, refilled));
        assert!(b.is_throttled_at(refilled));

        let expired = start + Duration::from_secs(120);
        assert!(!b.is_throttled_at(expired));
        assert!(b.try_consume_at(1000, expired));
    }

    #[test]
    fn test_throttle_rearms_after_window() {
        let start = Instant::now();
        let b = ThrottledBucket::new_at(100, 10, Duration::from_secs(120), start);

        assert!(b.try_consume_at(100, start));
        assert!(!b.try_consume_at(100, start));

        // Window expires, bucket drains again, window re-arms
        let t = start + Duration::from_secs(120);
        assert!(b.try_consume_at(100, t));
        assert!(!b.try_consume_at(100, t));
        assert!(b.is_throttled_at(t + Duration::from_secs(119)));
    }

    #[test]
    fn test_unlimited_never_throttles() {
        let start = Instant::now();
        let b = ThrottledBucket::new_at(0, 0, Duration::from_secs(120), start);
        for _ in 0..100 {
            assert!(b.try_consume_at(1_000_000, start));
        }
        assert!(!b.is_throttled_at(start));
    }

    #[test]
    fn test_upstream_per_direction_policers() {
        let start = Instant::now();
        let up = Upstream::new_at(0, PerDirection::new(1000, 0), start);

        assert!(up.p2p(Direction::Ingress).try_consume_at(1000, start));
        assert!(!up.p2p(Direction::Ingress).try_consume_at(1, start));
        // Egress unlimited, ingress throttle does not leak across
        assert!(up.p2p(Direction::Egress).try_consume_at(1_000_000, start));
    }
}
