//! Per-subscriber client entries
//!
//! A client aggregates every session authenticated under the same
//! subscriber identity. It owns the shared per-direction bandwidth
//! buckets all of its sessions consume from, and it exists only while at
//! least one session references it.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use crate::limit::{SpeedMeter, TokenBucket};
use crate::packet::{Direction, PerDirection};

/// One subscriber, keyed by the user id RADIUS returned
#[derive(Debug)]
pub struct Client {
    id: String,
    /// Number of sessions holding a reference; the registry removes the
    /// client when this drops to zero
    refs: AtomicU32,
    /// Per-direction rate limit in bytes/second; 0 means unlimited
    limit: PerDirection<AtomicU64>,
    /// Shared buckets all of this client's sessions consume from
    buckets: PerDirection<TokenBucket>,
    speed: PerDirection<SpeedMeter>,
}

impl Client {
    /// Create a client with an initial bucket capacity and rate limits
    ///
    /// `bucket_capacity` is the configured initial per-client bucket size
    /// in bytes; it bounds the burst a client can release after idling.
    #[must_use]
    pub fn new(id: String, bucket_capacity: u64, limit: PerDirection<u64>, now: Instant) -> Self {
        Self {
            id,
            refs: AtomicU32::new(0),
            limit: PerDirection::from_fn(|dir| AtomicU64::new(limit[dir])),
            buckets: PerDirection::from_fn(|dir| {
                TokenBucket::new_at(bucket_capacity, limit[dir], now)
            }),
            speed: PerDirection::from_fn(|_| SpeedMeter::new_at(now)),
        }
    }

    /// Subscriber identity
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Take a session reference; returns the new count
    pub fn acquire(&self) -> u32 {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop a session reference; returns the remaining count
    pub fn release(&self) -> u32 {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "client refcount underflow");
        prev - 1
    }

    /// Current session reference count
    #[must_use]
    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Configured rate limit for one direction (bytes/second, 0 unlimited)
    #[must_use]
    pub fn limit(&self, dir: Direction) -> u64 {
        self.limit[dir].load(Ordering::Relaxed)
    }

    /// Replace both direction limits, e.g. from a RADIUS reply or a rule
    /// push; the bucket capacity is left as provisioned
    pub fn set_limits(&self, limit: PerDirection<u64>) {
        for dir in Direction::ALL {
            self.limit[dir].store(limit[dir], Ordering::Relaxed);
            self.buckets[dir].set_limit(self.buckets[dir].capacity(), limit[dir]);
        }
    }

    /// Shared bandwidth bucket for one direction
    #[must_use]
    pub fn bucket(&self, dir: Direction) -> &TokenBucket {
        &self.buckets[dir]
    }

    /// Client-wide speed meter for one direction
    #[must_use]
    pub fn speed(&self, dir: Direction) -> &SpeedMeter {
        &self.speed[dir]
    }
}
