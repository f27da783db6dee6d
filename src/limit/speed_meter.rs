//! Smoothed throughput estimation
//!
//! A speed meter keeps a short ring of per-second byte counts. Forwarded
//! packets add into the bucket for the current second; the reported speed
//! is the average over the completed seconds in the window, which smooths
//! bursts without any background sampling thread.

use std::time::Instant;

use parking_lot::Mutex;

/// Number of one-second samples in the sliding window
const BACKLOG: usize = 5;

/// Sliding-window bytes/second estimator
#[derive(Debug)]
pub struct SpeedMeter {
    /// Monotonic origin for second indices
    origin: Instant,
    inner: Mutex<MeterInner>,
}

#[derive(Debug)]
struct MeterInner {
    slots: [Slot; BACKLOG],
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    /// Absolute second index this slot currently holds
    sec: u64,
    bytes: u64,
}

impl SpeedMeter {
    /// Create a meter with the monotonic clock as origin
    #[must_use]
    pub fn new() -> Self {
        Self::new_at(Instant::now())
    }

    /// Create a meter with an explicit origin (test clock)
    #[must_use]
    pub fn new_at(origin: Instant) -> Self {
        Self {
            origin,
            inner: Mutex::new(MeterInner {
                slots: [Slot::default(); BACKLOG],
            }),
        }
    }

    /// Record `bytes` forwarded now
    pub fn update(&self, bytes: u64) {
        self.update_at(bytes, Instant::now());
    }

    /// Record `bytes` forwarded at the given instant
    pub fn update_at(&self, bytes: u64, now: Instant) {
        let sec = self.second_index(now);
        let mut inner = self.inner.lock();
        let slot = &mut inner.slots[(sec % BACKLOG as u64) as usize];
        if slot.sec != sec {
            // Slot holds a stale second; recycle it
            slot.sec = sec;
            slot.bytes = 0;
        }
        slot.bytes += bytes;
    }

    /// Smoothed bytes/second over the completed seconds in the window
    #[must_use]
    pub fn speed(&self) -> u64 {
        self.speed_at(Instant::now())
    }

    /// Smoothed bytes/second at the given instant
    #[must_use]
    pub fn speed_at(&self, now: Instant) -> u64 {
        let current = self.second_index(now);
        let inner = self.inner.lock();
        let total: u64 = inner
            .slots
            .iter()
            .filter(|slot| {
                // Completed seconds only, and only ones inside the window
                slot.sec < current && current - slot.sec <= BACKLOG as u64
            })
            .map(|slot| slot.bytes)
            .sum();
        total / BACKLOG as u64
    }

    fn second_index(&self, now: Instant) -> u64 {
        // +1 so second 0 is never a valid "completed" slot index and
        // default-initialized slots read as empty
        now.saturating_duration_since(self.origin).as_secs() + 1
    }
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}
