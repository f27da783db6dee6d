//! Per-ring traffic counters
//!
//! Each ring worker owns one [`RingStats`]; only that worker increments
//! it, so plain relaxed atomics suffice. Control and status paths read
//! the counters without locking.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::packet::{Direction, PerDirection};

/// Counters for one direction of one ring pair
#[derive(Debug, Default)]
pub struct PassCounters {
    all_packets: AtomicU64,
    all_bytes: AtomicU64,
    passed_packets: AtomicU64,
    passed_bytes: AtomicU64,
}

impl PassCounters {
    /// Count an arriving packet, forwarded or not
    pub fn record_all(&self, bytes: u64) {
        self.all_packets.fetch_add(1, Ordering::Relaxed);
        self.all_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count a forwarded packet
    pub fn record_passed(&self, bytes: u64) {
        self.passed_packets.fetch_add(1, Ordering::Relaxed);
        self.passed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[must_use]
    pub fn all_packets(&self) -> u64 {
        self.all_packets.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn all_bytes(&self) -> u64 {
        self.all_bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn passed_packets(&self) -> u64 {
        self.passed_packets.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn passed_bytes(&self) -> u64 {
        self.passed_bytes.load(Ordering::Relaxed)
    }
}

/// Counters for one ring pair
#[derive(Debug)]
pub struct RingStats {
    lan: String,
    wan: String,
    counters: PerDirection<PassCounters>,
}

impl RingStats {
    #[must_use]
    pub fn new(lan: &str, wan: &str) -> Self {
        Self {
            lan: lan.to_string(),
            wan: wan.to_string(),
            counters: PerDirection::from_fn(|_| PassCounters::default()),
        }
    }

    /// Counters for one direction
    #[must_use]
    pub fn dir(&self, dir: Direction) -> &PassCounters {
        &self.counters[dir]
    }

    /// Point-in-time copy for status queries
    #[must_use]
    pub fn snapshot(&self) -> RingStatsSnapshot {
        RingStatsSnapshot {
            lan: self.lan.clone(),
            wan: self.wan.clone(),
            all_packets: PerDirection::from_fn(|d| self.counters[d].all_packets()),
            all_bytes: PerDirection::from_fn(|d| self.counters[d].all_bytes()),
            passed_packets: PerDirection::from_fn(|d| self.counters[d].passed_packets()),
            passed_bytes: PerDirection::from_fn(|d| self.counters[d].passed_bytes()),
        }
    }
}

/// Serializable counter snapshot for one ring pair
#[derive(Debug, Clone, Serialize)]
pub struct RingStatsSnapshot {
    pub lan: String,
    pub wan: String,
    pub all_packets: PerDirection<u64>,
    pub all_bytes: PerDirection<u64>,
    pub passed_packets: PerDirection<u64>,
    pub passed_bytes: PerDirection<u64>,
}
