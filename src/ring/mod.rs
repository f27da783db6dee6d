//! Ring-based packet path
//!
//! The transport trait and its in-memory backend, the per-ring counters,
//! the forwarding decision and the per-ring-pair worker thread.

mod pipeline;
mod stats;
mod transport;
mod worker;

pub use pipeline::{evaluate, evaluate_at, DropReason, Verdict};
pub use stats::{PassCounters, RingStats, RingStatsSnapshot};
pub use transport::{MemoryRing, MemoryRingPeer, Packet, RingGeometry, RingTransport};
pub use worker::RingWorker;
