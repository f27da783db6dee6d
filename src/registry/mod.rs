//! Session/client registry
//!
//! Sharded concurrent maps keyed by client IP (sessions) and subscriber
//! identity (clients). Each shard is independently reader-writer locked so
//! ring workers doing lookups proceed in parallel; creation, destruction
//! and promotion take exclusive access to a single shard only.

mod client;
mod session;
mod shard;

pub use client::Client;
pub use session::{Session, SessionState, TrafficCounter};
pub use shard::{ShardKey, ShardedMap, SHARD_COUNT, SHARD_MASK};
