//! flowgate: traffic-shaping and access-control gateway
//!
//! A line-rate, multi-threaded gateway sitting between a LAN and WAN
//! interface pair. It authenticates and accounts for clients against an
//! AAA backend, enforces per-session and per-client bandwidth limits
//! with specialized peer-to-peer throttling, and forwards or drops
//! frames accordingly.
//!
//! # Architecture
//!
//! ```text
//! LAN ring → Ring Worker → parse → session/client lookup → limiter → WAN ring
//!                              ↑                               ↓
//!                     Overlord sweepers            drop + counters
//!                   (auth, accounting, expiry)
//! ```
//!
//! The packet path runs on dedicated OS threads, one per ring pair,
//! optionally pinned to CPU cores. Session state lives in fixed-shard
//! concurrent maps so parallel workers rarely contend. A small overlord
//! pool drives the session lifecycle off the hot path, and a tokio
//! control plane serves a JSON-line TCP protocol for rule pushes and
//! status queries.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use flowgate::config::load_config;
//! use flowgate::instance::Instance;
//! use flowgate::ring::{MemoryRing, RingWorker};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(load_config("/etc/flowgate/config.json".as_ref())?);
//! let instance = Arc::new(Instance::new(config));
//!
//! let (lan, _lan_peer) = MemoryRing::with_peer("lan0", 0, 1024);
//! let (wan, _wan_peer) = MemoryRing::with_peer("wan0", 0, 1024);
//! let worker = RingWorker::new(Arc::clone(&instance), Box::new(lan), Box::new(wan), None);
//! let handle = worker.spawn();
//!
//! instance.request_shutdown();
//! handle.join().unwrap();
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`bridge`]: authentication/accounting backend interface
//! - [`config`]: configuration types and loading
//! - [`control`]: remote control listener and protocol
//! - [`error`]: error types
//! - [`instance`]: process-wide shared state
//! - [`limit`]: token buckets and speed meters
//! - [`overlord`]: session lifecycle sweepers
//! - [`packet`]: direction model and header parsing
//! - [`registry`]: sharded session/client maps
//! - [`ring`]: packet path, transport and workers
//! - [`rules`]: traffic rules and the hot-swap engine
//! - [`upstream`]: uplinks and the p2p throttle

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod bridge;
pub mod config;
pub mod control;
pub mod error;
pub mod instance;
pub mod limit;
pub mod overlord;
pub mod packet;
pub mod registry;
pub mod ring;
pub mod rules;
pub mod upstream;

// Re-export commonly used types at the crate root
pub use bridge::{AcctEvent, AcctSnapshot, AuthGrant, AuthVerdict, RadiusClient};
pub use config::{load_config, Config};
pub use error::{
    BridgeError, ConfigError, ControlError, FlowGateError, RegistryError, TransportError,
};
pub use instance::{Instance, StatusSnapshot};
pub use limit::{SpeedMeter, TokenBucket};
pub use packet::{Direction, ParsedPacket, PerDirection};
pub use registry::{Client, Session, SessionState};
pub use ring::{MemoryRing, RingTransport, RingWorker};
pub use rules::{RuleEngine, RuleSet};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
