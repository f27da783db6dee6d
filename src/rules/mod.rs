//! Traffic rules and the hot-swappable rule engine
//!
//! A [`RuleSet`] carries the policy the packet path consults on every
//! frame: the IP allow-list exempt from limiting, the port sets that
//! classify peer-to-peer traffic, and per-subscriber limit overrides.
//! The [`RuleEngine`] holds the active set behind an `ArcSwap` so rule
//! pushes swap atomically with respect to in-flight packets; a worker
//! that already loaded the old set finishes the packet under it.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ControlError;
use crate::packet::{ParsedPacket, PerDirection};

/// One complete, immutable traffic policy
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuleSet {
    /// Networks exempt from all limiting and authentication
    #[serde(default)]
    pub exempt_nets: Vec<Ipv4Net>,

    /// Ports whose traffic is classified as peer-to-peer
    #[serde(default)]
    pub p2p_ports: BTreeSet<u16>,

    /// Ports excluded from p2p classification even when listed above
    #[serde(default)]
    pub p2p_port_exceptions: BTreeSet<u16>,

    /// Per-subscriber rate limit overrides (bytes/second, 0 unlimited),
    /// keyed by user id; applied at promotion and on rule push
    #[serde(default)]
    pub client_limits: HashMap<String, PerDirection<u64>>,
}

impl RuleSet {
    /// Validate the rule set
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRules` when a port appears in both
    /// the p2p set and its exception set.
    pub fn validate(&self) -> Result<(), ControlError> {
        if let Some(port) = self.p2p_ports.intersection(&self.p2p_port_exceptions).next() {
            return Err(ControlError::InvalidRules(format!(
                "port {port} is both p2p-classified and excepted"
            )));
        }
        Ok(())
    }

    /// Whether `ip` is exempt from limiting and authentication
    #[must_use]
    pub fn is_exempt(&self, ip: Ipv4Addr) -> bool {
        self.exempt_nets.iter().any(|net| net.contains(&ip))
    }

    fn port_is_p2p(&self, port: u16) -> bool {
        self.p2p_ports.contains(&port) && !self.p2p_port_exceptions.contains(&port)
    }

    /// Classify a flow as peer-to-peer by port membership
    #[must_use]
    pub fn is_p2p(&self, packet: &ParsedPacket) -> bool {
        [packet.src_port, packet.dst_port]
            .into_iter()
            .flatten()
            .any(|port| self.port_is_p2p(port))
    }

    /// Configured limit override for a subscriber, if any
    #[must_use]
    pub fn limits_for(&self, user_id: &str) -> Option<PerDirection<u64>> {
        self.client_limits.get(user_id).copied()
    }
}

/// Holder of the active rule set
///
/// Readers call [`RuleEngine::current`] once per packet and evaluate the
/// whole packet under that snapshot.
#[derive(Debug)]
pub struct RuleEngine {
    active: ArcSwap<RuleSet>,
    version: AtomicU64,
}

impl RuleEngine {
    /// Create an engine with an initial, already-validated rule set
    #[must_use]
    pub fn new(initial: RuleSet) -> Self {
        Self {
            active: ArcSwap::from_pointee(initial),
            version: AtomicU64::new(1),
        }
    }

    /// Snapshot of the active rule set
    #[must_use]
    pub fn current(&self) -> Arc<RuleSet> {
        self.active.load_full()
    }

    /// Replace the active rule set atomically
    ///
    /// The new set is validated first; on failure the active set is
    /// untouched. Returns the new version number.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRules` if validation fails.
    pub fn apply(&self, rules: RuleSet) -> Result<u64, ControlError> {
        rules.validate()?;

        self.active.store(Arc::new(rules));
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        info!(version, "Rule set applied");
        Ok(version)
    }

    /// Version of the active rule set, starting at 1
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
