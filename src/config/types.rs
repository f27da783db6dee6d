//! Configuration types for flowgate
//!
//! This module defines all configuration structures used by the gateway.
//! Configuration is loaded from JSON files and validated at startup;
//! invalid configuration is fatal then and only then.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::packet::PerDirection;
use crate::rules::RuleSet;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// LAN/WAN interface pairs, one ring worker each
    pub interfaces: Vec<IfPairConfig>,

    /// Ring transport backend
    #[serde(default)]
    pub transport: TransportConfig,

    /// Overlord (sweeper) thread count
    #[serde(default = "default_overlord_threads")]
    pub overlord_threads: usize,

    /// Bandwidth limits and registry capacities
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Session lifecycle intervals
    #[serde(default)]
    pub timers: TimersConfig,

    /// RADIUS bridge configuration
    #[serde(default)]
    pub radius: RadiusConfig,

    /// Remote control listener
    #[serde(default)]
    pub control: ControlConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Initial rule set (IP allow-list, p2p port classification,
    /// per-client limit overrides); replaceable at runtime via the
    /// remote control `apply_rules` command
    #[serde(default)]
    pub rules: RuleSet,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interfaces.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one interface pair must be configured".into(),
            ));
        }
        for pair in &self.interfaces {
            pair.validate()?;
        }

        if self.overlord_threads == 0 {
            return Err(ConfigError::ValidationError(
                "overlord_threads must be greater than 0".into(),
            ));
        }

        self.transport.validate()?;
        self.limits.validate()?;
        self.timers.validate()?;
        self.radius.validate()?;

        self.rules
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            interfaces: vec![IfPairConfig {
                lan: "eth0".into(),
                wan: "eth1".into(),
                affinity: None,
            }],
            transport: TransportConfig::default(),
            overlord_threads: default_overlord_threads(),
            limits: LimitsConfig::default(),
            timers: TimersConfig::default(),
            radius: RadiusConfig::default(),
            control: ControlConfig::default(),
            log: LogConfig::default(),
            rules: RuleSet::default(),
        }
    }
}

/// One LAN/WAN interface pair bound to a ring worker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IfPairConfig {
    /// LAN-side interface name
    pub lan: String,

    /// WAN-side interface name
    pub wan: String,

    /// CPU core to pin the ring worker to
    #[serde(default)]
    pub affinity: Option<usize>,
}

impl IfPairConfig {
    /// Validate the interface pair
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in [&self.lan, &self.wan] {
            if name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "Interface name cannot be empty".into(),
                ));
            }
            // IFNAMSIZ = 16 on Linux, including the NUL
            if name.len() > 15 {
                return Err(ConfigError::ValidationError(format!(
                    "Interface name '{name}' too long (max 15 chars)"
                )));
            }
        }
        if self.lan == self.wan {
            return Err(ConfigError::ValidationError(format!(
                "LAN and WAN interfaces must differ (both '{}')",
                self.lan
            )));
        }
        Ok(())
    }
}

/// Ring transport backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportBackend {
    /// In-process ring pair; development, testing and loopback use.
    /// Hardware kernel-bypass backends implement the same transport
    /// trait out of tree.
    Memory,
}

/// Ring transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Which backend provides the rings
    #[serde(default = "default_backend")]
    pub backend: TransportBackend,

    /// Slots per ring
    #[serde(default = "default_ring_slots")]
    pub ring_slots: usize,
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_slots == 0 {
            return Err(ConfigError::ValidationError(
                "ring_slots must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            ring_slots: default_ring_slots(),
        }
    }
}

/// Bandwidth limits and registry capacities
///
/// All rates are bytes per second; a rate of 0 means unlimited.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Per-session limit while unauthenticated
    #[serde(default = "default_unauth_bw")]
    pub unauth_bw: PerDirection<u64>,

    /// Aggregate limit for traffic not attributable to any session
    #[serde(default)]
    pub non_client_bw: PerDirection<u64>,

    /// Per-upstream peer-to-peer traffic cap
    #[serde(default)]
    pub upstream_p2p_bw: PerDirection<u64>,

    /// Number of upstream uplinks
    #[serde(default = "default_upstream_count")]
    pub upstream_count: usize,

    /// Initial per-client bucket size in bytes (burst bound)
    #[serde(default = "default_client_bucket_size")]
    pub initial_client_bucket_size: u64,

    /// Session table capacity
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl LimitsConfig {
    /// Validate limits configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_count == 0 {
            return Err(ConfigError::ValidationError(
                "upstream_count must be greater than 0".into(),
            ));
        }
        if self.initial_client_bucket_size == 0 {
            return Err(ConfigError::ValidationError(
                "initial_client_bucket_size must be greater than 0".into(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "max_sessions must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            unauth_bw: default_unauth_bw(),
            non_client_bw: PerDirection::new(0, 0),
            upstream_p2p_bw: PerDirection::new(0, 0),
            upstream_count: default_upstream_count(),
            initial_client_bucket_size: default_client_bucket_size(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Session lifecycle intervals
///
/// All intervals are milliseconds, evaluated by polling timestamps on the
/// overlord sweep cadence; there are no cancellable timers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimersConfig {
    /// Idle time after which a session expires
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Interval between accounting interim updates
    #[serde(default = "default_acct_interval_ms")]
    pub session_acct_interval_ms: u64,

    /// Interval between (re-)authentication checks
    #[serde(default = "default_auth_interval_ms")]
    pub session_auth_interval_ms: u64,

    /// Overlord sweep cadence
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Bounded wait when polling an idle ring
    #[serde(default = "default_ring_poll_timeout_ms")]
    pub ring_poll_timeout_ms: u64,
}

impl TimersConfig {
    /// Validate timer configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("session_timeout_ms", self.session_timeout_ms),
            ("session_acct_interval_ms", self.session_acct_interval_ms),
            ("session_auth_interval_ms", self.session_auth_interval_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("ring_poll_timeout_ms", self.ring_poll_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        Ok(())
    }

    /// Sweep cadence as a Duration
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Ring poll timeout as a Duration
    #[must_use]
    pub const fn ring_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.ring_poll_timeout_ms)
    }
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: default_session_timeout_ms(),
            session_acct_interval_ms: default_acct_interval_ms(),
            session_auth_interval_ms: default_auth_interval_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            ring_poll_timeout_ms: default_ring_poll_timeout_ms(),
        }
    }
}

/// Which in-tree RADIUS client backs the bridge
///
/// A wire-protocol RADIUS client is an external collaborator implementing
/// the same `RadiusClient` trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RadiusMode {
    /// User table loaded from `config_file` (JSON)
    Static,
    /// Accept every session; the identity doubles as the user id
    Permissive,
}

/// RADIUS bridge configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RadiusConfig {
    /// Client mode
    #[serde(default = "default_radius_mode")]
    pub mode: RadiusMode,

    /// Path to the client configuration (user table for `static` mode)
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// NAS identifier reported in requests
    #[serde(default = "default_nas_identifier")]
    pub nas_identifier: String,
}

impl RadiusConfig {
    /// Validate RADIUS configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == RadiusMode::Static && self.config_file.is_none() {
            return Err(ConfigError::ValidationError(
                "radius.config_file is required in static mode".into(),
            ));
        }
        if self.nas_identifier.is_empty() {
            return Err(ConfigError::ValidationError(
                "radius.nas_identifier cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RadiusConfig {
    fn default() -> Self {
        Self {
            mode: default_radius_mode(),
            config_file: None,
            nas_identifier: default_nas_identifier(),
        }
    }
}

/// Remote control listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Enable the control listener
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address
    #[serde(default = "default_control_listen")]
    pub listen: SocketAddr,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_control_listen(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
            target: true,
        }
    }
}

// Default value functions for serde

const fn default_true() -> bool {
    true
}

fn default_overlord_threads() -> usize {
    (num_cpus::get() / 4).max(1)
}

const fn default_backend() -> TransportBackend {
    TransportBackend::Memory
}

const fn default_ring_slots() -> usize {
    1024
}

const fn default_unauth_bw() -> PerDirection<u64> {
    // 125 kB/s (1 Mbit/s) each way until authenticated
    PerDirection::new(125_000, 125_000)
}

const fn default_upstream_count() -> usize {
    1
}

const fn default_client_bucket_size() -> u64 {
    // One second of 100 Mbit/s
    12_500_000
}

const fn default_max_sessions() -> usize {
    1_048_576
}

const fn default_session_timeout_ms() -> u64 {
    300_000
}

const fn default_acct_interval_ms() -> u64 {
    60_000
}

const fn default_auth_interval_ms() -> u64 {
    300_000
}

const fn default_sweep_interval_ms() -> u64 {
    1000
}

const fn default_ring_poll_timeout_ms() -> u64 {
    50
}

const fn default_radius_mode() -> RadiusMode {
    RadiusMode::Permissive
}

fn default_nas_identifier() -> String {
    "flowgate".into()
}

fn default_control_listen() -> SocketAddr {
    "127.0.0.1:5712".parse().unwrap()
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
