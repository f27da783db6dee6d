//! Per-IP session entries
//!
//! A session is created on the first packet from an unseen IP and lives
//! until an overlord sweep expires or revokes it. Ring workers touch the
//! session on every packet; overlord threads drive its lifecycle. All
//! fields are therefore atomics or independently locked so a shard read
//! lock is enough for the packet path.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use super::Client;
use crate::limit::{SpeedMeter, TokenBucket};
use crate::packet::{Direction, PerDirection};

/// Authentication state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Created on first packet; subject to the unauthenticated limit
    Unauth = 0,
    /// An authenticate call is in flight on an overlord thread
    PendingAuth = 1,
    /// RADIUS accepted; traffic governed by the owning client's limit
    Authenticated = 2,
    /// Re-authentication was rejected; all traffic denied
    Revoked = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::PendingAuth,
            2 => Self::Authenticated,
            3 => Self::Revoked,
            _ => Self::Unauth,
        }
    }
}

/// Cumulative byte/packet counters for one direction
#[derive(Debug, Default)]
pub struct TrafficCounter {
    bytes: AtomicU64,
    packets: AtomicU64,
}

impl TrafficCounter {
    /// Record one forwarded packet of `bytes` bytes
    pub fn add(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.packets.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bytes
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Cumulative packets
    #[must_use]
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }
}

/// One live session, keyed by client IP
///
/// Timestamps are milliseconds on the owning instance's monotonic clock.
#[derive(Debug)]
pub struct Session {
    ip: std::net::Ipv4Addr,
    state: AtomicU8,
    /// Owning client; set at promotion, cleared at teardown
    client: RwLock<Option<Arc<Client>>>,
    /// Per-direction unauthenticated-limit buckets
    buckets: PerDirection<TokenBucket>,
    speed: PerDirection<SpeedMeter>,
    /// Forwarded traffic, reported in accounting records
    traffic: PerDirection<TrafficCounter>,
    created: AtomicU64,
    last_seen: AtomicU64,
    last_acct: AtomicU64,
    last_auth: AtomicU64,
}

impl Session {
    /// Create a session in `Unauth` state
    ///
    /// `unauth_limit` is the per-direction unauthenticated rate in
    /// bytes/second; the bucket capacity equals one second of credit.
    #[must_use]
    pub fn new(
        ip: std::net::Ipv4Addr,
        unauth_limit: PerDirection<u64>,
        now_ms: u64,
        now: Instant,
    ) -> Self {
        Self {
            ip,
            state: AtomicU8::new(SessionState::Unauth as u8),
            client: RwLock::new(None),
            buckets: PerDirection::from_fn(|dir| {
                TokenBucket::new_at(unauth_limit[dir], unauth_limit[dir], now)
            }),
            speed: PerDirection::from_fn(|_| SpeedMeter::new_at(now)),
            traffic: PerDirection::from_fn(|_| TrafficCounter::default()),
            created: AtomicU64::new(now_ms),
            last_seen: AtomicU64::new(now_ms),
            last_acct: AtomicU64::new(now_ms),
            last_auth: AtomicU64::new(0),
        }
    }

    /// The client IP this session is keyed by
    #[must_use]
    pub fn ip(&self) -> std::net::Ipv4Addr {
        self.ip
    }

    /// Current authentication state
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Store a new state
    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Claim this session for an authentication attempt
    ///
    /// Transitions `Unauth -> PendingAuth`; returns false if another
    /// overlord already claimed it or the state moved on.
    pub fn begin_auth(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Unauth as u8,
                SessionState::PendingAuth as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// The owning client, when authenticated
    #[must_use]
    pub fn client(&self) -> Option<Arc<Client>> {
        self.client.read().clone()
    }

    /// Link the owning client at promotion
    pub fn link_client(&self, client: Arc<Client>) {
        *self.client.write() = Some(client);
    }

    /// Detach the owning client at teardown, returning it for unref
    pub fn unlink_client(&self) -> Option<Arc<Client>> {
        self.client.write().take()
    }

    /// Unauthenticated-limit bucket for one direction
    #[must_use]
    pub fn bucket(&self, dir: Direction) -> &TokenBucket {
        &self.buckets[dir]
    }

    /// Speed meter for one direction
    #[must_use]
    pub fn speed(&self, dir: Direction) -> &SpeedMeter {
        &self.speed[dir]
    }

    /// Forwarded-traffic counters for one direction
    #[must_use]
    pub fn traffic(&self, dir: Direction) -> &TrafficCounter {
        &self.traffic[dir]
    }

    /// Record one forwarded packet
    pub fn record_forward(&self, dir: Direction, bytes: u64, now: Instant) {
        self.traffic[dir].add(bytes);
        self.speed[dir].update_at(bytes, now);
    }

    /// Stamp packet arrival
    pub fn touch(&self, now_ms: u64) {
        self.last_seen.store(now_ms, Ordering::Relaxed);
    }

    /// Milliseconds since the last packet
    #[must_use]
    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_seen.load(Ordering::Relaxed))
    }

    /// Session age in milliseconds
    #[must_use]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created.load(Ordering::Relaxed))
    }

    /// Whether an accounting interim update is due
    #[must_use]
    pub fn acct_due(&self, now_ms: u64, interval_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_acct.load(Ordering::Relaxed)) >= interval_ms
    }

    /// Stamp a successful accounting call
    pub fn mark_acct(&self, now_ms: u64) {
        self.last_acct.store(now_ms, Ordering::Relaxed);
    }

    /// Whether an (initial or re-) authentication attempt is due
    #[must_use]
    pub fn auth_due(&self, now_ms: u64, interval_ms: u64) -> bool {
        let last = self.last_auth.load(Ordering::Relaxed);
        last == 0 || now_ms.saturating_sub(last) >= interval_ms
    }

    /// Stamp an authentication attempt
    pub fn mark_auth(&self, now_ms: u64) {
        self.last_auth.store(now_ms, Ordering::Relaxed);
    }
}
