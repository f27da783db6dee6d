//! Process-wide gateway instance
//!
//! One [`Instance`] aggregates everything the worker threads share: the
//! immutable configuration snapshot, the rule engine, the session and
//! client registries, the upstream set, the non-client aggregate limiter
//! and the global counters. Every thread receives an explicit
//! `Arc<Instance>` at startup; nothing reaches for a global.
//!
//! Timestamps handed to sessions are milliseconds on the instance's own
//! monotonic clock, which starts at zero when the instance is built.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::bridge::{AcctSnapshot, AuthGrant};
use crate::config::Config;
use crate::error::{ControlError, RegistryError};
use crate::limit::{SpeedMeter, TokenBucket};
use crate::packet::{Direction, PerDirection};
use crate::registry::{Client, Session, SessionState, ShardedMap, SHARD_COUNT};
use crate::ring::RingStats;
use crate::rules::{RuleEngine, RuleSet};
use crate::upstream::Upstream;

/// Monitoring counters, atomic and lock-free to read
#[derive(Debug, Default)]
pub struct GlobalCounters {
    sessions: AtomicU64,
    unauth_sessions: AtomicU64,
    clients: AtomicU64,
}

impl GlobalCounters {
    /// Active sessions
    #[must_use]
    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Sessions not yet authenticated
    #[must_use]
    pub fn unauth_sessions(&self) -> u64 {
        self.unauth_sessions.load(Ordering::Relaxed)
    }

    /// Live clients
    #[must_use]
    pub fn clients(&self) -> u64 {
        self.clients.load(Ordering::Relaxed)
    }
}

/// Point-in-time counters for status queries
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub uptime_secs: u64,
    pub sessions: u64,
    pub unauth_sessions: u64,
    pub clients: u64,
    pub rules_version: u64,
    pub ring_workers: usize,
}

/// Shared gateway state
#[derive(Debug)]
pub struct Instance {
    config: Arc<Config>,
    rules: RuleEngine,
    sessions: ShardedMap<Ipv4Addr, Arc<Session>>,
    clients: ShardedMap<String, Arc<Client>>,
    upstreams: Vec<Upstream>,
    /// Aggregate limiter for traffic not attributable to any session
    non_client: PerDirection<TokenBucket>,
    non_client_speed: PerDirection<SpeedMeter>,
    counters: GlobalCounters,
    /// Per-ring counters, registered as workers start
    rings: RwLock<Vec<Arc<RingStats>>>,
    abort: AtomicBool,
    start: Instant,
}

impl Instance {
    /// Build an instance from a validated configuration
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        let now = Instant::now();
        let limits = &config.limits;

        let upstreams = (0..limits.upstream_count)
            .map(|id| Upstream::new_at(id, limits.upstream_p2p_bw, now))
            .collect();

        Self {
            rules: RuleEngine::new(config.rules.clone()),
            sessions: ShardedMap::new(limits.max_sessions),
            // Clients can never outnumber sessions
            clients: ShardedMap::new(limits.max_sessions),
            upstreams,
            non_client: PerDirection::from_fn(|dir| {
                TokenBucket::new_at(limits.non_client_bw[dir], limits.non_client_bw[dir], now)
            }),
            non_client_speed: PerDirection::from_fn(|_| SpeedMeter::new_at(now)),
            counters: GlobalCounters::default(),
            rings: RwLock::new(Vec::new()),
            abort: AtomicBool::new(false),
            start: now,
            config,
        }
    }

    /// Configuration snapshot
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Active rule engine
    #[must_use]
    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Monitoring counters
    #[must_use]
    pub fn counters(&self) -> &GlobalCounters {
        &self.counters
    }

    /// Milliseconds since the instance started
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Signal every worker loop to stop at its next iteration boundary
    pub fn request_shutdown(&self) {
        if !self.abort.swap(true, Ordering::AcqRel) {
            info!("Shutdown requested");
        }
    }

    /// Whether shutdown has been requested
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    // Session registry

    /// Look up the session for an IP
    #[must_use]
    pub fn lookup_session(&self, ip: Ipv4Addr) -> Option<Arc<Session>> {
        self.sessions.lookup(&ip)
    }

    /// Look up or create the session for an IP
    ///
    /// A created session starts unauthenticated and bumps the session and
    /// unauthenticated counters.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::CapacityExhausted` when the session table
    /// is full; the caller drops the packet.
    pub fn get_or_create_session(
        &self,
        ip: Ipv4Addr,
    ) -> Result<Arc<Session>, RegistryError> {
        self.get_or_create_session_at(ip, self.now_ms(), Instant::now())
    }

    /// `get_or_create_session` with an explicit clock (test rigs)
    pub fn get_or_create_session_at(
        &self,
        ip: Ipv4Addr,
        now_ms: u64,
        now: Instant,
    ) -> Result<Arc<Session>, RegistryError> {
        let unauth_bw = self.config.limits.unauth_bw;
        let (session, created) = self.sessions.lookup_or_create(ip, || {
            Arc::new(Session::new(ip, unauth_bw, now_ms, now))
        })?;

        if created {
            self.counters.sessions.fetch_add(1, Ordering::Relaxed);
            self.counters.unauth_sessions.fetch_add(1, Ordering::Relaxed);
            debug!(ip = %ip, "Session created");
        }
        Ok(session)
    }

    /// Session identity as presented to the AAA backend
    #[must_use]
    pub fn identity(session: &Session) -> String {
        session.ip().to_string()
    }

    /// Promote a session to authenticated under a grant
    ///
    /// Resolves or creates the client for the grant's user id, applies any
    /// rule-set limit override, links the session and moves the counters.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::CapacityExhausted` if the client table is
    /// full; the session stays pending and the attempt is retried.
    pub fn promote_session(
        &self,
        session: &Session,
        grant: &AuthGrant,
    ) -> Result<Arc<Client>, RegistryError> {
        let now = Instant::now();
        let limit = self
            .rules
            .current()
            .limits_for(&grant.user_id)
            .unwrap_or(grant.limit);

        let bucket_size = self.config.limits.initial_client_bucket_size;
        let (client, created) = self.clients.lookup_or_create_with(
            grant.user_id.clone(),
            || Arc::new(Client::new(grant.user_id.clone(), bucket_size, limit, now)),
            // The reference is taken while the shard lock is held, so a
            // teardown on another thread cannot observe a zero refcount
            // and drop the entry out from under us
            |client| {
                client.acquire();
            },
        )?;

        if created {
            self.counters.clients.fetch_add(1, Ordering::Relaxed);
        } else {
            // Backend may have granted new limits since the client was made
            client.set_limits(limit);
        }

        session.link_client(Arc::clone(&client));
        session.set_state(SessionState::Authenticated);
        self.counters.unauth_sessions.fetch_sub(1, Ordering::Relaxed);

        info!(ip = %session.ip(), user_id = %grant.user_id, "Session authenticated");
        Ok(client)
    }

    /// Remove a session and release its client reference
    ///
    /// The client is removed from the registry when this was its last
    /// session. Returns the accounting snapshot to report, if the session
    /// was authenticated.
    pub fn remove_session(&self, session: &Session) -> Option<AcctSnapshot> {
        self.sessions.remove(&session.ip())?;
        self.counters.sessions.fetch_sub(1, Ordering::Relaxed);

        match session.unlink_client() {
            Some(client) => {
                let snapshot = self.acct_snapshot(session, client.id());
                // Release and remove under the shard lock; the zero check
                // must not interleave with a concurrent promotion acquiring
                // this client
                let removed = self
                    .clients
                    .remove_if(&client.id().to_string(), |_| client.release() == 0);
                if removed.is_some() {
                    self.counters.clients.fetch_sub(1, Ordering::Relaxed);
                    debug!(user_id = %client.id(), "Client removed");
                }
                debug!(ip = %session.ip(), "Session removed");
                Some(snapshot)
            }
            None => {
                self.counters.unauth_sessions.fetch_sub(1, Ordering::Relaxed);
                debug!(ip = %session.ip(), "Session removed");
                None
            }
        }
    }

    /// Build an accounting snapshot for a session
    #[must_use]
    pub fn acct_snapshot(&self, session: &Session, user_id: &str) -> AcctSnapshot {
        AcctSnapshot {
            identity: Self::identity(session),
            user_id: user_id.to_string(),
            bytes: PerDirection::from_fn(|dir| session.traffic(dir).bytes()),
            packets: PerDirection::from_fn(|dir| session.traffic(dir).packets()),
            session_time_secs: session.age_ms(self.now_ms()) / 1000,
        }
    }

    /// Visit every session in one shard
    pub fn for_each_session_in_shard(&self, shard: usize, f: impl FnMut(&Ipv4Addr, &Arc<Session>)) {
        self.sessions.for_each_in_shard(shard, f);
    }

    /// Snapshot one session shard for a sweep
    #[must_use]
    pub fn collect_session_shard(&self, shard: usize) -> Vec<(Ipv4Addr, Arc<Session>)> {
        self.sessions.collect_shard(shard)
    }

    /// Look up a client by user id
    #[must_use]
    pub fn lookup_client(&self, user_id: &str) -> Option<Arc<Client>> {
        self.clients.lookup(&user_id.to_string())
    }

    // Upstreams and the non-client scope

    /// The upstream carrying traffic for a WAN-side address
    #[must_use]
    pub fn upstream_for(&self, wan_ip: Ipv4Addr) -> &Upstream {
        let idx = u32::from(wan_ip) as usize % self.upstreams.len();
        &self.upstreams[idx]
    }

    /// All configured upstreams
    #[must_use]
    pub fn upstreams(&self) -> &[Upstream] {
        &self.upstreams
    }

    /// Aggregate bucket for traffic with no session
    #[must_use]
    pub fn non_client_bucket(&self, dir: Direction) -> &TokenBucket {
        &self.non_client[dir]
    }

    /// Speed meter for traffic with no session
    #[must_use]
    pub fn non_client_speed(&self, dir: Direction) -> &SpeedMeter {
        &self.non_client_speed[dir]
    }

    // Rules and status

    /// Replace the active rule set and re-apply client limit overrides
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRules` if validation fails; the
    /// active set is untouched.
    pub fn apply_rules(&self, rules: RuleSet) -> Result<u64, ControlError> {
        let version = self.rules.apply(rules)?;

        // Push new overrides onto live clients
        let active = self.rules.current();
        for shard in 0..SHARD_COUNT {
            self.clients.for_each_in_shard(shard, |user_id, client| {
                if let Some(limit) = active.limits_for(user_id) {
                    client.set_limits(limit);
                }
            });
        }
        Ok(version)
    }

    /// Register a ring worker's counters for status queries
    pub fn register_ring_stats(&self, stats: Arc<RingStats>) {
        self.rings.write().push(stats);
    }

    /// Registered ring counters
    #[must_use]
    pub fn ring_stats(&self) -> Vec<Arc<RingStats>> {
        self.rings.read().clone()
    }

    /// Consistent counter snapshot for status queries
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            uptime_secs: self.start.elapsed().as_secs(),
            sessions: self.counters.sessions(),
            unauth_sessions: self.counters.unauth_sessions(),
            clients: self.counters.clients(),
            rules_version: self.rules.version(),
            ring_workers: self.rings.read().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PerDirection;

    fn instance() -> Instance {
        let mut config = Config::default_config();
        config.limits.unauth_bw = PerDirection::new(1000, 1000);
        Instance::new(Arc::new(config))
    }

    fn grant(user_id: &str) -> AuthGrant {
        AuthGrant {
            user_id: user_id.into(),
            limit: PerDirection::new(5000, 5000),
        }
    }

    #[test]
    fn test_session_creation_counts() {
        let inst = instance();
        let ip = Ipv4Addr::new(10, 0, 0, 1);

        let s1 = inst.get_or_create_session(ip).unwrap();
        assert_eq!(inst.counters().sessions(), 1);
        assert_eq!(inst.counters().unauth_sessions(), 1);

        // Same IP resolves to the same session, no double count
        let s2 = inst.get_or_create_session(ip).unwrap();
        assert!(Arc::ptr_eq(&s1, &s2));
        assert_eq!(inst.counters().sessions(), 1);
    }

    #[test]
    fn test_promotion_moves_counters_and_links_client() {
        let inst = instance();
        let session = inst
            .get_or_create_session(Ipv4Addr::new(10, 0, 0, 2))
            .unwrap();

        let client = inst.promote_session(&session, &grant("alice")).unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(client.refs(), 1);
        assert_eq!(inst.counters().clients(), 1);
        assert_eq!(inst.counters().unauth_sessions(), 0);
        assert_eq!(client.limit(Direction::Ingress), 5000);
    }

    #[test]
    fn test_two_sessions_share_one_client() {
        let inst = instance();
        let s1 = inst.get_or_create_session(Ipv4Addr::new(10, 0, 0, 3)).unwrap();
        let s2 = inst.get_or_create_session(Ipv4Addr::new(10, 0, 0, 4)).unwrap();

        let c1 = inst.promote_session(&s1, &grant("alice")).unwrap();
        let c2 = inst.promote_session(&s2, &grant("alice")).unwrap();
        assert!(Arc::ptr_eq(&c1, &c2));
        assert_eq!(c1.refs(), 2);
        assert_eq!(inst.counters().clients(), 1);
    }

    #[test]
    fn test_remove_session_releases_client() {
        let inst = instance();
        let s1 = inst.get_or_create_session(Ipv4Addr::new(10, 0, 0, 3)).unwrap();
        let s2 = inst.get_or_create_session(Ipv4Addr::new(10, 0, 0, 4)).unwrap();
        inst.promote_session(&s1, &grant("alice")).unwrap();
        let client = inst.promote_session(&s2, &grant("alice")).unwrap();

        let snapshot = inst.remove_session(&s1).expect("acct snapshot");
        assert_eq!(snapshot.user_id, "alice");
        // Client survives while the second session references it
        assert_eq!(client.refs(), 1);
        assert!(inst.lookup_client("alice").is_some());

        inst.remove_session(&s2).unwrap();
        assert!(inst.lookup_client("alice").is_none());
        assert_eq!(inst.counters().clients(), 0);
        assert_eq!(inst.counters().sessions(), 0);
    }

    #[test]
    fn test_concurrent_promotion_and_teardown_keep_client_registered() {
        // Session a is the subscriber's last session; a second session b
        // is promoted for the same user while a is torn down. Whichever
        // order wins, a client referenced by b must stay in the registry
        // and be the same instance b holds.
        let inst = Arc::new(instance());
        let ip_a = Ipv4Addr::new(10, 0, 0, 1);
        let ip_b = Ipv4Addr::new(10, 0, 0, 2);

        for _ in 0..500 {
            let a = inst.get_or_create_session(ip_a).unwrap();
            inst.promote_session(&a, &grant("alice")).unwrap();

            let promote = {
                let inst = Arc::clone(&inst);
                std::thread::spawn(move || {
                    let b = inst.get_or_create_session(ip_b).unwrap();
                    inst.promote_session(&b, &grant("alice")).unwrap();
                })
            };
            let teardown = {
                let inst = Arc::clone(&inst);
                let a = Arc::clone(&a);
                std::thread::spawn(move || {
                    inst.remove_session(&a);
                })
            };
            promote.join().unwrap();
            teardown.join().unwrap();

            let b = inst.lookup_session(ip_b).unwrap();
            let linked = b.client().expect("session b lost its client");
            assert_eq!(linked.refs(), 1);
            let registered = inst
                .lookup_client("alice")
                .expect("referenced client missing from registry");
            assert!(Arc::ptr_eq(&linked, &registered));
            assert_eq!(inst.counters().clients(), 1);

            inst.remove_session(&b).unwrap();
            assert!(inst.lookup_client("alice").is_none());
            assert_eq!(inst.counters().clients(), 0);
        }
    }

    #[test]
    fn test_remove_unauth_session_has_no_snapshot() {
        let inst = instance();
        let s = inst.get_or_create_session(Ipv4Addr::new(10, 0, 0, 9)).unwrap();
        assert!(inst.remove_session(&s).is_none());
        assert_eq!(inst.counters().unauth_sessions(), 0);
        assert_eq!(inst.counters().sessions(), 0);
    }

    #[test]
    fn test_rule_push_updates_live_client_limits() {
        let inst = instance();
        let s = inst.get_or_create_session(Ipv4Addr::new(10, 0, 0, 5)).unwrap();
        let client = inst.promote_session(&s, &grant("alice")).unwrap();
        assert_eq!(client.limit(Direction::Egress), 5000);

        let mut rules = RuleSet::default();
        rules
            .client_limits
            .insert("alice".into(), PerDirection::new(100, 200));
        let version = inst.apply_rules(rules).unwrap();
        assert_eq!(version, 2);
        assert_eq!(client.limit(Direction::Ingress), 100);
        assert_eq!(client.limit(Direction::Egress), 200);
    }

    #[test]
    fn test_rule_override_applies_at_promotion() {
        let inst = instance();
        let mut rules = RuleSet::default();
        rules
            .client_limits
            .insert("alice".into(), PerDirection::new(111, 222));
        inst.apply_rules(rules).unwrap();

        let s = inst.get_or_create_session(Ipv4Addr::new(10, 0, 0, 6)).unwrap();
        let client = inst.promote_session(&s, &grant("alice")).unwrap();
        assert_eq!(client.limit(Direction::Ingress), 111);
    }

    #[test]
    fn test_status_snapshot() {
        let inst = instance();
        inst.get_or_create_session(Ipv4Addr::new(10, 0, 0, 7)).unwrap();

        let status = inst.status();
        assert_eq!(status.sessions, 1);
        assert_eq!(status.unauth_sessions, 1);
        assert_eq!(status.clients, 0);
        assert_eq!(status.rules_version, 1);
    }

    #[test]
    fn test_shutdown_flag() {
        let inst = instance();
        assert!(!inst.is_aborted());
        inst.request_shutdown();
        assert!(inst.is_aborted());
    }

    #[test]
    fn test_upstream_selection_stable() {
        let inst = instance();
        let ip = Ipv4Addr::new(8, 8, 8, 8);
        let a = inst.upstream_for(ip).id();
        let b = inst.upstream_for(ip).id();
        assert_eq!(a, b);
    }
}
