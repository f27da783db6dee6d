//! Overlord sweeper threads
//!
//! A small pool of background threads drives the session lifecycle
//! independent of packet arrival. Each thread owns a disjoint subset of
//! registry shards (shard index modulo pool size), so sweepers never
//! contend with each other. All bridge calls happen here, off the packet
//! path; a failed call leaves the session in its prior state and is
//! retried on the next sweep, bounded by the session timeout.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::bridge::{AcctEvent, AuthVerdict, RadiusClient};
use crate::instance::Instance;
use crate::registry::{Session, SessionState, SHARD_COUNT};

/// One sweeper owning a subset of shards
pub struct Overlord {
    instance: Arc<Instance>,
    client: Arc<dyn RadiusClient>,
    index: usize,
    pool_size: usize,
}

impl Overlord {
    #[must_use]
    pub fn new(
        instance: Arc<Instance>,
        client: Arc<dyn RadiusClient>,
        index: usize,
        pool_size: usize,
    ) -> Self {
        Self {
            instance,
            client,
            index,
            pool_size: pool_size.max(1),
        }
    }

    /// Spawn the sweeper thread
    pub fn spawn(self) -> JoinHandle<()> {
        let name = format!("overlord-{}", self.index);
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .unwrap_or_else(|e| panic!("failed to spawn {name}: {e}"))
    }

    fn run(self) {
        info!(index = self.index, pool_size = self.pool_size, "Overlord started");
        let interval = self.instance.config().timers.sweep_interval();
        while !self.instance.is_aborted() {
            self.sweep();
            // Sleep in short slices so shutdown is prompt
            let deadline = Instant::now() + interval;
            while !self.instance.is_aborted() && Instant::now() < deadline {
                std::thread::sleep(interval.min(std::time::Duration::from_millis(50)));
            }
        }
        info!(index = self.index, "Overlord stopped");
    }

    /// One pass over this sweeper's shards with the monotonic clock
    pub fn sweep(&self) {
        self.sweep_at(self.instance.now_ms());
    }

    /// One pass over this sweeper's shards at an explicit time (test rigs)
    pub fn sweep_at(&self, now_ms: u64) {
        for shard in (self.index..SHARD_COUNT).step_by(self.pool_size) {
            self.sweep_shard(shard, now_ms);
        }
    }

    fn sweep_shard(&self, shard: usize, now_ms: u64) {
        // Snapshot the shard so bridge calls run outside its lock
        for (_, session) in self.instance.collect_session_shard(shard) {
            self.sweep_session(&session, now_ms);
        }
    }

    fn sweep_session(&self, session: &Session, now_ms: u64) {
        let timers = &self.instance.config().timers;

        // Teardown first: revoked sessions and idle timeouts
        if session.state() == SessionState::Revoked
            || session.idle_ms(now_ms) >= timers.session_timeout_ms
        {
            self.teardown(session);
            return;
        }

        match session.state() {
            SessionState::Unauth => {
                if session.auth_due(now_ms, timers.session_auth_interval_ms) {
                    self.try_initial_auth(session, now_ms);
                }
            }
            SessionState::Authenticated => {
                if session.auth_due(now_ms, timers.session_auth_interval_ms) {
                    self.try_reauth(session, now_ms);
                }
                if session.state() == SessionState::Authenticated
                    && session.acct_due(now_ms, timers.session_acct_interval_ms)
                {
                    self.try_interim_acct(session, now_ms);
                }
            }
            // Another sweeper's claim is in flight
            SessionState::PendingAuth | SessionState::Revoked => {}
        }
    }

    fn teardown(&self, session: &Session) {
        let Some(snapshot) = self.instance.remove_session(session) else {
            return;
        };
        // Stop records are best-effort; the session is already gone
        if let Err(e) = self.client.account(AcctEvent::Stop, &snapshot) {
            warn!(identity = %snapshot.identity, error = %e, "Accounting stop failed");
        }
    }

    fn try_initial_auth(&self, session: &Session, now_ms: u64) {
        if !session.begin_auth() {
            return;
        }
        let identity = Instance::identity(session);

        match self.client.authenticate(&identity) {
            Ok(AuthVerdict::Accept(grant)) => {
                session.mark_auth(now_ms);
                match self.instance.promote_session(session, &grant) {
                    Ok(_) => {
                        session.mark_acct(now_ms);
                        let snapshot = self.instance.acct_snapshot(session, &grant.user_id);
                        if let Err(e) = self.client.account(AcctEvent::Start, &snapshot) {
                            warn!(identity = %identity, error = %e, "Accounting start failed");
                        }
                    }
                    Err(e) => {
                        // Client table full; retry on a later sweep
                        warn!(identity = %identity, error = %e, "Promotion failed");
                        session.set_state(SessionState::Unauth);
                    }
                }
            }
            Ok(AuthVerdict::Reject) => {
                // Stays unauthenticated under the unauth limit
                session.mark_auth(now_ms);
                session.set_state(SessionState::Unauth);
                debug!(identity = %identity, "Authentication rejected");
            }
            Err(e) => {
                session.set_state(SessionState::Unauth);
                if e.is_recoverable() {
                    debug!(identity = %identity, error = %e, "Authentication retry pending");
                } else {
                    warn!(identity = %identity, error = %e, "Authentication failed");
                }
            }
        }
    }

    fn try_reauth(&self, session: &Session, now_ms: u64) {
        let identity = Instance::identity(session);
        match self.client.authenticate(&identity) {
            Ok(AuthVerdict::Accept(grant)) => {
                session.mark_auth(now_ms);
                if let Some(client) = session.client() {
                    let limit = self
                        .instance
                        .rules()
                        .current()
                        .limits_for(&grant.user_id)
                        .unwrap_or(grant.limit);
                    client.set_limits(limit);
                }
            }
            Ok(AuthVerdict::Reject) => {
                session.mark_auth(now_ms);
                session.set_state(SessionState::Revoked);
                info!(identity = %identity, "Session revoked");
            }
            Err(e) => {
                // Prior state stands; retried next sweep
                debug!(identity = %identity, error = %e, "Re-authentication retry pending");
            }
        }
    }

    fn try_interim_acct(&self, session: &Session, now_ms: u64) {
        let Some(client) = session.client() else {
            return;
        };
        let snapshot = self.instance.acct_snapshot(session, client.id());
        match self.client.account(AcctEvent::Interim, &snapshot) {
            Ok(()) => session.mark_acct(now_ms),
            Err(e) => {
                debug!(identity = %snapshot.identity, error = %e, "Interim accounting retry pending");
            }
        }
    }
}

/// Spawn the configured sweeper pool
pub fn spawn_pool(
    instance: &Arc<Instance>,
    client: &Arc<dyn RadiusClient>,
) -> Vec<JoinHandle<()>> {
    let pool_size = instance.config().overlord_threads;
    (0..pool_size)
        .map(|index| {
            Overlord::new(Arc::clone(instance), Arc::clone(client), index, pool_size).spawn()
        })
        .collect()
}
