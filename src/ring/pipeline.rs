//! Per-packet forwarding decision
//!
//! A frame is admitted against every applicable limiting scope, in
//! order: the session scope (unauthenticated bucket, or the owning
//! client's bucket once authenticated), then the upstream p2p policer
//! for p2p-classified flows. Frames without a parseable IPv4 tuple fall
//! under the non-client aggregate scope. The first scope that denies
//! short-circuits; a charge already made at an earlier scope is
//! refunded on a later denial, so a dropped packet never leaves a
//! partial charge anywhere.
//!
//! Admission charges the buckets but records nothing: the worker
//! commits the forward after the transmit succeeds, or rolls the charge
//! back when the frame was lost to a transmit failure.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use tracing::trace;

use crate::instance::Instance;
use crate::packet::{Direction, ParsedPacket};
use crate::registry::{Client, Session, SessionState};

/// Why a packet was not forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Session table at capacity
    SessionTableFull,
    /// Session was revoked by a failed re-authentication
    Revoked,
    /// Session or client bucket denied the bytes
    RateLimited,
    /// Upstream p2p policer denied the bytes
    P2pThrottled,
    /// Non-client aggregate bucket denied the bytes
    NonClientLimited,
}

/// Forwarding decision for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Drop(DropReason),
}

/// An admitted frame's charge, kept until the transmit settles
///
/// Holds which scope was charged so the worker can record the forward
/// after a successful transmit, or return the charge after a failed one.
pub(crate) struct Admission {
    scope: Scope,
}

enum Scope {
    /// Exempt traffic is never charged
    Exempt,
    /// Charged to the non-client aggregate bucket
    NonClient,
    /// Charged to the session scope, and the p2p policer when classified
    Session {
        session: Arc<Session>,
        client: Option<Arc<Client>>,
        wan_ip: Ipv4Addr,
        p2p: bool,
    },
}

/// Admit one frame with the monotonic clock
pub(crate) fn admit(
    instance: &Instance,
    parsed: Option<&ParsedPacket>,
    frame_len: u64,
    dir: Direction,
) -> Result<Admission, DropReason> {
    admit_at(instance, parsed, frame_len, dir, instance.now_ms(), Instant::now())
}

/// Admit one frame at an explicit instant (test rigs)
pub(crate) fn admit_at(
    instance: &Instance,
    parsed: Option<&ParsedPacket>,
    frame_len: u64,
    dir: Direction,
    now_ms: u64,
    now: Instant,
) -> Result<Admission, DropReason> {
    let Some(parsed) = parsed else {
        if !instance.non_client_bucket(dir).try_consume_at(frame_len, now) {
            return Err(DropReason::NonClientLimited);
        }
        return Ok(Admission {
            scope: Scope::NonClient,
        });
    };

    let rules = instance.rules().current();
    let client_ip = parsed.client_ip(dir);

    if rules.is_exempt(client_ip) {
        return Ok(Admission {
            scope: Scope::Exempt,
        });
    }

    let session = match instance.get_or_create_session_at(client_ip, now_ms, now) {
        Ok(session) => session,
        Err(e) => {
            trace!(ip = %client_ip, error = %e, "Session creation denied");
            return Err(DropReason::SessionTableFull);
        }
    };
    session.touch(now_ms);

    if session.state() == SessionState::Revoked {
        return Err(DropReason::Revoked);
    }

    // Session scope: the owning client's shared bucket once authenticated,
    // the per-session unauthenticated bucket before that
    let client = session.client();
    let session_bucket = match &client {
        Some(client) => client.bucket(dir),
        None => session.bucket(dir),
    };
    if !session_bucket.try_consume_at(frame_len, now) {
        return Err(DropReason::RateLimited);
    }

    // Upstream p2p scope
    let wan_ip = parsed.client_ip(dir.opposite());
    let p2p = rules.is_p2p(parsed);
    if p2p && !instance.upstream_for(wan_ip).p2p(dir).try_consume_at(frame_len, now) {
        session_bucket.refund(frame_len);
        return Err(DropReason::P2pThrottled);
    }

    Ok(Admission {
        scope: Scope::Session {
            session,
            client,
            wan_ip,
            p2p,
        },
    })
}

/// Record an admitted frame as forwarded, after a successful transmit
pub(crate) fn commit(instance: &Instance, admission: &Admission, frame_len: u64, dir: Direction) {
    commit_at(instance, admission, frame_len, dir, Instant::now());
}

pub(crate) fn commit_at(
    instance: &Instance,
    admission: &Admission,
    frame_len: u64,
    dir: Direction,
    now: Instant,
) {
    match &admission.scope {
        Scope::Exempt => {}
        Scope::NonClient => instance.non_client_speed(dir).update_at(frame_len, now),
        Scope::Session {
            session,
            client,
            wan_ip,
            ..
        } => {
            session.record_forward(dir, frame_len, now);
            if let Some(client) = client {
                client.speed(dir).update_at(frame_len, now);
            }
            instance.upstream_for(*wan_ip).record_forward(dir, frame_len, now);
        }
    }
}

/// Return an admitted frame's charge, after a failed transmit lost it
pub(crate) fn rollback(instance: &Instance, admission: &Admission, frame_len: u64, dir: Direction) {
    match &admission.scope {
        Scope::Exempt => {}
        Scope::NonClient => instance.non_client_bucket(dir).refund(frame_len),
        Scope::Session {
            session,
            client,
            wan_ip,
            p2p,
        } => {
            let session_bucket = match client {
                Some(client) => client.bucket(dir),
                None => session.bucket(dir),
            };
            session_bucket.refund(frame_len);
            if *p2p {
                instance
                    .upstream_for(*wan_ip)
                    .p2p(dir)
                    .bucket()
                    .refund(frame_len);
            }
        }
    }
}

/// Evaluate one frame with the monotonic clock
#[must_use]
pub fn evaluate(
    instance: &Instance,
    parsed: Option<&ParsedPacket>,
    frame_len: u64,
    dir: Direction,
) -> Verdict {
    evaluate_at(instance, parsed, frame_len, dir, instance.now_ms(), Instant::now())
}

/// Evaluate one frame at an explicit instant (test rigs)
///
/// Admits and immediately commits; callers that can still lose the
/// frame use `admit`/`commit`/`rollback` instead.
#[must_use]
pub fn evaluate_at(
    instance: &Instance,
    parsed: Option<&ParsedPacket>,
    frame_len: u64,
    dir: Direction,
    now_ms: u64,
    now: Instant,
) -> Verdict {
    match admit_at(instance, parsed, frame_len, dir, now_ms, now) {
        Ok(admission) => {
            commit_at(instance, &admission, frame_len, dir, now);
            Verdict::Forward
        }
        Err(reason) => Verdict::Drop(reason),
    }
}
