//! Session lifecycle integration tests
//!
//! Overlord sweeps driving authentication, accounting and expiry against
//! the scripted AAA client, with simulated time throughout.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use flowgate::bridge::{AcctEvent, Script, ScriptedClient};
use flowgate::config::Config;
use flowgate::instance::Instance;
use flowgate::overlord::Overlord;
use flowgate::packet::{Direction, ParsedPacket};
use flowgate::ring::{evaluate_at, DropReason, Verdict};
use flowgate::{AuthGrant, PerDirection, RadiusClient, SessionState};

const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
const REMOTE: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

struct Rig {
    instance: Arc<Instance>,
    radius: Arc<ScriptedClient>,
    overlord: Overlord,
}

fn rig() -> Rig {
    let mut config = Config::default_config();
    config.limits.unauth_bw = PerDirection::new(1000, 1000);
    config.timers.session_timeout_ms = 300_000;
    config.timers.session_auth_interval_ms = 60_000;
    config.timers.session_acct_interval_ms = 30_000;

    let instance = Arc::new(Instance::new(Arc::new(config)));
    let radius = Arc::new(ScriptedClient::new());
    let overlord = Overlord::new(
        Arc::clone(&instance),
        Arc::clone(&radius) as Arc<dyn RadiusClient>,
        0,
        1,
    );
    Rig {
        instance,
        radius,
        overlord,
    }
}

fn packet() -> ParsedPacket {
    ParsedPacket {
        src_ip: CLIENT_IP,
        dst_ip: REMOTE,
        protocol: 6,
        src_port: Some(40000),
        dst_port: Some(443),
    }
}

fn accept(user_id: &str, bw: u64) -> Script {
    Script::Accept(AuthGrant {
        user_id: user_id.into(),
        limit: PerDirection::new(bw, bw),
    })
}

#[test]
fn test_mid_stream_promotion_switches_limits() {
    let r = rig();
    r.radius.script("10.0.0.5", accept("alice", 100_000));
    let p = packet();
    let t0 = Instant::now();

    // First packet creates the session and drains the 1000-byte unauth
    // bucket; the next is clipped
    assert_eq!(
        evaluate_at(&r.instance, Some(&p), 1000, Direction::Egress, 0, t0),
        Verdict::Forward
    );
    assert_eq!(
        evaluate_at(&r.instance, Some(&p), 500, Direction::Egress, 0, t0),
        Verdict::Drop(DropReason::RateLimited)
    );
    assert_eq!(r.instance.counters().unauth_sessions(), 1);

    // The sweep authenticates; subsequent packets run under the client
    // limit and the unauthenticated counter dropped at promotion
    r.overlord.sweep_at(1000);
    assert_eq!(r.instance.counters().unauth_sessions(), 0);
    assert_eq!(
        evaluate_at(&r.instance, Some(&p), 50_000, Direction::Egress, 1000, t0),
        Verdict::Forward
    );

    let session = r.instance.lookup_session(CLIENT_IP).unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(r.radius.acct_calls_of(AcctEvent::Start).len(), 1);
}

#[test]
fn test_revocation_denies_despite_remaining_tokens() {
    let r = rig();
    r.radius.script("10.0.0.5", accept("alice", 100_000));
    let p = packet();
    let t0 = Instant::now();

    evaluate_at(&r.instance, Some(&p), 100, Direction::Egress, 0, t0);
    r.overlord.sweep_at(1000);

    // Re-auth window elapses and the backend now rejects
    r.radius.script("10.0.0.5", Script::Reject);
    let session = r.instance.lookup_session(CLIENT_IP).unwrap();
    session.touch(61_500);
    r.overlord.sweep_at(61_500);

    // The client bucket is nearly full, but the session denies anyway
    assert_eq!(
        evaluate_at(&r.instance, Some(&p), 1, Direction::Egress, 61_600, t0),
        Verdict::Drop(DropReason::Revoked)
    );

    // The following sweep tears it down with an accounting stop
    r.overlord.sweep_at(62_500);
    assert!(r.instance.lookup_session(CLIENT_IP).is_none());
    assert_eq!(r.radius.acct_calls_of(AcctEvent::Stop).len(), 1);
}

#[test]
fn test_timeout_sweep_full_teardown() {
    let r = rig();
    r.radius.script("10.0.0.5", accept("alice", 100_000));
    let p = packet();
    let t0 = Instant::now();

    evaluate_at(&r.instance, Some(&p), 200, Direction::Egress, 0, t0);
    evaluate_at(&r.instance, Some(&p), 300, Direction::Egress, 0, t0);
    r.overlord.sweep_at(1000);
    assert_eq!(r.instance.counters().clients(), 1);

    // Idle past the session timeout
    r.overlord.sweep_at(302_000);

    assert!(r.instance.lookup_session(CLIENT_IP).is_none());
    assert!(r.instance.lookup_client("alice").is_none());
    assert_eq!(r.instance.counters().sessions(), 0);
    assert_eq!(r.instance.counters().clients(), 0);

    // The stop record carries the forwarded totals
    let stops = r.radius.acct_calls_of(AcctEvent::Stop);
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].snapshot.bytes.egress, 500);
    assert_eq!(stops[0].snapshot.packets.egress, 2);
    assert_eq!(stops[0].snapshot.user_id, "alice");
}

#[test]
fn test_interim_accounting_cadence() {
    let r = rig();
    r.radius.script("10.0.0.5", accept("alice", 100_000));
    let p = packet();
    let t0 = Instant::now();

    evaluate_at(&r.instance, Some(&p), 400, Direction::Egress, 0, t0);
    r.overlord.sweep_at(1000);

    // Keep the session alive across three acct intervals
    for (ms, expected_interims) in [(31_500, 1), (45_000, 1), (63_000, 2)] {
        let session = r.instance.lookup_session(CLIENT_IP).unwrap();
        session.touch(ms);
        r.overlord.sweep_at(ms);
        assert_eq!(
            r.radius.acct_calls_of(AcctEvent::Interim).len(),
            expected_interims,
            "at t={ms}ms"
        );
    }
}

#[test]
fn test_bridge_outage_preserves_state_until_timeout_backstop() {
    let r = rig();
    r.radius.script("10.0.0.5", Script::Unavailable);
    let p = packet();
    let t0 = Instant::now();

    evaluate_at(&r.instance, Some(&p), 100, Direction::Egress, 0, t0);

    // Repeated sweeps during the outage: session stays, attempts repeat
    for ms in [1000, 2000, 3000] {
        r.overlord.sweep_at(ms);
        let session = r.instance.lookup_session(CLIENT_IP).unwrap();
        assert_eq!(session.state(), SessionState::Unauth);
    }
    assert_eq!(r.radius.auth_calls().len(), 3);

    // The idle timeout is the backstop when the backend never recovers
    r.overlord.sweep_at(301_000);
    assert!(r.instance.lookup_session(CLIENT_IP).is_none());
    // Never authenticated, so no stop record
    assert!(r.radius.acct_calls_of(AcctEvent::Stop).is_empty());
}

#[test]
fn test_sessions_sharing_a_client_count_refs_exactly() {
    let r = rig();
    for host in [5u8, 6, 7] {
        r.radius
            .script(&format!("10.0.0.{host}"), accept("alice", 100_000));
    }
    let t0 = Instant::now();

    for host in [5u8, 6, 7] {
        let mut p = packet();
        p.src_ip = Ipv4Addr::new(10, 0, 0, host);
        evaluate_at(&r.instance, Some(&p), 10, Direction::Egress, 0, t0);
    }
    r.overlord.sweep_at(1000);

    let client = r.instance.lookup_client("alice").unwrap();
    assert_eq!(client.refs(), 3);
    assert_eq!(r.instance.counters().clients(), 1);

    // Two sessions idle out; the third keeps the client alive
    let survivor = r.instance.lookup_session(Ipv4Addr::new(10, 0, 0, 7)).unwrap();
    survivor.touch(301_000);
    r.overlord.sweep_at(301_500);

    assert_eq!(client.refs(), 1);
    assert!(r.instance.lookup_client("alice").is_some());

    r.overlord.sweep_at(700_000);
    assert!(r.instance.lookup_client("alice").is_none());
}
