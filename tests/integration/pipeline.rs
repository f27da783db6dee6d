//! Packet-path integration tests
//!
//! Frames injected through real ring workers and the in-memory
//! transport, verifying shaping, counters and shard independence.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flowgate::config::Config;
use flowgate::instance::Instance;
use flowgate::packet::{Direction, ParsedPacket};
use flowgate::ring::{evaluate_at, DropReason, MemoryRing, RingWorker, Verdict};
use flowgate::rules::RuleSet;
use flowgate::PerDirection;

use super::udp_frame;

const CLIENT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
const REMOTE: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

fn make_instance(f: impl FnOnce(&mut Config)) -> Arc<Instance> {
    let mut config = Config::default_config();
    config.timers.ring_poll_timeout_ms = 5;
    f(&mut config);
    Arc::new(Instance::new(Arc::new(config)))
}

struct Gateway {
    instance: Arc<Instance>,
    lan: flowgate::ring::MemoryRingPeer,
    wan: flowgate::ring::MemoryRingPeer,
    stats: Arc<flowgate::ring::RingStats>,
    handle: std::thread::JoinHandle<()>,
}

impl Gateway {
    fn start(instance: Arc<Instance>) -> Self {
        let (lan_ring, lan) = MemoryRing::with_peer("lan0", 0, 256);
        let (wan_ring, wan) = MemoryRing::with_peer("wan0", 0, 256);
        let worker = RingWorker::new(
            Arc::clone(&instance),
            Box::new(lan_ring),
            Box::new(wan_ring),
            None,
        );
        let stats = worker.stats();
        let handle = worker.spawn();
        Self {
            instance,
            lan,
            wan,
            stats,
            handle,
        }
    }

    fn wait_processed(&self, dir: Direction, count: u64) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while self.stats.dir(dir).all_packets() < count {
            assert!(Instant::now() < deadline, "packets not processed in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn stop(self) {
        self.instance.request_shutdown();
        self.handle.join().unwrap();
    }
}

#[test]
fn test_bidirectional_forwarding() {
    let gw = Gateway::start(make_instance(|_| {}));

    let out = udp_frame(CLIENT, REMOTE, 40000, 53, 64);
    let back = udp_frame(REMOTE, CLIENT, 53, 40000, 128);
    gw.lan.inject(out.clone()).unwrap();
    gw.wan.inject(back.clone()).unwrap();

    assert_eq!(
        gw.wan.take_timeout(Duration::from_secs(2)).unwrap().data,
        out
    );
    assert_eq!(
        gw.lan.take_timeout(Duration::from_secs(2)).unwrap().data,
        back
    );

    // Both directions key to the same LAN-side session
    assert_eq!(gw.instance.counters().sessions(), 1);
    gw.stop();
}

#[test]
fn test_unauth_burst_clipped_with_counter_divergence() {
    // 1000 B/s unauth limit, five 442-byte frames at once: two pass,
    // three drop, and the all/passed counters record the difference.
    let gw = Gateway::start(make_instance(|config| {
        config.limits.unauth_bw = PerDirection::new(1000, 1000);
    }));

    let frame = udp_frame(CLIENT, REMOTE, 40000, 53, 400);
    for _ in 0..5 {
        gw.lan.inject(frame.clone()).unwrap();
    }
    gw.wait_processed(Direction::Egress, 5);

    let snap = gw.stats.snapshot();
    assert_eq!(snap.all_packets.egress, 5);
    assert_eq!(snap.passed_packets.egress, 2);
    assert_eq!(
        snap.all_bytes.egress - snap.passed_bytes.egress,
        3 * frame.len() as u64
    );
    assert_eq!(gw.wan.drain().len(), 2);
    gw.stop();
}

#[test]
fn test_non_ip_frames_fall_under_non_client_scope() {
    let gw = Gateway::start(make_instance(|config| {
        // 100 B/s aggregate for unattributable traffic
        config.limits.non_client_bw = PerDirection::new(100, 100);
    }));

    // 60-byte ARP-ish frames; two exceed the 100-byte bucket
    let mut arp = vec![0u8; 60];
    arp[12] = 0x08;
    arp[13] = 0x06;
    gw.lan.inject(arp.clone()).unwrap();
    gw.lan.inject(arp.clone()).unwrap();
    gw.wait_processed(Direction::Egress, 2);

    let snap = gw.stats.snapshot();
    assert_eq!(snap.passed_packets.egress, 1);
    // No session was created for unparseable traffic
    assert_eq!(gw.instance.counters().sessions(), 0);
    gw.stop();
}

#[test]
fn test_sessions_in_different_shards_are_independent() {
    // .1 and .2 land in different shards; saturating one leaves the
    // other's full budget intact.
    let gw = Gateway::start(make_instance(|config| {
        config.limits.unauth_bw = PerDirection::new(500, 500);
    }));

    let a = Ipv4Addr::new(10, 0, 0, 1);
    let b = Ipv4Addr::new(10, 0, 0, 2);
    let big = udp_frame(a, REMOTE, 1, 2, 400);
    let other = udp_frame(b, REMOTE, 1, 2, 400);

    gw.lan.inject(big.clone()).unwrap();
    gw.lan.inject(big.clone()).unwrap(); // over a's budget
    gw.lan.inject(other.clone()).unwrap(); // b unaffected
    gw.wait_processed(Direction::Egress, 3);

    let forwarded = gw.wan.drain();
    assert_eq!(forwarded.len(), 2);
    assert!(forwarded.iter().any(|p| p.data == other));
    assert_eq!(gw.instance.counters().sessions(), 2);
    gw.stop();
}

#[test]
fn test_p2p_throttle_window_held_through_refill() {
    // Simulated time against the decision function: once the upstream
    // p2p bucket exhausts, p2p traffic stays denied for the full 120s
    // window even though the bucket refills after one second.
    let instance = make_instance(|config| {
        config.limits.unauth_bw = PerDirection::new(0, 0);
        config.limits.upstream_p2p_bw = PerDirection::new(1000, 1000);
        config.rules = RuleSet {
            p2p_ports: [6881].into_iter().collect(),
            ..RuleSet::default()
        };
    });

    let p2p = ParsedPacket {
        src_ip: CLIENT,
        dst_ip: REMOTE,
        protocol: 6,
        src_port: Some(40000),
        dst_port: Some(6881),
    };
    let start = Instant::now();

    assert_eq!(
        evaluate_at(&instance, Some(&p2p), 1000, Direction::Egress, 0, start),
        Verdict::Forward
    );
    assert_eq!(
        evaluate_at(&instance, Some(&p2p), 1000, Direction::Egress, 0, start),
        Verdict::Drop(DropReason::P2pThrottled)
    );

    for secs in [10u64, 30, 60, 119] {
        let t = start + Duration::from_secs(secs);
        assert_eq!(
            evaluate_at(&instance, Some(&p2p), 1, Direction::Egress, secs * 1000, t),
            Verdict::Drop(DropReason::P2pThrottled),
            "expected denial at t+{secs}s"
        );
    }

    let after = start + Duration::from_secs(121);
    assert_eq!(
        evaluate_at(&instance, Some(&p2p), 1000, Direction::Egress, 121_000, after),
        Verdict::Forward
    );

    // Non-p2p traffic was never throttled
    let plain = ParsedPacket {
        dst_port: Some(443),
        ..p2p
    };
    assert_eq!(
        evaluate_at(&instance, Some(&plain), 1000, Direction::Egress, 121_000, after),
        Verdict::Forward
    );
}

#[test]
fn test_token_bucket_refill_contract_through_pipeline() {
    // Unauth buckets have capacity C equal to their rate R = 100 B/s:
    // after draining, denied until C/R = 1s of simulated time passes,
    // then exactly C bytes fit again.
    let instance = make_instance(|config| {
        config.limits.unauth_bw = PerDirection::new(100, 100);
    });
    let p = ParsedPacket {
        src_ip: CLIENT,
        dst_ip: REMOTE,
        protocol: 17,
        src_port: Some(1),
        dst_port: Some(2),
    };
    let start = Instant::now();

    assert_eq!(
        evaluate_at(&instance, Some(&p), 100, Direction::Egress, 0, start),
        Verdict::Forward
    );
    assert_eq!(
        evaluate_at(&instance, Some(&p), 100, Direction::Egress, 0, start),
        Verdict::Drop(DropReason::RateLimited)
    );

    let half = start + Duration::from_millis(500);
    assert_eq!(
        evaluate_at(&instance, Some(&p), 100, Direction::Egress, 500, half),
        Verdict::Drop(DropReason::RateLimited)
    );

    let full = start + Duration::from_secs(1);
    assert_eq!(
        evaluate_at(&instance, Some(&p), 100, Direction::Egress, 1000, full),
        Verdict::Forward
    );
    assert_eq!(
        evaluate_at(&instance, Some(&p), 1, Direction::Egress, 1000, full),
        Verdict::Drop(DropReason::RateLimited)
    );
}
