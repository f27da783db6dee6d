//! Control plane integration tests
//!
//! The JSON-line protocol over real TCP connections, driving a live
//! instance.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use flowgate::config::Config;
use flowgate::control;
use flowgate::instance::Instance;
use flowgate::packet::Direction;
use flowgate::ring::{evaluate, Verdict};
use flowgate::ParsedPacket;

async fn start_instance(f: impl FnOnce(&mut Config)) -> (Arc<Instance>, std::net::SocketAddr) {
    let mut config = Config::default_config();
    config.control.listen = "127.0.0.1:0".parse().unwrap();
    f(&mut config);
    let instance = Arc::new(Instance::new(Arc::new(config)));

    let listener = control::bind(&instance).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(control::serve(Arc::clone(&instance), listener));
    (instance, addr)
}

async fn send(addr: std::net::SocketAddr, line: &str) -> serde_json::Value {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    writer
        .write_all(format!("{line}\n").as_bytes())
        .await
        .unwrap();

    let reply = BufReader::new(reader)
        .lines()
        .next_line()
        .await
        .unwrap()
        .unwrap();
    serde_json::from_str(&reply).unwrap()
}

#[tokio::test]
async fn test_status_reflects_live_sessions() {
    let (instance, addr) = start_instance(|_| {}).await;
    instance
        .get_or_create_session(Ipv4Addr::new(10, 0, 0, 1))
        .unwrap();
    instance
        .get_or_create_session(Ipv4Addr::new(10, 0, 0, 2))
        .unwrap();

    let reply = send(addr, r#"{"command":"status"}"#).await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["data"]["sessions"], 2);
    assert_eq!(reply["data"]["unauth_sessions"], 2);
    assert_eq!(reply["data"]["rules_version"], 1);
}

#[tokio::test]
async fn test_rule_push_takes_effect_on_packet_path() {
    let (instance, addr) = start_instance(|config| {
        config.limits.unauth_bw = flowgate::PerDirection::new(0, 0);
        config.limits.upstream_p2p_bw = flowgate::PerDirection::new(100, 100);
    })
    .await;

    let p2p = ParsedPacket {
        src_ip: Ipv4Addr::new(10, 0, 0, 5),
        dst_ip: Ipv4Addr::new(1, 2, 3, 4),
        protocol: 6,
        src_port: Some(40000),
        dst_port: Some(6881),
    };

    // Before the push, 6881 is not classified and passes freely
    for _ in 0..5 {
        assert_eq!(
            evaluate(&instance, Some(&p2p), 100, Direction::Egress),
            Verdict::Forward
        );
    }

    let reply = send(
        addr,
        r#"{"command":"apply_rules","rules":{"p2p_ports":[6881]}}"#,
    )
    .await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["data"]["version"], 2);

    // Now the upstream p2p policer applies: one 100-byte bucket's worth,
    // then the throttle
    assert_eq!(
        evaluate(&instance, Some(&p2p), 100, Direction::Egress),
        Verdict::Forward
    );
    assert!(matches!(
        evaluate(&instance, Some(&p2p), 100, Direction::Egress),
        Verdict::Drop(_)
    ));
}

#[tokio::test]
async fn test_invalid_rule_push_is_rejected_atomically() {
    let (instance, addr) = start_instance(|_| {}).await;

    let reply = send(
        addr,
        r#"{"command":"apply_rules","rules":{"p2p_ports":[6881],"p2p_port_exceptions":[6881]}}"#,
    )
    .await;
    assert_eq!(reply["status"], "error");
    assert_eq!(instance.rules().version(), 1);
}

#[tokio::test]
async fn test_multiple_commands_on_one_connection() {
    let (_instance, addr) = start_instance(|_| {}).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    for _ in 0..3 {
        writer.write_all(b"{\"command\":\"ping\"}\n").await.unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert!(reply.contains(r#""status":"ok""#));
    }
}

#[tokio::test]
async fn test_get_stats_lists_registered_rings() {
    let (instance, addr) = start_instance(|_| {}).await;
    instance.register_ring_stats(Arc::new(flowgate::ring::RingStats::new("lan0", "wan0")));

    let reply = send(addr, r#"{"command":"get_stats"}"#).await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["data"]["rings"][0]["lan"], "lan0");
    assert_eq!(reply["data"]["rings"][0]["wan"], "wan0");
}

#[tokio::test]
async fn test_shutdown_command_raises_abort_flag() {
    let (instance, addr) = start_instance(|_| {}).await;
    let reply = send(addr, r#"{"command":"shutdown"}"#).await;
    assert_eq!(reply["status"], "ok");
    assert!(instance.is_aborted());
}
