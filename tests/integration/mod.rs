//! Integration tests for flowgate
//!
//! End-to-end scenarios exercising the packet path, the session
//! lifecycle and the control plane together.
//!
//! # Test Organization
//!
//! - `pipeline`: frames through real ring workers, shaping and counters
//! - `lifecycle`: overlord-driven authentication, accounting and expiry
//! - `control`: the JSON-line control protocol over TCP
//!
//! All tests use the in-memory ring backend and the scripted AAA client;
//! none require network access or privileges.

mod control;
mod lifecycle;
mod pipeline;

use std::net::Ipv4Addr;

/// Build an Ethernet + IPv4 + UDP frame with `payload_len` zero bytes
pub fn udp_frame(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    sport: u16,
    dport: u16,
    payload_len: usize,
) -> Vec<u8> {
    let total_len = 20 + 8 + payload_len;
    let mut frame = Vec::with_capacity(14 + total_len);

    // Ethernet header: dst/src MAC + IPv4 ethertype
    frame.extend_from_slice(&[0u8; 12]);
    frame.extend_from_slice(&0x0800u16.to_be_bytes());

    // IPv4 header
    frame.push(0x45);
    frame.push(0);
    frame.extend_from_slice(&(total_len as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0, 0]);
    frame.push(64);
    frame.push(17); // UDP
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&src.octets());
    frame.extend_from_slice(&dst.octets());

    // UDP header
    frame.extend_from_slice(&sport.to_be_bytes());
    frame.extend_from_slice(&dport.to_be_bytes());
    frame.extend_from_slice(&((8 + payload_len) as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0]);

    frame.extend(std::iter::repeat(0).take(payload_len));
    frame
}
