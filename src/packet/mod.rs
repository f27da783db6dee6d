//! Flow direction model and minimal packet header parsing
//!
//! The gateway only needs the addressing tuple of each frame: source and
//! destination IPv4 address, transport protocol and ports. Everything else
//! is forwarded opaquely.

use std::net::Ipv4Addr;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Number of flow directions
pub const DIR_COUNT: usize = 2;

/// Flow direction relative to the LAN clients
///
/// LAN→WAN traffic is egress (upload), WAN→LAN traffic is ingress
/// (download). The direction is determined by the ring a frame arrives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// WAN → LAN (download)
    Ingress,
    /// LAN → WAN (upload)
    Egress,
}

impl Direction {
    /// All directions, for iteration
    pub const ALL: [Self; DIR_COUNT] = [Self::Ingress, Self::Egress];

    /// Array index for this direction
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Ingress => 0,
            Self::Egress => 1,
        }
    }

    /// The opposite direction
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Ingress => Self::Egress,
            Self::Egress => Self::Ingress,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingress => write!(f, "ingress"),
            Self::Egress => write!(f, "egress"),
        }
    }
}

/// A pair of values indexed by [`Direction`]
///
/// Used for everything the gateway keeps per direction: token buckets,
/// speed meters, counters, configured limits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerDirection<T> {
    /// WAN → LAN value
    pub ingress: T,
    /// LAN → WAN value
    pub egress: T,
}

impl<T> PerDirection<T> {
    /// Create a pair from explicit values
    pub const fn new(ingress: T, egress: T) -> Self {
        Self { ingress, egress }
    }

    /// Create a pair by invoking `f` once per direction
    pub fn from_fn(mut f: impl FnMut(Direction) -> T) -> Self {
        Self {
            ingress: f(Direction::Ingress),
            egress: f(Direction::Egress),
        }
    }

    /// Iterate over `(direction, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (Direction, &T)> {
        [
            (Direction::Ingress, &self.ingress),
            (Direction::Egress, &self.egress),
        ]
        .into_iter()
    }
}

impl<T> Index<Direction> for PerDirection<T> {
    type Output = T;

    fn index(&self, dir: Direction) -> &T {
        match dir {
            Direction::Ingress => &self.ingress,
            Direction::Egress => &self.egress,
        }
    }
}

impl<T> IndexMut<Direction> for PerDirection<T> {
    fn index_mut(&mut self, dir: Direction) -> &mut T {
        match dir {
            Direction::Ingress => &mut self.ingress,
            Direction::Egress => &mut self.egress,
        }
    }
}

/// Minimal parse result for an IPv4 frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPacket {
    /// IPv4 source address
    pub src_ip: Ipv4Addr,
    /// IPv4 destination address
    pub dst_ip: Ipv4Addr,
    /// IP protocol number (6 = TCP, 17 = UDP)
    pub protocol: u8,
    /// Transport source port, when the protocol carries ports
    pub src_port: Option<u16>,
    /// Transport destination port, when the protocol carries ports
    pub dst_port: Option<u16>,
}

impl ParsedPacket {
    /// The LAN-side client address for this flow
    ///
    /// For egress (LAN→WAN) the client is the source; for ingress
    /// (WAN→LAN) the client is the destination.
    #[must_use]
    pub const fn client_ip(&self, dir: Direction) -> Ipv4Addr {
        match dir {
            Direction::Egress => self.src_ip,
            Direction::Ingress => self.dst_ip,
        }
    }
}

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

/// Parse the IPv4 addressing tuple out of an Ethernet frame
///
/// Handles one optional 802.1Q VLAN tag. Returns `None` for non-IPv4
/// frames and for frames too short to carry the claimed headers; the
/// caller decides whether such frames fall under the non-client scope or
/// are dropped as malformed.
#[must_use]
pub fn parse_frame(frame: &[u8]) -> Option<ParsedPacket> {
    if frame.len() < ETH_HEADER_LEN {
        return None;
    }

    let mut offset = ETH_HEADER_LEN;
    let mut ethertype = u16::from_be_bytes([frame[12], frame[13]]);

    if ethertype == ETHERTYPE_VLAN {
        if frame.len() < ETH_HEADER_LEN + VLAN_TAG_LEN {
            return None;
        }
        ethertype = u16::from_be_bytes([frame[16], frame[17]]);
        offset += VLAN_TAG_LEN;
    }

    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }

    parse_ipv4(&frame[offset..])
}

/// Parse the addressing tuple out of a bare IPv4 packet
#[must_use]
pub fn parse_ipv4(packet: &[u8]) -> Option<ParsedPacket> {
    if packet.len() < 20 {
        return None;
    }

    let version = packet[0] >> 4;
    if version != 4 {
        return None;
    }

    let ihl = usize::from(packet[0] & 0x0f) * 4;
    if ihl < 20 || packet.len() < ihl {
        return None;
    }

    let protocol = packet[9];
    let src_ip = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dst_ip = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);

    let (src_port, dst_port) = match protocol {
        IPPROTO_TCP | IPPROTO_UDP if packet.len() >= ihl + 4 => {
            let sp = u16::from_be_bytes([packet[ihl], packet[ihl + 1]]);
            let dp = u16::from_be_bytes([packet[ihl + 2], packet[ihl + 3]]);
            (Some(sp), Some(dp))
        }
        _ => (None, None),
    };

    Some(ParsedPacket {
        src_ip,
        dst_ip,
        protocol,
        src_port,
        dst_port,
    })
}
