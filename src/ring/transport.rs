//! Ring transport boundary
//!
//! The packet path consumes rings through the [`RingTransport`] trait:
//! poll for a received frame, submit a frame for transmission, and
//! report static geometry for diagnostics. Kernel-bypass backends
//! (netmap and friends) implement this trait out of tree; the in-tree
//! [`MemoryRing`] backs tests, demos and loopback deployments with a
//! bounded in-process queue pair.

use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use serde::Serialize;

use crate::error::TransportError;

/// One frame moving through a ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
}

impl Packet {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Frame length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Static ring geometry for diagnostic display
#[derive(Debug, Clone, Serialize)]
pub struct RingGeometry {
    /// Interface this ring is bound to
    pub interface: String,
    /// Ring index on the interface
    pub ring_id: u16,
    /// Slots per ring
    pub slots: usize,
    /// Backing memory in bytes
    pub memory_bytes: usize,
}

/// One receive/transmit ring bound to an interface
pub trait RingTransport: Send {
    /// Poll for the next received frame, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` when the wait elapses with nothing available.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` when the ring is gone.
    fn recv(&mut self, timeout: Duration) -> Result<Option<Packet>, TransportError>;

    /// Submit a frame for transmission
    ///
    /// # Errors
    ///
    /// Returns `TransportError::TxQueueFull` when the transmit queue has
    /// no free slot; the caller drops the frame.
    fn send(&mut self, packet: Packet) -> Result<(), TransportError>;

    /// Static geometry of this ring
    fn geometry(&self) -> RingGeometry;
}

/// Maximum frame size the in-memory backend accepts
const MAX_FRAME: usize = 2048;

/// In-process ring backed by a bounded queue pair
#[derive(Debug)]
pub struct MemoryRing {
    interface: String,
    ring_id: u16,
    slots: usize,
    rx: Receiver<Packet>,
    tx: SyncSender<Packet>,
}

impl MemoryRing {
    /// Create a ring and its wire-side peer
    ///
    /// The ring is handed to a worker; the peer stands in for the wire,
    /// injecting received frames and draining transmitted ones.
    #[must_use]
    pub fn with_peer(interface: &str, ring_id: u16, slots: usize) -> (Self, MemoryRingPeer) {
        let (wire_tx, ring_rx) = sync_channel(slots);
        let (ring_tx, wire_rx) = sync_channel(slots);
        (
            Self {
                interface: interface.to_string(),
                ring_id,
                slots,
                rx: ring_rx,
                tx: ring_tx,
            },
            MemoryRingPeer {
                tx: wire_tx,
                rx: wire_rx,
            },
        )
    }
}

impl RingTransport for MemoryRing {
    fn recv(&mut self, timeout: Duration) -> Result<Option<Packet>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(packet) => Ok(Some(packet)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn send(&mut self, packet: Packet) -> Result<(), TransportError> {
        match self.tx.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::TxQueueFull {
                ring_id: self.ring_id,
            }),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::Closed),
        }
    }

    fn geometry(&self) -> RingGeometry {
        RingGeometry {
            interface: self.interface.clone(),
            ring_id: self.ring_id,
            slots: self.slots,
            memory_bytes: self.slots * MAX_FRAME,
        }
    }
}

/// Wire-side endpoint of a [`MemoryRing`]
#[derive(Debug)]
pub struct MemoryRingPeer {
    tx: SyncSender<Packet>,
    rx: Receiver<Packet>,
}

impl MemoryRingPeer {
    /// Make a frame arrive on the ring
    ///
    /// # Errors
    ///
    /// Returns `TransportError::TxQueueFull` when the receive queue is
    /// full and `Closed` when the ring side is gone.
    pub fn inject(&self, data: Vec<u8>) -> Result<(), TransportError> {
        match self.tx.try_send(Packet::new(data)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::TxQueueFull { ring_id: 0 }),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::Closed),
        }
    }

    /// Take the next frame the ring transmitted, if any
    #[must_use]
    pub fn try_take(&self) -> Option<Packet> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for a transmitted frame
    #[must_use]
    pub fn take_timeout(&self, timeout: Duration) -> Option<Packet> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Drain every transmitted frame currently queued
    #[must_use]
    pub fn drain(&self) -> Vec<Packet> {
        std::iter::from_fn(|| self.try_take()).collect()
    }
}
