//! Per-ring-pair worker thread
//!
//! One OS thread per LAN/WAN interface pair, optionally pinned to a
//! configured CPU core. The loop polls both rings with a bounded wait,
//! classifies direction by arrival ring, runs the forwarding decision
//! and moves allowed frames to the opposite ring. It never blocks on
//! anything but the ring poll and the short shard locks inside the
//! registry.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use super::pipeline::{admit, commit, rollback};
use super::stats::RingStats;
use super::transport::RingTransport;
use crate::error::TransportError;
use crate::instance::Instance;
use crate::packet::{parse_frame, Direction};

/// Worker for one LAN/WAN ring pair
pub struct RingWorker {
    instance: Arc<Instance>,
    lan: Box<dyn RingTransport>,
    wan: Box<dyn RingTransport>,
    stats: Arc<RingStats>,
    affinity: Option<usize>,
    poll_timeout: Duration,
}

impl RingWorker {
    /// Build a worker; its stats are registered on the instance
    #[must_use]
    pub fn new(
        instance: Arc<Instance>,
        lan: Box<dyn RingTransport>,
        wan: Box<dyn RingTransport>,
        affinity: Option<usize>,
    ) -> Self {
        let stats = Arc::new(RingStats::new(
            &lan.geometry().interface,
            &wan.geometry().interface,
        ));
        instance.register_ring_stats(Arc::clone(&stats));
        let poll_timeout = instance.config().timers.ring_poll_timeout();
        Self {
            instance,
            lan,
            wan,
            stats,
            affinity,
            poll_timeout,
        }
    }

    /// This worker's counters
    #[must_use]
    pub fn stats(&self) -> Arc<RingStats> {
        Arc::clone(&self.stats)
    }

    /// Spawn the worker thread
    pub fn spawn(self) -> JoinHandle<()> {
        let name = format!(
            "ring-{}-{}",
            self.lan.geometry().interface,
            self.wan.geometry().interface
        );
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .unwrap_or_else(|e| panic!("failed to spawn {name}: {e}"))
    }

    /// Worker loop; returns when shutdown is requested or both rings close
    pub fn run(mut self) {
        if let Some(core_id) = self.affinity {
            Self::pin_to_core(core_id);
        }
        info!(
            lan = %self.lan.geometry().interface,
            wan = %self.wan.geometry().interface,
            "Ring worker started"
        );

        // Split the bounded wait across both rings
        let half_wait = (self.poll_timeout / 2).max(Duration::from_millis(1));
        let mut lan_open = true;
        let mut wan_open = true;

        while !self.instance.is_aborted() && (lan_open || wan_open) {
            if lan_open {
                lan_open = self.poll_one(Direction::Egress, half_wait);
            }
            if wan_open {
                wan_open = self.poll_one(Direction::Ingress, half_wait);
            }
        }

        info!(
            lan = %self.lan.geometry().interface,
            wan = %self.wan.geometry().interface,
            "Ring worker stopped"
        );
    }

    /// Poll one ring and process at most one frame; false when the ring
    /// has closed
    fn poll_one(&mut self, dir: Direction, wait: Duration) -> bool {
        let rx = match dir {
            Direction::Egress => &mut self.lan,
            Direction::Ingress => &mut self.wan,
        };

        let packet = match rx.recv(wait) {
            Ok(Some(packet)) => packet,
            Ok(None) => return true,
            Err(TransportError::Closed) => {
                debug!(direction = %dir, "Ring closed");
                return false;
            }
            Err(e) => {
                warn!(direction = %dir, error = %e, "Ring receive error");
                return true;
            }
        };

        let frame_len = packet.len() as u64;
        self.stats.dir(dir).record_all(frame_len);

        let parsed = parse_frame(&packet.data);
        match admit(&self.instance, parsed.as_ref(), frame_len, dir) {
            Ok(admission) => {
                let tx = match dir {
                    Direction::Egress => &mut self.wan,
                    Direction::Ingress => &mut self.lan,
                };
                match tx.send(packet) {
                    Ok(()) => {
                        commit(&self.instance, &admission, frame_len, dir);
                        self.stats.dir(dir).record_passed(frame_len);
                    }
                    Err(e) => {
                        // The frame is lost; the charge must not stand
                        rollback(&self.instance, &admission, frame_len, dir);
                        warn!(direction = %dir, error = %e, "Transmit failed");
                    }
                }
            }
            Err(reason) => {
                trace!(direction = %dir, reason = ?reason, bytes = frame_len, "Packet dropped");
            }
        }
        true
    }

    fn pin_to_core(core_id: usize) {
        let Some(cores) = core_affinity::get_core_ids() else {
            warn!(core_id, "Cannot enumerate CPU cores, running unpinned");
            return;
        };
        match cores.into_iter().find(|c| c.id == core_id) {
            Some(core) => {
                if core_affinity::set_for_current(core) {
                    debug!(core_id, "Worker pinned");
                } else {
                    warn!(core_id, "Failed to pin worker");
                }
            }
            None => warn!(core_id, "Configured core does not exist, running unpinned"),
        }
    }
}
