//! Fan-out of one packet to every registered peer.
//!
//! Each delivery is followed by a heartbeat probe to the same peer. A probe
//! that cannot be written means the peer is gone, and it is evicted in the
//! same pass, so a dead peer stays visible for at most one fan-out cycle
//! without a separate heartbeat timer.

use crate::events::EventHook;
use crate::peer::PeerId;
use crate::registry::Registry;
use log::debug;
use shared::Packet;
use std::sync::Arc;
use tokio::sync::watch;

/// Outcome of one [`Broadcaster::broadcast`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers that accepted the packet
    pub delivered: usize,
    /// Peers whose write of the packet failed
    pub failed: Vec<PeerId>,
    /// Peers removed from the registry because their probe failed
    pub evicted: Vec<PeerId>,
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    events: EventHook,
    shutdown: watch::Receiver<bool>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>, events: EventHook, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            registry,
            events,
            shutdown,
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sends `packet` to every registered peer, the originator included.
    ///
    /// A failed write to one peer never stops delivery to the rest. Sends
    /// run over a snapshot, outside the registry lock.
    pub async fn broadcast(&self, packet: &Packet) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        if self.is_shutting_down() {
            debug!("Dropping {} broadcast during shutdown", packet.kind());
            return report;
        }

        let probe = Packet::heartbeat();
        for peer in self.registry.snapshot().await {
            match peer.send(packet).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    self.events.emit(format!(
                        "Error sending {} to {}: {}",
                        packet.kind(),
                        peer.username(),
                        e
                    ));
                    report.failed.push(peer.id());
                }
            }

            if peer.send(&probe).await.is_err() {
                // The read loop may have removed it already.
                if self.registry.remove(peer.id()).await.is_some() {
                    peer.close().await;
                    self.events.emit(format!(
                        "Disconnected client {} removed from list.",
                        peer.username()
                    ));
                    report.evicted.push(peer.id());
                }
            }
        }

        report
    }
}
