//! Authoritative set of connected peers.
//!
//! The registry is the only state shared between connection tasks. Every
//! membership change goes through one exclusive lock, and readers that need
//! to do slow work per peer (sending) take a [`Registry::snapshot`] instead of
//! holding the lock across network writes.

use crate::peer::{PeerConnection, PeerId};
use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("peer id {0} is already registered")]
    DuplicateId(PeerId),
}

/// Insertion-ordered peers plus the id allocator.
///
/// Ids start at 1 and only grow, so an id is never handed out twice for the
/// lifetime of the registry.
#[derive(Debug)]
pub struct Registry {
    /// Connected peers in the order they registered
    peers: Mutex<Vec<Arc<PeerConnection>>>,
    /// Next id for a newly accepted connection
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Hands out the id for a freshly accepted connection.
    pub fn allocate_id(&self) -> PeerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers `peer` and returns how many peers were registered before it.
    ///
    /// The count is taken under the same lock as the insert, so two peers
    /// joining at once never observe the same value.
    pub async fn add(&self, peer: Arc<PeerConnection>) -> Result<usize, RegistryError> {
        let mut peers = self.peers.lock().await;
        if peers.iter().any(|p| p.id() == peer.id()) {
            return Err(RegistryError::DuplicateId(peer.id()));
        }

        let registered_before = peers.len();
        info!("Peer {} ({}) registered", peer.id(), peer.username());
        peers.push(peer);
        Ok(registered_before)
    }

    /// Removes a peer by id. Absent ids are not an error: the read loop and
    /// broadcast eviction may both try to remove the same peer.
    pub async fn remove(&self, id: PeerId) -> Option<Arc<PeerConnection>> {
        let mut peers = self.peers.lock().await;
        let index = peers.iter().position(|p| p.id() == id)?;
        let peer = peers.remove(index);
        info!("Peer {} ({}) unregistered", peer.id(), peer.username());
        Some(peer)
    }

    /// Point-in-time copy of the registered peers, in registration order.
    pub async fn snapshot(&self) -> Vec<Arc<PeerConnection>> {
        self.peers.lock().await.clone()
    }

    pub async fn contains(&self, id: PeerId) -> bool {
        self.peers.lock().await.iter().any(|p| p.id() == id)
    }

    pub async fn size(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }

    /// Empties the registry, returning everything that was in it.
    pub async fn drain(&self) -> Vec<Arc<PeerConnection>> {
        std::mem::take(&mut *self.peers.lock().await)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
