//! Change fan-out from the store tree to every connection task.
//!
//! Each applied mutation is announced once on a tokio broadcast channel as
//! the path that changed. Connection tasks re-read their overlapping
//! subscriptions from the tree and push fresh snapshots. A receiver that
//! lags behind loses individual announcements but not state: it resends
//! every subscription it holds.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use scribble_core::StorePath;
use tokio::sync::{broadcast, RwLock};

/// A path whose value changed, and the connection that changed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: StorePath,
    /// `0` for changes made by the server itself.
    pub origin: u64,
}

/// Connected peer, as seen by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub connection_id: u64,
    pub addr: SocketAddr,
    /// Unix millis.
    pub connected_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub changes_sent: u64,
    pub changes_dropped: u64,
    pub active_peers: usize,
}

struct AtomicBroadcastStats {
    changes_sent: AtomicU64,
    changes_dropped: AtomicU64,
}

/// Shared change channel plus the registry of connected peers.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<ChangeEvent>>,
    peers: RwLock<HashMap<u64, PeerInfo>>,
    capacity: usize,
    stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    /// `capacity` bounds how far a slow connection may fall behind before
    /// it starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            peers: RwLock::new(HashMap::new()),
            capacity,
            stats: AtomicBroadcastStats {
                changes_sent: AtomicU64::new(0),
                changes_dropped: AtomicU64::new(0),
            },
        }
    }

    /// Register a peer and hand back its change receiver.
    pub async fn add_peer(&self, info: PeerInfo) -> broadcast::Receiver<Arc<ChangeEvent>> {
        let mut peers = self.peers.write().await;
        peers.insert(info.connection_id, info);
        self.sender.subscribe()
    }

    pub async fn remove_peer(&self, connection_id: u64) -> Option<PeerInfo> {
        self.peers.write().await.remove(&connection_id)
    }

    /// Announce a change. Returns how many receivers were reached.
    pub fn announce(&self, path: StorePath, origin: u64) -> usize {
        let count = self
            .sender
            .send(Arc::new(ChangeEvent { path, origin }))
            .unwrap_or(0);
        self.stats.changes_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Record announcements a lagging receiver skipped.
    pub fn record_dropped(&self, skipped: u64) {
        self.stats.changes_dropped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn has_peer(&self, connection_id: u64) -> bool {
        self.peers.read().await.contains_key(&connection_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            changes_sent: self.stats.changes_sent.load(Ordering::Relaxed),
            changes_dropped: self.stats.changes_dropped.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
