use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// One peer discovered on the LAN. Entries are refreshed in place on every
/// re-announcement and never evicted; only a restart clears the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: String,
    pub display_name: String,
    pub addr: IpAddr,
    pub tcp_port: u16,
    pub last_seen: u64,
}

impl PeerRecord {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.tcp_port)
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Concurrency-safe directory of known peers, keyed by peer id. Callers only
/// ever receive cloned snapshots; the lock is never held across I/O.
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, PeerRecord>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or refresh a peer. Returns true only the first time a given
    /// peer id is seen, so callers can announce new peers exactly once.
    pub async fn upsert(&self, record: PeerRecord) -> bool {
        let mut peers = self.peers.write().await;
        let is_new = !peers.contains_key(&record.peer_id);
        peers.insert(record.peer_id.clone(), record);
        is_new
    }

    pub async fn get(&self, peer_id: &str) -> Option<PeerRecord> {
        let peers = self.peers.read().await;
        peers.get(peer_id).cloned()
    }

    pub async fn list_all(&self) -> Vec<PeerRecord> {
        let peers = self.peers.read().await;
        peers.values().cloned().collect()
    }

    pub async fn peer_count(&self) -> usize {
        let peers = self.peers.read().await;
        peers.len()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
