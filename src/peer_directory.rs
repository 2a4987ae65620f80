//! Peer directory (spec §4.6): device-id → last-known endpoint map with
//! derived liveness.
//!
//! Grounded directly on `lan/discovery.rs`'s `DiscoveredPeers` type
//! (`Arc<parking_lot::RwLock<HashMap<String, DiscoveredPeer>>>`) and its
//! `upsert_peer`/`get_discovered_peers` pair — same ownership shape, same
//! crate, adapted from a flat peer struct to the spec's richer
//! `{device_id, device_name, address, tcp_port, discovery_port,
//! last_seen_utc}` record.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;

/// A peer is online iff its last-seen timestamp is within this many
/// milliseconds of now (spec §3, §5).
pub const OFFLINE_THRESHOLD_MS: u64 = 7000;

#[derive(Debug, Clone, Serialize)]
pub struct Peer {
    pub device_id: String,
    pub device_name: String,
    pub address: IpAddr,
    pub tcp_port: u16,
    pub discovery_port: u16,
    /// Milliseconds since the Unix epoch, UTC.
    pub last_seen_ms: u64,
}

impl Peer {
    /// Derived liveness; never persisted (spec §3).
    pub fn is_online_at(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) <= OFFLINE_THRESHOLD_MS
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone, Default)]
pub struct PeerDirectory {
    inner: Arc<RwLock<HashMap<String, Peer>>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        PeerDirectory {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or refresh a peer record. Callers are responsible for the
    /// self-filter (dropping datagrams whose `deviceId` is the local
    /// node's own identity) before calling this.
    pub fn upsert(
        &self,
        device_id: String,
        device_name: String,
        address: IpAddr,
        tcp_port: u16,
        discovery_port: u16,
        last_seen_ms: u64,
    ) {
        let mut peers = self.inner.write();
        peers.insert(
            device_id.clone(),
            Peer {
                device_id,
                device_name,
                address,
                tcp_port,
                discovery_port,
                last_seen_ms,
            },
        );
    }

    pub fn get(&self, device_id: &str) -> Option<Peer> {
        self.inner.read().get(device_id).cloned()
    }

    /// A stable snapshot of all known peers. Entries are never removed
    /// implicitly (spec §3); offline peers remain present with a stale
    /// `last_seen_ms`.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.inner.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample_addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50))
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let dir = PeerDirectory::new();
        dir.upsert("dev-1".into(), "laptop".into(), sample_addr(), 40124, 40123, 1000);
        let peer = dir.get("dev-1").unwrap();
        assert_eq!(peer.device_name, "laptop");
        assert_eq!(peer.tcp_port, 40124);
    }

    #[test]
    fn upsert_refreshes_last_seen_in_place() {
        let dir = PeerDirectory::new();
        dir.upsert("dev-1".into(), "laptop".into(), sample_addr(), 40124, 40123, 1000);
        dir.upsert("dev-1".into(), "laptop".into(), sample_addr(), 40124, 40123, 5000);
        assert_eq!(dir.get("dev-1").unwrap().last_seen_ms, 5000);
        assert_eq!(dir.snapshot().len(), 1);
    }

    #[test]
    fn liveness_threshold_is_inclusive_at_7000ms() {
        let peer = Peer {
            device_id: "dev-1".into(),
            device_name: "laptop".into(),
            address: sample_addr(),
            tcp_port: 40124,
            discovery_port: 40123,
            last_seen_ms: 1000,
        };
        assert!(peer.is_online_at(1000 + OFFLINE_THRESHOLD_MS));
        assert!(!peer.is_online_at(1000 + OFFLINE_THRESHOLD_MS + 1));
    }

    #[test]
    fn snapshot_contains_all_peers_regardless_of_liveness() {
        let dir = PeerDirectory::new();
        dir.upsert("dev-1".into(), "a".into(), sample_addr(), 1, 2, 0);
        dir.upsert("dev-2".into(), "b".into(), sample_addr(), 1, 2, now_ms());
        assert_eq!(dir.snapshot().len(), 2);
    }
}
