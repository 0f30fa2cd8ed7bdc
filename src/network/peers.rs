use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Soft cap on the number of peers a node tracks.
pub const MAX_PEERS: usize = 20;
/// Consecutive send failures after which a peer is skipped in broadcasts.
pub const MAX_FAILURES: u32 = 3;

/// The set of known `host:port` peers plus per-peer failure counters.
///
/// Mutated from many tasks (handlers, broadcast sends, the sync loop), so
/// all state sits behind one lock and every operation is atomic with
/// respect to the others.
pub struct PeerSet {
    self_address: String,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    peers: HashSet<String>,
    failures: HashMap<String, u32>,
}

impl PeerSet {
    pub fn new(self_address: String) -> PeerSet {
        PeerSet {
            self_address,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a peer address. Returns true only when the address was
    /// actually inserted: the node's own address, already-known peers and
    /// additions beyond [`MAX_PEERS`] are ignored.
    pub fn register(&self, address: &str) -> bool {
        if address == self.self_address {
            return false;
        }
        let mut inner = self.inner.write().unwrap();
        if inner.peers.contains(address) {
            return false;
        }
        if inner.peers.len() >= MAX_PEERS {
            return false;
        }
        inner.peers.insert(address.to_string())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.inner.read().unwrap().peers.contains(address)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().peers.is_empty()
    }

    pub fn all(&self) -> Vec<String> {
        self.inner.read().unwrap().peers.iter().cloned().collect()
    }

    /// Peers eligible for a broadcast: below the failure threshold and not
    /// the excluded sender. The caller shuffles the result before fanning
    /// out.
    pub fn broadcast_targets(&self, exclude: Option<&str>) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        inner
            .peers
            .iter()
            .filter(|peer| Some(peer.as_str()) != exclude)
            .filter(|peer| inner.failures.get(*peer).copied().unwrap_or(0) < MAX_FAILURES)
            .cloned()
            .collect()
    }

    /// A completed exchange wipes the peer's failure history.
    pub fn record_success(&self, address: &str) {
        let mut inner = self.inner.write().unwrap();
        inner.failures.insert(address.to_string(), 0);
    }

    /// Count one failed exchange and return the running total.
    pub fn record_failure(&self, address: &str) -> u32 {
        let mut inner = self.inner.write().unwrap();
        let count = inner.failures.entry(address.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn failures(&self, address: &str) -> u32 {
        self.inner
            .read()
            .unwrap()
            .failures
            .get(address)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_set() -> PeerSet {
        PeerSet::new("127.0.0.1:5000".to_string())
    }

    #[test]
    fn registers_new_peers_once() {
        let peers = peer_set();
        assert!(peers.register("127.0.0.1:5001"));
        assert!(!peers.register("127.0.0.1:5001"));
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn never_registers_self() {
        let peers = peer_set();
        assert!(!peers.register("127.0.0.1:5000"));
        assert!(peers.is_empty());
    }

    #[test]
    fn enforces_the_peer_cap() {
        let peers = peer_set();
        for port in 0..MAX_PEERS {
            assert!(peers.register(&format!("10.0.0.1:{}", 6000 + port)));
        }
        assert!(!peers.register("10.0.0.1:7000"));
        assert_eq!(peers.len(), MAX_PEERS);
    }

    #[test]
    fn broadcast_targets_skip_failing_peers_and_the_excluded_sender() {
        let peers = peer_set();
        peers.register("10.0.0.1:1");
        peers.register("10.0.0.1:2");
        peers.register("10.0.0.1:3");
        for _ in 0..MAX_FAILURES {
            peers.record_failure("10.0.0.1:2");
        }

        let targets = peers.broadcast_targets(Some("10.0.0.1:3"));
        assert_eq!(targets, vec!["10.0.0.1:1".to_string()]);
    }

    #[test]
    fn success_resets_the_failure_counter() {
        let peers = peer_set();
        peers.register("10.0.0.1:1");
        assert_eq!(peers.record_failure("10.0.0.1:1"), 1);
        assert_eq!(peers.record_failure("10.0.0.1:1"), 2);
        peers.record_success("10.0.0.1:1");
        assert_eq!(peers.failures("10.0.0.1:1"), 0);
    }

    #[test]
    fn failures_below_the_threshold_keep_a_peer_broadcastable() {
        let peers = peer_set();
        peers.register("10.0.0.1:1");
        for _ in 0..MAX_FAILURES - 1 {
            peers.record_failure("10.0.0.1:1");
        }
        assert_eq!(peers.broadcast_targets(None).len(), 1);
        peers.record_failure("10.0.0.1:1");
        assert!(peers.broadcast_targets(None).is_empty());
    }
}
