use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::Balancer;

/// Virtual nodes per real address.
pub const DEFAULT_REPLICAS: u32 = 32;

/// Consistent-hash selection: a stable mapping from client identity to
/// server address that survives membership churn for most keys.
///
/// One [`Ring`] per method. Before each pick the ring is reconciled to
/// the current candidate set, then the client address is hashed and
/// placed on the ring.
pub struct ConsistentHashBalancer {
    rings: Mutex<HashMap<String, Ring>>,
}

impl ConsistentHashBalancer {
    pub fn new() -> Self {
        Self {
            rings: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for ConsistentHashBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for ConsistentHashBalancer {
    fn pick(&self, method: &str, client_addr: &str, addrs: &[String]) -> Option<String> {
        if addrs.is_empty() {
            return None;
        }
        let mut rings = self.rings.lock().unwrap();
        let ring = rings
            .entry(method.to_string())
            .or_insert_with(|| Ring::new(DEFAULT_REPLICAS));
        ring.update(addrs);
        ring.find(client_addr)
    }
}

/// A hash ring with virtual nodes.
///
/// Each real address owns `replicas` points on the ring, hashed from
/// `"<addr>#<i>"`. Points are 16-byte MD5 digests kept in a sorted
/// vector and compared lexicographically; equal digests keep insertion
/// order.
pub struct Ring {
    replicas: u32,
    virtual_hashes: Vec<[u8; 16]>,
    virtual_to_real: HashMap<[u8; 16], String>,
    real_to_virtual: HashMap<String, Vec<[u8; 16]>>,
    real: HashSet<String>,
}

impl Ring {
    pub fn new(replicas: u32) -> Self {
        Self {
            replicas,
            virtual_hashes: Vec::new(),
            virtual_to_real: HashMap::new(),
            real_to_virtual: HashMap::new(),
            real: HashSet::new(),
        }
    }

    /// Reconciles the ring to `addrs`: real nodes absent from the new
    /// set are removed, new ones added. Unchanged nodes keep their
    /// points.
    pub fn update(&mut self, addrs: &[String]) {
        let keep: HashSet<&String> = addrs.iter().collect();
        let stale: Vec<String> = self
            .real
            .iter()
            .filter(|addr| !keep.contains(addr))
            .cloned()
            .collect();
        for addr in stale {
            self.remove_node(&addr);
        }
        for addr in addrs {
            if !self.real.contains(addr) {
                self.add_node(addr);
            }
        }
    }

    /// Adds a real node and its `replicas` virtual points.
    pub fn add_node(&mut self, addr: &str) {
        if !self.real.insert(addr.to_string()) {
            return;
        }
        let points = self.real_to_virtual.entry(addr.to_string()).or_default();
        for i in 0..self.replicas {
            let h = hash_point(&format!("{}#{}", addr, i));
            let at = self.virtual_hashes.partition_point(|v| v <= &h);
            self.virtual_hashes.insert(at, h);
            self.virtual_to_real.insert(h, addr.to_string());
            points.push(h);
        }
    }

    /// Removes a real node and every virtual point it owns.
    pub fn remove_node(&mut self, addr: &str) {
        if !self.real.remove(addr) {
            return;
        }
        if let Some(points) = self.real_to_virtual.remove(addr) {
            for h in points {
                if let Ok(at) = self.virtual_hashes.binary_search(&h) {
                    self.virtual_hashes.remove(at);
                }
                self.virtual_to_real.remove(&h);
            }
        }
    }

    /// Maps a key to a real address: the least virtual point strictly
    /// greater than the key's hash, wrapping to the first point.
    pub fn find(&self, key: &str) -> Option<String> {
        if self.virtual_hashes.is_empty() {
            return None;
        }
        let h = hash_point(key);
        let at = self.virtual_hashes.partition_point(|v| v <= &h);
        let slot = if at == self.virtual_hashes.len() { 0 } else { at };
        self.virtual_to_real.get(&self.virtual_hashes[slot]).cloned()
    }

    pub fn real_len(&self) -> usize {
        self.real.len()
    }

    pub fn virtual_len(&self) -> usize {
        self.virtual_hashes.len()
    }
}

fn hash_point(s: &str) -> [u8; 16] {
    md5::compute(s.as_bytes()).0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn assert_invariants(ring: &Ring) {
        assert_eq!(ring.virtual_len(), ring.real_len() * ring.replicas as usize);
        assert!(ring.virtual_hashes.windows(2).all(|w| w[0] <= w[1]));
        for h in &ring.virtual_hashes {
            assert!(ring.virtual_to_real.contains_key(h));
        }
        for addr in &ring.real {
            assert_eq!(ring.real_to_virtual[addr].len(), ring.replicas as usize);
        }
    }

    #[test]
    fn test_ring_invariants_after_updates() {
        let mut ring = Ring::new(32);
        ring.update(&addrs(&["a", "b", "c"]));
        assert_invariants(&ring);

        ring.update(&addrs(&["a", "c", "d"]));
        assert_invariants(&ring);
        assert_eq!(ring.real_len(), 3);

        ring.update(&[]);
        assert_invariants(&ring);
        assert_eq!(ring.virtual_len(), 0);
    }

    #[test]
    fn test_find_returns_a_member() {
        let mut ring = Ring::new(32);
        ring.update(&addrs(&["a", "b", "c"]));
        for key in ["client-1", "client-2", "10.0.0.7:55012"] {
            let target = ring.find(key).unwrap();
            assert!(["a", "b", "c"].contains(&target.as_str()));
        }
    }

    #[test]
    fn test_mapping_is_stable_under_insertion_order() {
        let mut forward = Ring::new(32);
        for addr in ["tcp@a:1", "tcp@b:1", "tcp@c:1"] {
            forward.add_node(addr);
        }
        let mut backward = Ring::new(32);
        for addr in ["tcp@c:1", "tcp@b:1", "tcp@a:1"] {
            backward.add_node(addr);
        }
        for key in ["k1", "k2", "k3", "k4", "k5"] {
            assert_eq!(forward.find(key), backward.find(key));
        }
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let mut ring = Ring::new(32);
        ring.update(&addrs(&["a", "b", "c"]));
        let first = ring.find("fixed-client").unwrap();
        for _ in 0..10 {
            assert_eq!(ring.find("fixed-client").unwrap(), first);
        }
    }

    #[test]
    fn test_removed_node_is_never_returned() {
        let mut ring = Ring::new(32);
        ring.update(&addrs(&["a", "b", "c"]));

        let keys: Vec<String> = (0..64).map(|i| format!("client-{}", i)).collect();
        ring.remove_node("b");
        assert_invariants(&ring);
        for key in &keys {
            assert_ne!(ring.find(key).unwrap(), "b");
        }
    }

    #[test]
    fn test_most_keys_keep_their_node_on_removal() {
        let mut ring = Ring::new(32);
        ring.update(&addrs(&["a", "b", "c", "d"]));

        let keys: Vec<String> = (0..256).map(|i| format!("client-{}", i)).collect();
        let before: Vec<String> = keys.iter().map(|k| ring.find(k).unwrap()).collect();

        ring.remove_node("d");

        let moved = keys
            .iter()
            .zip(&before)
            .filter(|(k, was)| was.as_str() != "d" && ring.find(k).unwrap() != **was)
            .count();
        // Keys not owned by the removed node stay put.
        assert_eq!(moved, 0);
    }

    #[test]
    fn test_find_on_empty_ring() {
        let ring = Ring::new(32);
        assert_eq!(ring.find("anything"), None);
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let mut ring = Ring::new(32);
        ring.add_node("a");
        ring.add_node("a");
        assert_invariants(&ring);
        assert_eq!(ring.real_len(), 1);
    }

    #[test]
    fn test_balancer_reconciles_per_method() {
        let balancer = ConsistentHashBalancer::new();
        let candidates = addrs(&["a", "b", "c"]);

        let first = balancer.pick("Foo.Sum", "client", &candidates).unwrap();
        assert_eq!(
            balancer.pick("Foo.Sum", "client", &candidates).unwrap(),
            first
        );

        // Dropping the picked node reroutes the key.
        let remaining: Vec<String> = candidates
            .iter()
            .filter(|a| **a != first)
            .cloned()
            .collect();
        let rerouted = balancer.pick("Foo.Sum", "client", &remaining).unwrap();
        assert_ne!(rerouted, first);
        assert!(remaining.contains(&rerouted));
    }
}
