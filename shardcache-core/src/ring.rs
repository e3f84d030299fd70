//! Consistent hash ring mapping keys to node addresses
//!
//! Each real node contributes `replicas` virtual positions on a 32-bit
//! ring, computed with CRC32. A key is owned by the node at the first
//! position clockwise from the key's own hash. Virtual replicas smooth
//! the load distribution and bound remapping on membership change to
//! roughly 1/N of the keyspace.
//!
//! The ring is a pure routing index: it knows nothing about liveness.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

/// Virtual replicas per real node. 100-150 gives good balance.
pub const DEFAULT_REPLICAS: usize = 150;

#[derive(Debug, Default)]
struct RingState {
    /// Ring positions in ascending order.
    positions: Vec<u32>,
    /// Position to owning real address.
    owners: HashMap<u32, String>,
}

impl RingState {
    fn rebuild_positions(&mut self) {
        self.positions = self.owners.keys().copied().collect();
        self.positions.sort_unstable();
    }
}

/// Consistent hash ring over node addresses.
///
/// Reads (`get_node`, `nodes`) run concurrently under a shared lock;
/// membership changes take the exclusive lock.
#[derive(Debug)]
pub struct HashRing {
    replicas: usize,
    state: RwLock<RingState>,
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        assert!(replicas > 0, "a ring needs at least one replica per node");
        Self {
            replicas,
            state: RwLock::new(RingState::default()),
        }
    }

    fn position(bytes: &[u8]) -> u32 {
        crc32fast::hash(bytes)
    }

    /// Add a real node, inserting one position per virtual replica.
    ///
    /// Idempotent: re-adding a present address is a no-op, so callers
    /// cannot corrupt the ring with duplicate replicas.
    pub fn add_node(&self, addr: &str) {
        let mut state = self.state.write();
        if state.owners.values().any(|owner| owner == addr) {
            return;
        }
        for i in 0..self.replicas {
            let position = Self::position(format!("{}-{}", addr, i).as_bytes());
            state.owners.insert(position, addr.to_string());
        }
        state.rebuild_positions();
    }

    /// Remove a node and every one of its virtual positions.
    pub fn remove_node(&self, addr: &str) {
        let mut state = self.state.write();
        state.owners.retain(|_, owner| owner != addr);
        state.rebuild_positions();
    }

    /// The address owning `key`, or `None` if the ring is empty.
    ///
    /// Deterministic for a fixed membership: the first stored position
    /// at or after the key's hash wins, wrapping to the smallest
    /// position when the hash exceeds them all.
    pub fn get_node(&self, key: &str) -> Option<String> {
        let state = self.state.read();
        if state.positions.is_empty() {
            return None;
        }
        let hash = Self::position(key.as_bytes());
        let idx = state.positions.partition_point(|&position| position < hash);
        let position = if idx == state.positions.len() {
            state.positions[0]
        } else {
            state.positions[idx]
        };
        state.owners.get(&position).cloned()
    }

    /// De-duplicated real addresses currently on the ring.
    pub fn nodes(&self) -> Vec<String> {
        let state = self.state.read();
        let set: BTreeSet<&String> = state.owners.values().collect();
        set.into_iter().cloned().collect()
    }

    /// Number of distinct real nodes.
    pub fn len(&self) -> usize {
        let state = self.state.read();
        state.owners.values().collect::<BTreeSet<_>>().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().positions.is_empty()
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const NODE_A: &str = "10.0.0.1:7000";
    const NODE_B: &str = "10.0.0.2:7000";
    const NODE_C: &str = "10.0.0.3:7000";

    fn three_node_ring() -> HashRing {
        let ring = HashRing::new(DEFAULT_REPLICAS);
        ring.add_node(NODE_A);
        ring.add_node(NODE_B);
        ring.add_node(NODE_C);
        ring
    }

    #[test]
    fn empty_ring_has_no_owner() {
        let ring = HashRing::new(DEFAULT_REPLICAS);
        assert_eq!(ring.get_node("any-key"), None);
        assert!(ring.is_empty());
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn get_node_returns_a_member() {
        let ring = three_node_ring();
        let members = ring.nodes();
        assert_eq!(members.len(), 3);
        for i in 0..100 {
            let owner = ring.get_node(&format!("key-{}", i)).unwrap();
            assert!(members.contains(&owner));
        }
    }

    #[test]
    fn get_node_is_deterministic() {
        let ring = three_node_ring();
        for i in 0..100 {
            let key = format!("key-{}", i);
            let first = ring.get_node(&key);
            for _ in 0..5 {
                assert_eq!(ring.get_node(&key), first);
            }
        }
    }

    #[test]
    fn distribution_is_roughly_balanced() {
        let ring = three_node_ring();
        let mut counts: HashMap<String, usize> = HashMap::new();
        let total = 10_000;
        for i in 0..total {
            let owner = ring.get_node(&format!("key-{}", i)).unwrap();
            *counts.entry(owner).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        for (node, count) in counts {
            let share = count as f64 / total as f64;
            assert!(
                (0.20..=0.45).contains(&share),
                "node {} owns {:.1}% of keys",
                node,
                share * 100.0
            );
        }
    }

    #[test]
    fn removing_other_node_keeps_owner() {
        let ring = three_node_ring();
        let key = "test-key";
        let owner = ring.get_node(key).unwrap();

        let other = [NODE_A, NODE_B, NODE_C]
            .into_iter()
            .find(|&node| node != owner)
            .unwrap();
        ring.remove_node(other);

        assert_eq!(ring.get_node(key).unwrap(), owner);
    }

    #[test]
    fn removed_node_never_owns_keys() {
        let ring = three_node_ring();
        ring.remove_node(NODE_B);
        assert_eq!(ring.len(), 2);
        for i in 0..1000 {
            let owner = ring.get_node(&format!("key-{}", i)).unwrap();
            assert_ne!(owner, NODE_B);
        }
    }

    #[test]
    fn addition_remaps_a_minority_of_keys() {
        let ring = HashRing::new(DEFAULT_REPLICAS);
        ring.add_node(NODE_A);
        ring.add_node(NODE_B);

        let keys: Vec<String> = (0..1000).map(|i| format!("key-{}", i)).collect();
        let before: Vec<String> = keys.iter().map(|k| ring.get_node(k).unwrap()).collect();

        ring.add_node(NODE_C);

        let unchanged = keys
            .iter()
            .zip(&before)
            .filter(|(key, owner)| ring.get_node(key).as_ref() == Some(owner))
            .count();
        assert!(
            unchanged >= 600,
            "only {} of 1000 keys kept their owner",
            unchanged
        );
    }

    #[test]
    fn add_node_is_idempotent() {
        let ring = HashRing::new(DEFAULT_REPLICAS);
        ring.add_node(NODE_A);
        let positions_before = ring.state.read().positions.len();

        ring.add_node(NODE_A);
        assert_eq!(ring.state.read().positions.len(), positions_before);
        assert_eq!(ring.len(), 1);
    }
}
