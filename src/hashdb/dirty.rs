//! Reference counted cache of dirty hash-scheme nodes.
//!
//! Every cached node tracks how many live edges point at it. Edges come
//! from two places: the children resolved from a node's own blob when it
//! is inserted, and explicit `reference` calls (root holds with a zero
//! parent, cross-trie links such as account leaf → storage root).
//!
//! When a count drops to zero the node releases its own edges and moves
//! to the eviction index, ordered by insertion sequence. It stays readable
//! until [`DirtyCache::evict`] drops it. Referencing it again before that
//! revives it together with the subtree it had released.

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use primitive_types::H256;
use rustc_hash::FxBuildHasher;

use crate::data::{FastHashMap, StorageSize};
use crate::merkle::HASH_SIZE;

const EDGE_SIZE: StorageSize = StorageSize(HASH_SIZE as u64);

/// A node held in the dirty cache.
#[derive(Clone, Debug)]
pub(super) struct CachedNode {
    pub(super) blob: Vec<u8>,
    /// Number of live edges pointing at this node.
    pub(super) parents: u32,
    /// Stored children resolved from the blob.
    pub(super) children: Vec<H256>,
    /// Children linked through `reference`.
    pub(super) external: Vec<H256>,
    /// Already written to the byte store.
    pub(super) durable: bool,
    /// False once the node has released its edges on reaching zero.
    pub(super) holds_children: bool,
    pub(super) seq: u64,
}

impl CachedNode {
    fn size(&self) -> StorageSize {
        StorageSize::from(HASH_SIZE + self.blob.len())
    }

    fn edges(&self) -> impl Iterator<Item = H256> + '_ {
        self.children.iter().chain(self.external.iter()).copied()
    }
}

/// Garbage collection and flush counters, reset when reported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(super) struct GcStats {
    pub(super) gc_nodes: u64,
    pub(super) gc_size: StorageSize,
    pub(super) flush_nodes: u64,
    pub(super) flush_size: StorageSize,
}

pub(super) struct DirtyCache {
    nodes: FastHashMap<H256, CachedNode>,
    /// Every cached node by insertion sequence; the flush order.
    order: BTreeMap<u64, H256>,
    /// Nodes with a zero count by insertion sequence; the eviction order.
    evictable: BTreeMap<u64, H256>,
    next_seq: u64,
    nodes_size: StorageSize,
    edges_size: StorageSize,
    pub(super) stats: GcStats,
}

impl DirtyCache {
    pub(super) fn new() -> Self {
        Self {
            nodes: HashMap::with_hasher(FxBuildHasher),
            order: BTreeMap::new(),
            evictable: BTreeMap::new(),
            next_seq: 0,
            nodes_size: StorageSize::ZERO,
            edges_size: StorageSize::ZERO,
            stats: GcStats::default(),
        }
    }

    pub(super) fn get(&self, hash: &H256) -> Option<&CachedNode> {
        self.nodes.get(hash)
    }

    pub(super) fn contains(&self, hash: &H256) -> bool {
        self.nodes.contains_key(hash)
    }

    pub(super) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Memory held by blobs, hashes and external edges.
    pub(super) fn size(&self) -> StorageSize {
        self.nodes_size + self.edges_size
    }

    pub(super) fn is_evictable(&self, hash: &H256) -> bool {
        self.nodes
            .get(hash)
            .map_or(false, |node| self.evictable.contains_key(&node.seq))
    }

    /// Inserts a node with zero parents, taking one reference on each of
    /// its cached `children`. Returns false if the node was already cached.
    pub(super) fn insert(&mut self, hash: H256, blob: Vec<u8>, children: Vec<H256>) -> bool {
        if self.nodes.contains_key(&hash) {
            return false;
        }
        for child in &children {
            self.acquire(*child);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let node = CachedNode {
            blob,
            parents: 0,
            children,
            external: Vec::new(),
            durable: false,
            holds_children: true,
            seq,
        };
        self.nodes_size += node.size();
        self.order.insert(seq, hash);
        self.nodes.insert(hash, node);
        true
    }

    /// Adds a live edge to `child`. A zero `parent` is a root hold and
    /// always counts; any other parent counts once per child.
    pub(super) fn reference(&mut self, child: H256, parent: H256) {
        if !self.nodes.contains_key(&child) {
            return;
        }
        if parent.is_zero() {
            self.acquire(child);
            return;
        }
        let Some(node) = self.nodes.get_mut(&parent) else {
            return;
        };
        if node.external.contains(&child) {
            return;
        }
        node.external.push(child);
        let holds = node.holds_children;
        self.edges_size += EDGE_SIZE;

        // A released parent re-acquires its edges when revived.
        if holds {
            self.acquire(child);
        }
    }

    /// Edges that `reference(child, parent)` would re-acquire through
    /// released nodes but that are no longer cached. Empty when the call
    /// would revive nothing.
    pub(super) fn revival_gaps(&self, child: H256, parent: H256) -> Vec<H256> {
        if !self.nodes.contains_key(&child) {
            return Vec::new();
        }
        if !parent.is_zero() {
            match self.nodes.get(&parent) {
                Some(node) if node.holds_children && !node.external.contains(&child) => {}
                _ => return Vec::new(),
            }
        }
        let mut gaps = Vec::new();
        let mut visited: HashSet<H256, FxBuildHasher> = HashSet::with_hasher(FxBuildHasher);
        let mut stack = vec![child];
        while let Some(hash) = stack.pop() {
            if !visited.insert(hash) {
                continue;
            }
            match self.nodes.get(&hash) {
                Some(node) if !node.holds_children => stack.extend(node.edges()),
                Some(_) => {}
                None => gaps.push(hash),
            }
        }
        gaps
    }

    fn acquire(&mut self, hash: H256) {
        let mut stack = vec![hash];
        while let Some(hash) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&hash) else {
                continue;
            };
            node.parents += 1;
            if !node.holds_children {
                node.holds_children = true;
                self.evictable.remove(&node.seq);
                stack.extend(node.edges());
            }
        }
    }

    /// Drops one reference from `root`. Nodes reaching zero release their
    /// edges and become evictable. Returns the number of released nodes.
    pub(super) fn dereference(&mut self, root: H256) -> usize {
        let mut released = 0;
        let mut stack = vec![root];
        while let Some(hash) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&hash) else {
                continue;
            };
            node.parents = node.parents.saturating_sub(1);
            if node.parents == 0 && node.holds_children {
                node.holds_children = false;
                self.evictable.insert(node.seq, hash);
                stack.extend(node.edges());
                released += 1;
            }
        }
        released
    }

    /// Evicts zero-count nodes oldest first until the cache fits in
    /// `limit`. Returns the number of evicted nodes.
    pub(super) fn evict(&mut self, limit: StorageSize) -> usize {
        let mut evicted = 0;
        while self.size() > limit {
            let Some((_, hash)) = self.evictable.pop_first() else {
                break;
            };
            if let Some(node) = self.remove(&hash) {
                self.stats.gc_nodes += 1;
                self.stats.gc_size += node.size();
                evicted += 1;
            }
        }
        evicted
    }

    /// Live nodes, oldest first, whose removal brings the cache under `limit`.
    pub(super) fn flush_candidates(&self, limit: StorageSize) -> Vec<H256> {
        let mut size = self.size();
        let mut picked = Vec::new();
        for hash in self.order.values() {
            if size <= limit {
                break;
            }
            if let Some(node) = self.nodes.get(hash) {
                size = size.saturating_sub(node.size() + edges_size(node));
                picked.push(*hash);
            }
        }
        picked
    }

    /// Removes a node from the cache without touching any count.
    pub(super) fn remove(&mut self, hash: &H256) -> Option<CachedNode> {
        let node = self.nodes.remove(hash)?;
        self.order.remove(&node.seq);
        self.evictable.remove(&node.seq);
        self.nodes_size -= node.size();
        self.edges_size -= edges_size(&node);
        Some(node)
    }

    /// Nodes reachable from `root` that are not yet durable, children
    /// before parents. Durable nodes are not descended into: they were
    /// written together with their subtree.
    pub(super) fn unwritten_from(&self, root: H256) -> Vec<H256> {
        let mut out = Vec::new();
        let mut visited: HashSet<H256, FxBuildHasher> = HashSet::with_hasher(FxBuildHasher);
        let mut stack = vec![(root, false)];

        while let Some((hash, expanded)) = stack.pop() {
            if expanded {
                out.push(hash);
                continue;
            }
            if !visited.insert(hash) {
                continue;
            }
            let Some(node) = self.nodes.get(&hash) else {
                continue;
            };
            if node.durable {
                continue;
            }
            stack.push((hash, true));
            for child in node.edges() {
                if !visited.contains(&child) {
                    stack.push((child, false));
                }
            }
        }
        out
    }

    pub(super) fn mark_durable(&mut self, hashes: &[H256]) {
        for hash in hashes {
            if let Some(node) = self.nodes.get_mut(hash) {
                node.durable = true;
            }
        }
    }
}

fn edges_size(node: &CachedNode) -> StorageSize {
    StorageSize::from(node.external.len() * HASH_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    /// root(3) -> mid(2) -> leaf(1)
    fn chain() -> DirtyCache {
        let mut cache = DirtyCache::new();
        cache.insert(h(1), vec![1; 10], vec![]);
        cache.insert(h(2), vec![2; 10], vec![h(1)]);
        cache.insert(h(3), vec![3; 10], vec![h(2)]);
        cache
    }

    #[test]
    fn test_insert_counts_children() {
        let mut cache = chain();
        assert_eq!(cache.get(&h(1)).unwrap().parents, 1);
        assert_eq!(cache.get(&h(2)).unwrap().parents, 1);
        assert_eq!(cache.get(&h(3)).unwrap().parents, 0);
        assert_eq!(cache.size(), StorageSize::from(3 * (32 + 10)));

        // Re-inserting is a no-op.
        assert!(!cache.insert(h(2), vec![9], vec![]));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_dereference_releases_subtree() {
        let mut cache = chain();
        cache.reference(h(3), H256::zero());
        assert_eq!(cache.dereference(h(3)), 3);
        for byte in 1..=3 {
            assert!(cache.is_evictable(&h(byte)));
            assert_eq!(cache.get(&h(byte)).unwrap().parents, 0);
        }

        // Oldest first: the leaf goes before its parents.
        let limit = StorageSize::from(2 * (32 + 10));
        assert_eq!(cache.evict(limit), 1);
        assert!(!cache.contains(&h(1)));
        assert!(cache.contains(&h(2)));
        assert_eq!(cache.stats.gc_nodes, 1);
    }

    #[test]
    fn test_shared_child_survives() {
        let mut cache = chain();
        // A second root sharing mid.
        cache.insert(h(4), vec![4; 10], vec![h(2)]);
        cache.reference(h(3), H256::zero());
        cache.reference(h(4), H256::zero());

        cache.dereference(h(3));
        assert!(cache.is_evictable(&h(3)));
        assert!(!cache.is_evictable(&h(2)));
        assert_eq!(cache.get(&h(2)).unwrap().parents, 1);

        cache.evict(StorageSize::ZERO);
        assert!(!cache.contains(&h(3)));
        assert!(cache.contains(&h(2)));
        assert!(cache.contains(&h(1)));
    }

    #[test]
    fn test_external_edge_counted_once() {
        let mut cache = chain();
        cache.insert(h(9), vec![9; 10], vec![]);
        cache.reference(h(9), h(3));
        cache.reference(h(9), h(3));
        assert_eq!(cache.get(&h(9)).unwrap().parents, 1);
        assert_eq!(cache.size(), StorageSize::from(4 * (32 + 10) + 32));

        // Released through the parent.
        cache.dereference(h(3));
        assert!(cache.is_evictable(&h(9)));
    }

    #[test]
    fn test_reference_revives_released_subtree() {
        let mut cache = chain();
        cache.reference(h(3), H256::zero());
        cache.dereference(h(3));
        assert!(cache.is_evictable(&h(1)));

        cache.reference(h(3), H256::zero());
        for byte in 1..=3 {
            assert!(!cache.is_evictable(&h(byte)));
        }
        assert_eq!(cache.get(&h(1)).unwrap().parents, 1);
        assert_eq!(cache.get(&h(3)).unwrap().parents, 1);
    }

    #[test]
    fn test_revival_gaps_after_eviction() {
        let mut cache = chain();
        cache.reference(h(3), H256::zero());
        assert!(cache.revival_gaps(h(3), H256::zero()).is_empty());

        cache.dereference(h(3));
        assert!(cache.revival_gaps(h(3), H256::zero()).is_empty());

        // The leaf goes first, leaving mid pointing at nothing.
        cache.evict(StorageSize::from(2 * (32 + 10)));
        assert_eq!(cache.revival_gaps(h(3), H256::zero()), vec![h(1)]);
        assert_eq!(cache.revival_gaps(h(2), H256::zero()), vec![h(1)]);

        // A released parent re-acquires nothing.
        assert!(cache.revival_gaps(h(2), h(3)).is_empty());
        assert!(cache.revival_gaps(h(9), H256::zero()).is_empty());
    }

    #[test]
    fn test_unwritten_from_post_order() {
        let mut cache = chain();
        assert_eq!(cache.unwritten_from(h(3)), vec![h(1), h(2), h(3)]);

        cache.mark_durable(&[h(1), h(2)]);
        assert_eq!(cache.unwritten_from(h(3)), vec![h(3)]);
        assert!(cache.unwritten_from(h(7)).is_empty());
    }

    #[test]
    fn test_flush_candidates_in_insertion_order() {
        let cache = chain();
        let one = StorageSize::from(32 + 10);
        assert_eq!(cache.flush_candidates(one + one), vec![h(1)]);
        assert_eq!(cache.flush_candidates(StorageSize::ZERO), vec![h(1), h(2), h(3)]);
        assert!(cache.flush_candidates(cache.size()).is_empty());
    }
}
