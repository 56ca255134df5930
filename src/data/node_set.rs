//! Trie node mutation sets.
//!
//! The trie layer collects the nodes it dirtied while committing a block
//! into one [`NodeSet`] per trie (the account trie, owner = zero hash, and
//! one per touched storage trie) and hands them over, grouped into a
//! [`MergedNodeSet`], to the database.

use hashbrown::HashMap;
use primitive_types::H256;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};

use super::FastHashMap;
use crate::error::{Error, Result};
use crate::merkle::{keccak256, HASH_SIZE};

/// An encoded trie node together with its hash.
///
/// An empty blob marks a node deleted from the trie.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrieNode {
    /// Hash of the node (keccak of the blob); zero for deletions.
    pub hash: H256,
    /// Encoded node.
    pub blob: Vec<u8>,
}

impl TrieNode {
    /// Creates a node from an already known hash.
    pub fn new(hash: H256, blob: Vec<u8>) -> Self {
        Self { hash, blob }
    }

    /// Creates a node, hashing the blob.
    pub fn from_blob(blob: Vec<u8>) -> Self {
        Self {
            hash: H256(keccak256(&blob)),
            blob,
        }
    }

    /// The deletion marker.
    pub fn deleted() -> Self {
        Self {
            hash: H256::zero(),
            blob: Vec::new(),
        }
    }

    /// Returns true if this node marks a deletion.
    pub fn is_deleted(&self) -> bool {
        self.blob.is_empty()
    }

    /// Memory held by the node.
    pub fn size(&self) -> usize {
        self.blob.len() + HASH_SIZE
    }
}

/// An account leaf touched in the account trie.
///
/// Used to link the storage trie root embedded in `blob` to the trie node
/// that holds the leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Leaf {
    /// Encoded account.
    pub blob: Vec<u8>,
    /// Hash of the node holding the leaf.
    pub parent: H256,
}

/// Dirty nodes of a single trie, keyed by their nibble path.
#[derive(Clone, Debug)]
pub struct NodeSet {
    owner: H256,
    nodes: FastHashMap<Vec<u8>, TrieNode>,
    leaves: Vec<Leaf>,
    updates: usize,
    deletes: usize,
}

impl NodeSet {
    /// Creates an empty set for the trie identified by `owner`.
    pub fn new(owner: H256) -> Self {
        Self {
            owner,
            nodes: HashMap::with_hasher(FxBuildHasher),
            leaves: Vec::new(),
            updates: 0,
            deletes: 0,
        }
    }

    /// The trie this set belongs to; zero for the account trie.
    pub fn owner(&self) -> H256 {
        self.owner
    }

    /// Adds a node at `path`, replacing any earlier node there.
    pub fn add_node(&mut self, path: Vec<u8>, node: TrieNode) {
        let deleted = node.is_deleted();
        if let Some(prev) = self.nodes.insert(path, node) {
            if prev.is_deleted() {
                self.deletes -= 1;
            } else {
                self.updates -= 1;
            }
        }
        if deleted {
            self.deletes += 1;
        } else {
            self.updates += 1;
        }
    }

    /// Records an account leaf whose storage root must be linked to `parent`.
    pub fn add_leaf(&mut self, parent: H256, blob: Vec<u8>) {
        self.leaves.push(Leaf { blob, parent });
    }

    /// Folds `nodes` of the same trie into this set; later nodes win.
    pub fn merge(&mut self, owner: H256, nodes: FastHashMap<Vec<u8>, TrieNode>) -> Result<()> {
        if owner != self.owner {
            return Err(Error::OwnerMismatch {
                want: self.owner,
                got: owner,
            });
        }
        for (path, node) in nodes {
            self.add_node(path, node);
        }
        Ok(())
    }

    /// Returns the node at `path`.
    pub fn get(&self, path: &[u8]) -> Option<&TrieNode> {
        self.nodes.get(path)
    }

    /// All nodes by path.
    pub fn nodes(&self) -> &FastHashMap<Vec<u8>, TrieNode> {
        &self.nodes
    }

    /// The recorded account leaves.
    pub fn leaves(&self) -> &[Leaf] {
        &self.leaves
    }

    /// Number of nodes in the set.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the set holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns `(updated, deleted)` node counts.
    pub fn counts(&self) -> (usize, usize) {
        (self.updates, self.deletes)
    }

    /// Visits the nodes ordered by path, descending, so that every child
    /// is visited before its parent.
    pub fn for_each_with_order<F>(&self, mut f: F)
    where
        F: FnMut(&[u8], &TrieNode),
    {
        let mut paths: Vec<&Vec<u8>> = self.nodes.keys().collect();
        paths.sort_unstable_by(|a, b| b.cmp(a));
        for path in paths {
            if let Some(node) = self.nodes.get(path) {
                f(path, node);
            }
        }
    }

    /// Consumes the set, returning its nodes in the order of
    /// [`for_each_with_order`](Self::for_each_with_order) and the leaves.
    pub fn into_sorted(self) -> (Vec<(Vec<u8>, TrieNode)>, Vec<Leaf>) {
        let mut nodes: Vec<(Vec<u8>, TrieNode)> = self.nodes.into_iter().collect();
        nodes.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        (nodes, self.leaves)
    }

    /// Consumes the set, returning owner, nodes and leaves.
    pub fn into_parts(self) -> (H256, FastHashMap<Vec<u8>, TrieNode>, Vec<Leaf>) {
        (self.owner, self.nodes, self.leaves)
    }
}

/// Node sets of all tries touched by one state transition.
#[derive(Clone, Debug, Default)]
pub struct MergedNodeSet {
    sets: FastHashMap<H256, NodeSet>,
}

impl MergedNodeSet {
    /// Creates an empty merged set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a merged set holding `set`.
    pub fn with_set(set: NodeSet) -> Self {
        let mut merged = Self::new();
        merged.sets.insert(set.owner(), set);
        merged
    }

    /// Adds `set`, folding it into an existing set of the same owner.
    pub fn merge(&mut self, set: NodeSet) -> Result<()> {
        match self.sets.get_mut(&set.owner()) {
            Some(existing) => {
                let (owner, nodes, leaves) = set.into_parts();
                existing.merge(owner, nodes)?;
                existing.leaves.extend(leaves);
                Ok(())
            }
            None => {
                self.sets.insert(set.owner(), set);
                Ok(())
            }
        }
    }

    /// Returns the set of `owner`.
    pub fn get(&self, owner: &H256) -> Option<&NodeSet> {
        self.sets.get(owner)
    }

    /// All sets by owner.
    pub fn sets(&self) -> &FastHashMap<H256, NodeSet> {
        &self.sets
    }

    /// Number of tries in the set.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Returns true if no trie was touched.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Total number of nodes over all tries.
    pub fn node_count(&self) -> usize {
        self.sets.values().map(NodeSet::len).sum()
    }

    /// Consumes the merged set, returning storage tries first (by owner)
    /// and the account trie last.
    pub fn into_ordered(self) -> Vec<NodeSet> {
        let mut sets: Vec<NodeSet> = self.sets.into_values().collect();
        sets.sort_unstable_by(|a, b| {
            let a_account = a.owner().is_zero();
            let b_account = b.owner().is_zero();
            a_account.cmp(&b_account).then_with(|| a.owner().cmp(&b.owner()))
        });
        sets
    }

    /// Flattens into `owner → path → node`, dropping the leaves.
    pub fn flatten(self) -> FastHashMap<H256, FastHashMap<Vec<u8>, TrieNode>> {
        self.sets
            .into_iter()
            .map(|(owner, set)| (owner, set.nodes))
            .collect()
    }
}
