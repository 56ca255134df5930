//! Aggregated writes of flattened diff layers.
//!
//! Diff layers merged into the disk layer land in a [`NodeBuffer`] first
//! and are written to the byte store in one batch once the buffer grows
//! past its limit, amortizing the write cost over many transitions.

use std::time::Instant;

use hashbrown::HashMap;
use primitive_types::H256;
use rustc_hash::FxBuildHasher;
use tracing::debug;

use super::NodeMap;
use crate::cache::CleanCache;
use crate::data::{StorageSize, TrieNode};
use crate::error::{Error, Result};
use crate::store::{schema, Batch, KeyValueStore};

fn node_size(path: &[u8], node: &TrieNode) -> u64 {
    (path.len() + node.blob.len()) as u64
}

pub(super) struct NodeBuffer {
    /// Number of transitions merged since the last flush.
    layers: u64,
    size: u64,
    limit: u64,
    nodes: NodeMap,
}

impl NodeBuffer {
    pub(super) fn new(limit: u64, nodes: NodeMap, layers: u64) -> Self {
        let size = nodes
            .values()
            .flat_map(|subset| subset.iter())
            .map(|(path, node)| node_size(path, node))
            .sum();
        Self {
            layers,
            size,
            limit,
            nodes,
        }
    }

    pub(super) fn empty(limit: u64) -> Self {
        Self::new(limit, HashMap::with_hasher(FxBuildHasher), 0)
    }

    /// Looks up a buffered node, verifying its hash.
    pub(super) fn node(&self, owner: &H256, path: &[u8], hash: &H256) -> Result<Option<Vec<u8>>> {
        let Some(node) = self.nodes.get(owner).and_then(|subset| subset.get(path)) else {
            return Ok(None);
        };
        if node.hash != *hash {
            return Err(Error::UnexpectedNode {
                location: "dirty",
                owner: *owner,
                path: path.to_vec(),
                want: *hash,
                got: node.hash,
            });
        }
        Ok(Some(node.blob.clone()))
    }

    /// Merges the nodes of one transition.
    pub(super) fn commit(&mut self, nodes: &NodeMap) {
        let mut size = self.size as i64;
        for (owner, subset) in nodes {
            let current = self
                .nodes
                .entry(*owner)
                .or_insert_with(|| HashMap::with_hasher(FxBuildHasher));
            for (path, node) in subset {
                match current.insert(path.clone(), node.clone()) {
                    Some(prev) => size += node.blob.len() as i64 - prev.blob.len() as i64,
                    None => size += node_size(path, node) as i64,
                }
            }
        }
        self.size = size.max(0) as u64;
        self.layers += 1;
    }

    /// Undoes the newest merged transition with its reverse `nodes`.
    ///
    /// A node missing from the buffer must already be on disk with the
    /// same hash: it was marked dirty by the trie without being changed.
    /// Everything is validated before the buffer is touched.
    pub(super) fn revert(&mut self, db: &dyn KeyValueStore, nodes: NodeMap) -> Result<()> {
        if self.layers == 0 {
            return Err(Error::HistoryUnavailable(
                "no transition left in the node buffer".into(),
            ));
        }
        if self.layers == 1 {
            self.reset();
            return Ok(());
        }

        let mut updates = Vec::new();
        for (owner, subset) in nodes {
            for (path, node) in subset {
                let buffered = self.nodes.get(&owner).map_or(false, |s| s.contains_key(&path));
                if buffered {
                    updates.push((owner, path, node));
                    continue;
                }
                let on_disk = schema::read_trie_node(db, &owner, &path)?
                    .map(|blob| TrieNode::from_blob(blob).hash);
                if on_disk != Some(node.hash) {
                    return Err(Error::Corrupted(format!(
                        "reverting unknown node {:?} at {path:?} in trie {owner:?}",
                        node.hash
                    )));
                }
            }
        }

        let mut size = self.size as i64;
        for (owner, path, node) in updates {
            if let Some(current) = self.nodes.get_mut(&owner) {
                if let Some(prev) = current.insert(path, node.clone()) {
                    size += node.blob.len() as i64 - prev.blob.len() as i64;
                }
            }
        }
        self.size = size.max(0) as u64;
        self.layers -= 1;
        Ok(())
    }

    /// Number of merged transitions; zero means nothing to flush.
    pub(super) fn layers(&self) -> u64 {
        self.layers
    }

    pub(super) fn is_empty(&self) -> bool {
        self.layers == 0
    }

    pub(super) fn size(&self) -> StorageSize {
        StorageSize(self.size)
    }

    pub(super) fn limit(&self) -> u64 {
        self.limit
    }

    pub(super) fn set_limit(&mut self, limit: u64) {
        self.limit = limit;
    }

    pub(super) fn nodes(&self) -> &NodeMap {
        &self.nodes
    }

    pub(super) fn reset(&mut self) {
        self.layers = 0;
        self.size = 0;
        self.nodes = HashMap::with_hasher(FxBuildHasher);
    }

    /// Writes every buffered node and the new persistent state `id` in one
    /// batch if the buffer is over its limit or `force` is set. The buffer
    /// is kept intact if the write fails.
    pub(super) fn flush(
        &mut self,
        db: &dyn KeyValueStore,
        cleans: &CleanCache<Vec<u8>>,
        id: u64,
        force: bool,
    ) -> Result<bool> {
        if (self.size <= self.limit && !force) || (self.layers == 0 && self.nodes.is_empty()) {
            return Ok(false);
        }
        let head = schema::read_persistent_state_id(db)?;
        if head + self.layers != id {
            return Err(Error::invariant(format!(
                "buffer layers ({}) cannot be applied on top of persisted state id ({head}) to reach requested state id ({id})",
                self.layers
            )));
        }

        let start = Instant::now();
        let mut batch = Batch::new();
        let count = write_nodes(&mut batch, &self.nodes);
        schema::write_persistent_state_id(&mut batch, id);
        let size = StorageSize::from(batch.value_size());
        db.write_batch(batch)?;
        cache_nodes(cleans, &self.nodes);

        debug!(
            nodes = count,
            size = %size,
            id,
            elapsed = ?start.elapsed(),
            "persisted path-scheme nodes"
        );
        self.reset();
        Ok(true)
    }
}

/// Queues writes and deletions for `nodes`.
pub(super) fn write_nodes(batch: &mut Batch, nodes: &NodeMap) -> usize {
    let mut total = 0;
    for (owner, subset) in nodes {
        for (path, node) in subset {
            if node.is_deleted() {
                schema::delete_trie_node(batch, owner, path);
            } else {
                schema::write_trie_node(batch, owner, path, &node.blob);
            }
        }
        total += subset.len();
    }
    total
}

/// Mirrors written `nodes` into the clean cache.
pub(super) fn cache_nodes(cleans: &CleanCache<Vec<u8>>, nodes: &NodeMap) {
    for (owner, subset) in nodes {
        for (path, node) in subset {
            let key = schema::trie_node_key(owner, path);
            if node.is_deleted() {
                cleans.remove(&key);
            } else {
                cleans.insert(key, node.blob.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDb;

    fn map(entries: &[(u8, &[u8], Vec<u8>)]) -> NodeMap {
        let mut nodes: NodeMap = HashMap::with_hasher(FxBuildHasher);
        for (owner, path, blob) in entries {
            let node = if blob.is_empty() {
                TrieNode::deleted()
            } else {
                TrieNode::from_blob(blob.clone())
            };
            nodes
                .entry(H256::repeat_byte(*owner))
                .or_insert_with(|| HashMap::with_hasher(FxBuildHasher))
                .insert(path.to_vec(), node);
        }
        nodes
    }

    #[test]
    fn test_commit_tracks_size_and_layers() {
        let mut buffer = NodeBuffer::empty(1024);
        buffer.commit(&map(&[(0, &[1], vec![1; 10]), (1, &[], vec![2; 5])]));
        assert_eq!(buffer.layers(), 1);
        assert_eq!(buffer.size(), StorageSize(11 + 5));

        // Overwrite only accounts for the blob delta.
        buffer.commit(&map(&[(0, &[1], vec![3; 4])]));
        assert_eq!(buffer.layers(), 2);
        assert_eq!(buffer.size(), StorageSize(5 + 5));

        let hash = TrieNode::from_blob(vec![3; 4]).hash;
        let owner = H256::repeat_byte(0);
        assert_eq!(buffer.node(&owner, &[1], &hash).unwrap(), Some(vec![3; 4]));
        assert!(buffer.node(&owner, &[1], &H256::repeat_byte(9)).is_err());
        assert_eq!(buffer.node(&owner, &[7], &hash).unwrap(), None);
    }

    #[test]
    fn test_flush_respects_limit_and_state_id() {
        let db = MemoryDb::new();
        let cleans = CleanCache::new(16);
        let mut buffer = NodeBuffer::empty(1024);
        buffer.commit(&map(&[(0, &[1], vec![1; 10])]));

        assert!(!buffer.flush(&db, &cleans, 1, false).unwrap());
        assert!(buffer.flush(&db, &cleans, 5, true).is_err());

        assert!(buffer.flush(&db, &cleans, 1, true).unwrap());
        assert!(buffer.is_empty());
        assert_eq!(schema::read_persistent_state_id(&db).unwrap(), 1);
        let owner = H256::repeat_byte(0);
        assert_eq!(schema::read_trie_node(&db, &owner, &[1]).unwrap(), Some(vec![1; 10]));
    }

    #[test]
    fn test_revert() {
        let db = MemoryDb::new();
        let mut buffer = NodeBuffer::empty(1024);
        buffer.commit(&map(&[(0, &[1], vec![1; 10])]));
        buffer.commit(&map(&[(0, &[1], vec![2; 10])]));

        buffer.revert(&db, map(&[(0, &[1], vec![1; 10])])).unwrap();
        assert_eq!(buffer.layers(), 1);
        let hash = TrieNode::from_blob(vec![1; 10]).hash;
        assert!(buffer.node(&H256::zero(), &[1], &hash).unwrap().is_some());

        // Unknown node that is not on disk either.
        buffer.commit(&map(&[(0, &[1], vec![2; 10])]));
        let err = buffer.revert(&db, map(&[(0, &[5], vec![5; 10])])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Corrupted);
        assert_eq!(buffer.layers(), 2);

        // The last transition drops the buffer.
        buffer.revert(&db, map(&[(0, &[1], vec![1; 10])])).unwrap();
        buffer.revert(&db, NodeMap::default()).unwrap();
        assert!(buffer.is_empty());
        assert!(buffer.revert(&db, NodeMap::default()).is_err());
    }
}
