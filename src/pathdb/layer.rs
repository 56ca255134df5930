//! In-memory diff layers and the [`Layer`] handle shared by readers.

use std::sync::Arc;

use parking_lot::RwLock;
use primitive_types::H256;
use tracing::error;

use super::disk::DiskLayer;
use super::NodeMap;
use crate::data::{StateSet, StorageSize};
use crate::error::{Error, Result};

/// A layer of the tree: the disk layer or one diff layer on top of it.
#[derive(Clone)]
pub(super) enum Layer {
    Disk(Arc<DiskLayer>),
    Diff(Arc<DiffLayer>),
}

impl Layer {
    pub(super) fn root(&self) -> H256 {
        match self {
            Layer::Disk(disk) => disk.root(),
            Layer::Diff(diff) => diff.root,
        }
    }

    pub(super) fn id(&self) -> u64 {
        match self {
            Layer::Disk(disk) => disk.id(),
            Layer::Diff(diff) => diff.id,
        }
    }

    /// Resolves the node at `path` in the trie of `owner`, expecting `hash`.
    pub(super) fn node(&self, owner: &H256, path: &[u8], hash: &H256) -> Result<Vec<u8>> {
        match self {
            Layer::Disk(disk) => disk.node(owner, path, hash),
            Layer::Diff(diff) => diff.node(owner, path, hash),
        }
    }
}

/// The trie nodes and prior states of one state transition.
pub(super) struct DiffLayer {
    pub(super) root: H256,
    pub(super) id: u64,
    pub(super) block: u64,
    pub(super) nodes: NodeMap,
    pub(super) states: StateSet,
    memory: u64,
    /// Re-pointed to the new disk layer when the parent is flattened.
    pub(super) parent: RwLock<Layer>,
}

impl DiffLayer {
    pub(super) fn new(parent: Layer, root: H256, block: u64, nodes: NodeMap, states: StateSet) -> Self {
        let nodes_size: usize = nodes
            .values()
            .flat_map(|subset| subset.iter())
            .map(|(path, node)| path.len() + node.blob.len())
            .sum();
        Self {
            root,
            id: parent.id() + 1,
            block,
            nodes,
            memory: (nodes_size + states.size()) as u64,
            states,
            parent: RwLock::new(parent),
        }
    }

    pub(super) fn memory(&self) -> StorageSize {
        StorageSize(self.memory)
    }

    /// Looks the node up in this layer, then below it. The parent stays
    /// locked for the whole descent so flattening cannot unlink it midway.
    fn node(&self, owner: &H256, path: &[u8], hash: &H256) -> Result<Vec<u8>> {
        let parent = self.parent.read();
        if let Some(node) = self.nodes.get(owner).and_then(|subset| subset.get(path)) {
            if node.hash != *hash {
                error!(owner = ?owner, path = ?path, want = ?hash, got = ?node.hash, "unexpected trie node in diff layer");
                return Err(Error::UnexpectedNode {
                    location: "diff",
                    owner: *owner,
                    path: path.to_vec(),
                    want: *hash,
                    got: node.hash,
                });
            }
            return Ok(node.blob.clone());
        }
        parent.node(owner, path, hash)
    }
}
