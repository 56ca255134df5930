//! The bottom layer of the tree: persisted state plus the node buffer.

use std::mem;
use std::sync::Arc;

use parking_lot::RwLock;
use primitive_types::H256;
use tracing::error;

use super::buffer::{cache_nodes, write_nodes, NodeBuffer};
use super::history::{self, History};
use super::layer::{DiffLayer, Layer};
use super::{PathReader, TrieLoader};
use crate::cache::CleanCache;
use crate::data::StorageSize;
use crate::error::{Error, Result};
use crate::merkle::keccak256;
use crate::store::{schema, Batch, KeyValueStore};

pub(super) struct DiskLayer {
    root: H256,
    id: u64,
    diskdb: Arc<dyn KeyValueStore>,
    cleans: Arc<CleanCache<Vec<u8>>>,
    /// Set once a newer disk layer replaces this one.
    stale: RwLock<bool>,
    buffer: RwLock<NodeBuffer>,
}

impl DiskLayer {
    pub(super) fn new(
        root: H256,
        id: u64,
        diskdb: Arc<dyn KeyValueStore>,
        cleans: Arc<CleanCache<Vec<u8>>>,
        buffer: NodeBuffer,
    ) -> Self {
        Self {
            root,
            id,
            diskdb,
            cleans,
            stale: RwLock::new(false),
            buffer: RwLock::new(buffer),
        }
    }

    pub(super) fn root(&self) -> H256 {
        self.root
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    pub(super) fn diskdb(&self) -> &dyn KeyValueStore {
        self.diskdb.as_ref()
    }

    pub(super) fn is_stale(&self) -> bool {
        *self.stale.read()
    }

    pub(super) fn mark_stale(&self) {
        *self.stale.write() = true;
    }

    /// Bytes held by the node buffer.
    pub(super) fn size(&self) -> StorageSize {
        self.buffer.read().size()
    }

    /// Transitions merged into the buffer but not yet flushed.
    pub(super) fn buffered_layers(&self) -> u64 {
        self.buffer.read().layers()
    }

    pub(super) fn buffer_limit(&self) -> u64 {
        self.buffer.read().limit()
    }

    /// Calls `f` with the buffered nodes; fails if the layer is stale.
    pub(super) fn with_buffer<T>(&self, f: impl FnOnce(&NodeBuffer) -> T) -> Result<T> {
        let stale = self.stale.read();
        if *stale {
            return Err(Error::StaleLayer(self.root));
        }
        Ok(f(&self.buffer.read()))
    }

    /// Resolves a node from the buffer, the clean cache or disk, checking
    /// its hash at every level.
    pub(super) fn node(&self, owner: &H256, path: &[u8], hash: &H256) -> Result<Vec<u8>> {
        let stale = self.stale.read();
        if *stale {
            return Err(Error::StaleLayer(self.root));
        }
        if let Some(blob) = self.buffer.read().node(owner, path, hash)? {
            return Ok(blob);
        }

        let key = schema::trie_node_key(owner, path);
        if let Some(blob) = self.cleans.get(&key) {
            let got = H256(keccak256(&blob));
            if got == *hash {
                return Ok(blob);
            }
            error!(owner = ?owner, path = ?path, want = ?hash, got = ?got, "unexpected trie node in clean cache");
        }

        let Some(blob) = self.diskdb.get(&key)? else {
            return Err(Error::MissingNode {
                owner: *owner,
                path: path.to_vec(),
                hash: *hash,
            });
        };
        let got = H256(keccak256(&blob));
        if got != *hash {
            error!(owner = ?owner, path = ?path, want = ?hash, got = ?got, "unexpected trie node in disk");
            return Err(Error::UnexpectedNode {
                location: "disk",
                owner: *owner,
                path: path.to_vec(),
                want: *hash,
                got,
            });
        }
        self.cleans.insert(key, blob.clone());
        Ok(blob)
    }

    /// Merges `bottom`, whose parent must be this layer, into a new disk
    /// layer that takes over the node buffer. The state history for the
    /// transition is written first and this layer becomes stale.
    ///
    /// Returns the new layer and, when the history exceeds `state_history`
    /// entries, the id of the oldest entry to keep.
    pub(super) fn commit(
        &self,
        bottom: &DiffLayer,
        state_history: u64,
    ) -> Result<(Arc<DiskLayer>, Option<u64>)> {
        let mut stale = self.stale.write();
        if *stale {
            return Err(Error::StaleLayer(self.root));
        }

        let tail = schema::read_history_tail(self.diskdb.as_ref())?;
        let entry = History::new(self.root, bottom.root, bottom.block, bottom.states.clone());
        let mut batch = Batch::new();
        history::write(&mut batch, bottom.id, &entry)?;
        if self.id == 0 {
            schema::write_state_id(&mut batch, &self.root, 0);
        }
        self.diskdb.write_batch(batch)?;

        let oldest = (state_history != 0 && bottom.id.saturating_sub(tail) > state_history)
            .then(|| bottom.id - state_history + 1);

        *stale = true;
        let mut buffer = self.buffer.write();
        let limit = buffer.limit();
        let mut merged = mem::replace(&mut *buffer, NodeBuffer::empty(limit));
        merged.commit(&bottom.nodes);

        let disk = DiskLayer::new(
            bottom.root,
            bottom.id,
            Arc::clone(&self.diskdb),
            Arc::clone(&self.cleans),
            merged,
        );
        Ok((Arc::new(disk), oldest))
    }

    /// Writes the buffer out if it is over its limit or `force` is set.
    pub(super) fn flush(&self, force: bool) -> Result<bool> {
        self.buffer
            .write()
            .flush(self.diskdb.as_ref(), &self.cleans, self.id, force)
    }

    /// Changes the buffer limit, flushing if the buffer no longer fits.
    pub(super) fn set_buffer_size(&self, size: u64) -> Result<bool> {
        let mut buffer = self.buffer.write();
        buffer.set_limit(size);
        buffer.flush(self.diskdb.as_ref(), &self.cleans, self.id, false)
    }

    /// Undoes the transition described by `entry`, producing the disk
    /// layer of its parent state.
    ///
    /// The reverse mutations go into the buffer if it still holds
    /// unflushed transitions, otherwise straight to disk together with
    /// the lowered persistent state id.
    pub(super) fn revert(
        self: &Arc<Self>,
        entry: &History,
        loader: &dyn TrieLoader,
    ) -> Result<Arc<DiskLayer>> {
        if entry.root != self.root {
            return Err(Error::Corrupted(format!(
                "state history {} leads to {:?}, disk layer is at {:?}",
                self.id, entry.root, self.root
            )));
        }
        if !entry.is_complete() {
            return Err(Error::HistoryUnavailable(format!(
                "state history {} is incomplete",
                self.id
            )));
        }
        if self.id == 0 {
            return Err(Error::HistoryUnavailable("zero state id".into()));
        }

        let reader = PathReader::new(Layer::Disk(Arc::clone(self)));
        let nodes = loader
            .revert(&reader, entry.parent, entry.root, &entry.states)?
            .flatten();

        let mut stale = self.stale.write();
        if *stale {
            return Err(Error::StaleLayer(self.root));
        }
        let mut buffer = self.buffer.write();
        if !buffer.is_empty() {
            buffer.revert(self.diskdb.as_ref(), nodes)?;
        } else {
            let mut batch = Batch::new();
            write_nodes(&mut batch, &nodes);
            schema::write_persistent_state_id(&mut batch, self.id - 1);
            self.diskdb.write_batch(batch)?;
            cache_nodes(&self.cleans, &nodes);
        }
        *stale = true;

        let limit = buffer.limit();
        let buffer = mem::replace(&mut *buffer, NodeBuffer::empty(limit));
        let disk = DiskLayer::new(
            entry.parent,
            self.id - 1,
            Arc::clone(&self.diskdb),
            Arc::clone(&self.cleans),
            buffer,
        );
        Ok(Arc::new(disk))
    }
}
