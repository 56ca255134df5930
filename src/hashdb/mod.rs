//! Hash-scheme node storage.
//!
//! Nodes are addressed by the keccak hash of their blob and kept in a
//! reference counted dirty cache until they are committed or capped. Two
//! backends live here:
//!
//! - [`HashDatabase`]: the Merkle Patricia trie backend with reference
//!   counting, garbage collection and capping.
//! - [`ZkDatabase`]: the backend for the circuit-friendly trie, a plain
//!   write-behind cache of raw keys without reference counting.

mod dirty;
mod zk;


pub use zk::{ZkDatabase, ZkReader};

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use primitive_types::H256;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CleanCache;
use crate::data::{MergedNodeSet, StateSet, StorageSize};
use crate::error::{Error, ErrorKind, Result};
use crate::merkle::{ChildResolver, EMPTY_ROOT};
use crate::store::{schema, Batch, KeyValueStore};
use dirty::{DirtyCache, GcStats};

/// Hash-scheme settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Number of clean nodes read from disk kept in memory; 0 disables
    /// the cache.
    pub clean_cache_nodes: usize,
}

/// Reference counted hash-scheme node database.
pub struct HashDatabase {
    diskdb: Arc<dyn KeyValueStore>,
    resolver: Arc<dyn ChildResolver>,
    cleans: CleanCache<H256>,
    dirties: RwLock<DirtyCache>,
}

impl HashDatabase {
    /// Creates a database over `diskdb`, resolving node children with `resolver`.
    pub fn new(
        diskdb: Arc<dyn KeyValueStore>,
        config: &HashConfig,
        resolver: Arc<dyn ChildResolver>,
    ) -> Self {
        Self {
            diskdb,
            resolver,
            cleans: CleanCache::new(config.clean_cache_nodes),
            dirties: RwLock::new(DirtyCache::new()),
        }
    }

    /// Returns true if the genesis state is on disk.
    pub fn initialized(&self, genesis_root: H256) -> Result<bool> {
        Ok(schema::has_legacy_node(self.diskdb.as_ref(), &genesis_root)?)
    }

    /// Inserts the dirty nodes of one state transition.
    ///
    /// Storage tries go in before the account trie, each child first, so
    /// that parents find their children cached. Deleted nodes are ignored:
    /// unreachable nodes are collected through [`dereference`](Self::dereference).
    /// Every blob is resolved before the cache is touched, so a malformed
    /// node leaves the database unchanged.
    pub fn update(
        &self,
        root: H256,
        parent: H256,
        block: u64,
        nodes: MergedNodeSet,
        _states: StateSet,
    ) -> Result<()> {
        let mut dirties = self.dirties.write();

        let mut inserts = Vec::new();
        let mut links = Vec::new();
        for set in nodes.into_ordered() {
            let owner = set.owner();
            let (sorted, leaves) = set.into_sorted();
            for (path, node) in sorted {
                if node.is_deleted() || dirties.contains(&node.hash) {
                    continue;
                }
                let children = self.resolver.children(&node.blob).map_err(|err| {
                    Error::Corrupted(format!(
                        "malformed node {:?} at {path:?} in trie {owner:?}: {err}",
                        node.hash
                    ))
                })?;
                inserts.push((node.hash, node.blob, children));
            }
            if owner.is_zero() {
                for leaf in leaves {
                    let storage_root = self.resolver.storage_root(&leaf.blob).map_err(|err| {
                        Error::Corrupted(format!("malformed account leaf: {err}"))
                    })?;
                    if storage_root != EMPTY_ROOT {
                        links.push((storage_root, leaf.parent));
                    }
                }
            }
        }

        let parent_known = parent == EMPTY_ROOT
            || dirties.contains(&parent)
            || schema::has_legacy_node(self.diskdb.as_ref(), &parent)?;

        let inserted = inserts.len();
        for (hash, blob, children) in inserts {
            dirties.insert(hash, blob, children);
        }
        for (child, holder) in links {
            dirties.reference(child, holder);
        }

        if !parent_known {
            warn!(block, root = ?root, parent = ?parent, "parent state is not available");
        }
        debug!(block, root = ?root, inserted, cached = dirties.len(), "inserted trie nodes");
        Ok(())
    }

    /// Adds a live edge from `parent` to `child`; a zero parent holds `child`
    /// as a root.
    ///
    /// Reviving a released subtree fails with [`Error::MissingNode`] if
    /// `cap` already evicted part of it and the evicted nodes never
    /// reached disk.
    pub fn reference(&self, child: H256, parent: H256) -> Result<()> {
        let mut dirties = self.dirties.write();
        self.ensure_complete(&dirties, child, parent)?;
        dirties.reference(child, parent);
        Ok(())
    }

    /// Fails if the released nodes `reference(child, parent)` would revive
    /// point at nodes that are neither cached nor on disk.
    fn ensure_complete(&self, dirties: &DirtyCache, child: H256, parent: H256) -> Result<()> {
        for hash in dirties.revival_gaps(child, parent) {
            if !schema::has_legacy_node(self.diskdb.as_ref(), &hash)? {
                warn!(root = ?child, missing = ?hash, "trie was partially evicted");
                return Err(Error::MissingNode {
                    owner: H256::zero(),
                    path: Vec::new(),
                    hash,
                });
            }
        }
        Ok(())
    }

    /// Drops a root hold. Nodes whose count reaches zero stay readable
    /// until [`cap`](Self::cap) evicts them.
    pub fn dereference(&self, root: H256) {
        if root.is_zero() {
            warn!("attempted to dereference the trie cache meta root");
            return;
        }
        let start = Instant::now();
        let mut dirties = self.dirties.write();
        let released = dirties.dereference(root);
        debug!(
            root = ?root,
            released,
            elapsed = ?start.elapsed(),
            live = dirties.len(),
            "dereferenced trie from memory database"
        );
    }

    /// Shrinks the dirty cache to at most `limit`.
    ///
    /// Unreferenced nodes are evicted first, oldest first, without being
    /// written. If that is not enough, live nodes are written to disk in
    /// insertion order in one batch and dropped from memory; they remain
    /// readable from disk.
    pub fn cap(&self, limit: StorageSize) -> Result<()> {
        let start = Instant::now();
        let mut dirties = self.dirties.write();
        let (before_nodes, before_size) = (dirties.len(), dirties.size());

        let evicted = dirties.evict(limit);

        let mut flushed = 0;
        if dirties.size() > limit {
            let candidates = dirties.flush_candidates(limit);
            let mut batch = Batch::new();
            for hash in &candidates {
                if let Some(node) = dirties.get(hash) {
                    if !node.durable {
                        schema::write_legacy_node(&mut batch, hash, &node.blob);
                    }
                }
            }
            flushed = batch.len();
            if !batch.is_empty() {
                self.diskdb.write_batch(batch)?;
            }
            for hash in candidates {
                if let Some(node) = dirties.remove(&hash) {
                    dirties.stats.flush_nodes += 1;
                    dirties.stats.flush_size += StorageSize::from(node.blob.len());
                    self.cleans.insert(hash, node.blob);
                }
            }
        }

        let size = dirties.size();
        debug!(
            evicted,
            flushed,
            nodes = before_nodes - dirties.len(),
            size = %(before_size - size),
            elapsed = ?start.elapsed(),
            live_nodes = dirties.len(),
            live_size = %size,
            "capped trie memory database"
        );
        if size > limit {
            return Err(Error::CapStalled { limit, size });
        }
        Ok(())
    }

    /// Returns the blob of `hash` from the dirty cache, the clean cache or disk.
    pub fn node(&self, hash: H256) -> Result<Vec<u8>> {
        let missing = || Error::MissingNode {
            owner: H256::zero(),
            path: Vec::new(),
            hash,
        };
        if hash.is_zero() {
            return Err(missing());
        }
        if let Some(node) = self.dirties.read().get(&hash) {
            return Ok(node.blob.clone());
        }
        if let Some(blob) = self.cleans.get(&hash) {
            return Ok(blob);
        }
        match schema::read_legacy_node(self.diskdb.as_ref(), &hash)? {
            Some(blob) if !blob.is_empty() => {
                self.cleans.insert(hash, blob.clone());
                Ok(blob)
            }
            _ => Err(missing()),
        }
    }

    /// Writes every node reachable from `root` that is not yet on disk in
    /// one batch. Counts and cached entries are left as they are. A
    /// released root whose subtree was partially evicted is refused.
    pub fn commit(&self, root: H256, verbose: bool) -> Result<()> {
        let start = Instant::now();
        let mut dirties = self.dirties.write();
        self.ensure_complete(&dirties, root, H256::zero())?;

        let pending = dirties.unwritten_from(root);
        let mut batch = Batch::new();
        for hash in &pending {
            if let Some(node) = dirties.get(hash) {
                schema::write_legacy_node(&mut batch, hash, &node.blob);
            }
        }
        let size = StorageSize::from(batch.value_size());
        if !batch.is_empty() {
            self.diskdb.write_batch(batch)?;
        }
        dirties.mark_durable(&pending);

        let stats = std::mem::take(&mut dirties.stats);
        log_commit(verbose, root, pending.len(), size, start, stats, dirties.len());
        Ok(())
    }

    /// Returns `(0, dirty cache size)`; the hash scheme has no diff layers.
    pub fn size(&self) -> (StorageSize, StorageSize) {
        (StorageSize::ZERO, self.dirties.read().size())
    }

    /// Returns a reader for the state rooted at `root`.
    ///
    /// Released roots that were never committed are rejected: their
    /// subtree may already be partially evicted.
    pub fn reader(self: &Arc<Self>, root: H256) -> Result<HashReader> {
        {
            let dirties = self.dirties.read();
            let released = dirties.is_evictable(&root)
                && dirties.get(&root).map_or(false, |node| !node.durable);
            if released {
                return Err(Error::MissingRoot(root));
            }
        }
        match self.node(root) {
            Ok(_) => Ok(HashReader {
                db: Arc::clone(self),
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Error::MissingRoot(root)),
            Err(err) => Err(err),
        }
    }

    /// Releases the clean cache.
    pub fn close(&self) -> Result<()> {
        self.cleans.clear();
        Ok(())
    }
}

fn log_commit(
    verbose: bool,
    root: H256,
    nodes: usize,
    size: StorageSize,
    start: Instant,
    stats: GcStats,
    live: usize,
) {
    let elapsed = start.elapsed();
    if verbose {
        info!(
            root = ?root, nodes, size = %size, ?elapsed,
            gcnodes = stats.gc_nodes, gcsize = %stats.gc_size,
            flushnodes = stats.flush_nodes, flushsize = %stats.flush_size,
            livenodes = live,
            "persisted trie from memory database"
        );
    } else {
        debug!(
            root = ?root, nodes, size = %size, ?elapsed,
            gcnodes = stats.gc_nodes, gcsize = %stats.gc_size,
            flushnodes = stats.flush_nodes, flushsize = %stats.flush_size,
            livenodes = live,
            "persisted trie from memory database"
        );
    }
}

/// Reader over a hash-scheme state.
#[derive(Clone)]
pub struct HashReader {
    db: Arc<HashDatabase>,
}

impl HashReader {
    /// Returns the node with `hash`; `owner` and `path` only enrich errors.
    pub fn node(&self, owner: H256, path: &[u8], hash: H256) -> Result<Vec<u8>> {
        self.db.node(hash).map_err(|err| match err {
            Error::MissingNode { hash, .. } => Error::MissingNode {
                owner,
                path: path.to_vec(),
                hash,
            },
            err => err,
        })
    }
}
