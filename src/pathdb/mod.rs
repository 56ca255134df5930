//! Path-scheme node storage.
//!
//! Nodes are addressed by their owner and path. The newest transitions
//! live in memory as a linear stack of diff layers on top of a single
//! disk layer:
//!
//! ```text
//!   head  ->  diff (id n)
//!             diff (id n-1)
//!             ...
//!   disk  ->  node buffer (flattened, unwritten) + persisted state
//! ```
//!
//! Flattening a diff layer into the disk layer records a state history
//! entry, so the persisted state can later be rolled back with
//! [`PathDatabase::recover`]. On shutdown the in-memory layers are
//! written to a journal and restored on the next start.

mod buffer;
mod disk;
mod history;
mod journal;
mod layer;
mod tree;


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use primitive_types::H256;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CleanCache;
use crate::data::{FastHashMap, MergedNodeSet, StateSet, StorageSize, TrieNode};
use crate::error::{Error, ErrorKind, Result};
use crate::merkle::{keccak256, EMPTY_ROOT};
use crate::store::{schema, Batch, KeyValueStore};
use buffer::NodeBuffer;
use disk::DiskLayer;
use layer::{DiffLayer, Layer};
use tree::LayerTree;

/// Dirty nodes grouped by owner, then path.
type NodeMap = FastHashMap<H256, FastHashMap<Vec<u8>, TrieNode>>;

/// Default node buffer size.
pub const DEFAULT_BUFFER_SIZE: StorageSize = StorageSize::mib(64);

/// Largest accepted node buffer size.
pub const MAX_BUFFER_SIZE: StorageSize = StorageSize::mib(256);

/// Default number of diff layers kept in memory.
pub const MAX_DIFF_LAYERS: usize = 128;

/// Default number of retained state history entries.
pub const DEFAULT_STATE_HISTORY: u64 = 90_000;

/// Path-scheme settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// State history entries kept for rollback; 0 keeps all of them.
    pub state_history: u64,
    /// Number of clean nodes read from disk kept in memory; 0 disables
    /// the cache.
    pub clean_cache_nodes: usize,
    /// Node buffer size in bytes, capped at [`MAX_BUFFER_SIZE`].
    pub dirty_buffer_size: u64,
    /// Diff layers kept in memory before the oldest is flattened.
    pub max_diff_layers: usize,
    /// Rejects every mutation.
    pub read_only: bool,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            state_history: DEFAULT_STATE_HISTORY,
            clean_cache_nodes: 0,
            dirty_buffer_size: DEFAULT_BUFFER_SIZE.as_u64(),
            max_diff_layers: MAX_DIFF_LAYERS,
            read_only: false,
        }
    }
}

/// Produces the node mutations that undo one state transition.
///
/// Implemented by the trie layer, which knows how to apply prior account
/// and storage values to a trie.
pub trait TrieLoader {
    /// Returns the nodes that turn the state `root` back into `parent`,
    /// given the values `states` held in `parent`. `reader` resolves nodes
    /// of `root`.
    fn revert(
        &self,
        reader: &PathReader,
        parent: H256,
        root: H256,
        states: &StateSet,
    ) -> Result<MergedNodeSet>;
}

/// Maps the zero hash to the empty root.
fn trie_root(root: H256) -> H256 {
    if root.is_zero() {
        EMPTY_ROOT
    } else {
        root
    }
}

/// Layered path-scheme node database.
pub struct PathDatabase {
    diskdb: Arc<dyn KeyValueStore>,
    config: PathConfig,
    cleans: Arc<CleanCache<Vec<u8>>>,
    tree: RwLock<LayerTree>,
    read_only: AtomicBool,
}

impl PathDatabase {
    /// Opens the database, restoring the journaled layers when they still
    /// match the persisted state. History above the disk layer left by an
    /// unclean shutdown is truncated.
    pub fn new(diskdb: Arc<dyn KeyValueStore>, config: &PathConfig) -> Result<Self> {
        let mut config = config.clone();
        if config.dirty_buffer_size > MAX_BUFFER_SIZE.as_u64() {
            info!(
                provided = %StorageSize(config.dirty_buffer_size),
                adjusted = %MAX_BUFFER_SIZE,
                "capped node buffer size"
            );
            config.dirty_buffer_size = MAX_BUFFER_SIZE.as_u64();
        }
        let cleans = Arc::new(CleanCache::new(config.clean_cache_nodes));
        let persisted = persisted_root(diskdb.as_ref())?;

        let tree = match journal::load(&diskdb, persisted, config.dirty_buffer_size, &cleans) {
            Ok(Some(tree)) => tree,
            Ok(None) => fresh_tree(&diskdb, persisted, &config, &cleans)?,
            Err(err) if err.kind() == ErrorKind::Io => return Err(err),
            Err(err) => {
                info!(error = %err, "failed to load journal, discarding it");
                fresh_tree(&diskdb, persisted, &config, &cleans)?
            }
        };

        if !config.read_only {
            let pruned = history::truncate_from_head(diskdb.as_ref(), tree.bottom().id())?;
            if pruned != 0 {
                warn!(number = pruned, "truncated extra state histories");
            }
        }

        Ok(Self {
            read_only: AtomicBool::new(config.read_only),
            diskdb,
            config,
            cleans,
            tree: RwLock::new(tree),
        })
    }

    fn modify_allowed(&self) -> Result<()> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// Returns true if any layer holds a non-empty state.
    pub fn initialized(&self, _genesis_root: H256) -> bool {
        let tree = self.tree.read();
        tree.bottom().root() != EMPTY_ROOT || tree.diffs().any(|diff| diff.root != EMPTY_ROOT)
    }

    /// Returns a reader bound to the layer of `root`.
    pub fn reader(&self, root: H256) -> Result<PathReader> {
        let root = trie_root(root);
        self.tree
            .read()
            .get(&root)
            .map(PathReader::new)
            .ok_or(Error::MissingRoot(root))
    }

    /// Pushes the transition `parent -> root` as a new head layer.
    ///
    /// `parent` must be the current head and differ from `root`. The
    /// oldest diff layers are flattened into the disk layer once more than
    /// `max_diff_layers` are held.
    pub fn update(
        &self,
        root: H256,
        parent: H256,
        block: u64,
        nodes: MergedNodeSet,
        states: StateSet,
    ) -> Result<()> {
        let (root, parent) = (trie_root(root), trie_root(parent));
        let mut tree = self.tree.write();
        self.modify_allowed()?;

        if root == parent {
            return Err(Error::invariant(format!("layer cycle at {root:?}")));
        }
        let head = tree.top();
        if head.root() != parent {
            return Err(Error::invariant(format!(
                "parent {parent:?} is not the head layer {:?}",
                head.root()
            )));
        }
        if tree.get(&root).is_some() {
            return Err(Error::invariant(format!("layer {root:?} already exists")));
        }

        let diff = DiffLayer::new(head, root, block, nodes.flatten(), states);
        debug!(block, root = ?root, id = diff.id, size = %diff.memory(), "added diff layer");
        tree.push(Arc::new(diff));

        let excess = tree.diff_count().saturating_sub(self.config.max_diff_layers);
        if let Err(err) = tree.flatten(excess, self.config.state_history) {
            // Only a layer that never reached the disk layer can be withdrawn.
            if tree.pop_head(&root) {
                warn!(root = ?root, error = %err, "dropped diff layer after failed flatten");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Flattens every layer up to and including `root` into the disk layer
    /// and writes the node buffer out, making `root` durable. Newer layers
    /// stay in memory.
    pub fn commit(&self, root: H256, verbose: bool) -> Result<()> {
        let root = trie_root(root);
        let start = Instant::now();
        let mut tree = self.tree.write();
        self.modify_allowed()?;

        let depth = tree.depth(&root).ok_or(Error::MissingRoot(root))?;
        tree.flatten(depth, self.config.state_history)?;
        let disk = tree.bottom();
        let size = disk.size();
        disk.flush(true)?;

        let elapsed = start.elapsed();
        if verbose {
            info!(root = ?root, layers = depth, size = %size, ?elapsed, "committed path-scheme state");
        } else {
            debug!(root = ?root, layers = depth, size = %size, ?elapsed, "committed path-scheme state");
        }
        Ok(())
    }

    /// Writes the disk layer and the diff layers up to `root` to the
    /// journal. The database is read-only afterwards.
    pub fn journal(&self, root: H256) -> Result<()> {
        let root = trie_root(root);
        let start = Instant::now();
        let tree = self.tree.write();
        self.modify_allowed()?;

        let depth = tree.depth(&root).ok_or(Error::MissingRoot(root))?;
        info!(
            root = ?root,
            layers = depth as u64 + tree.bottom().buffered_layers(),
            "persisting dirty state to disk"
        );
        let persisted = persisted_root(self.diskdb.as_ref())?;
        let blob = journal::encode(&tree, persisted, depth)?;
        let size = StorageSize::from(blob.len());

        let mut batch = Batch::new();
        schema::write_trie_journal(&mut batch, &blob);
        self.diskdb.write_batch(batch)?;

        self.read_only.store(true, Ordering::Release);
        info!(size = %size, elapsed = ?start.elapsed(), "persisted dirty state to disk");
        Ok(())
    }

    /// Rebuilds the database on the persisted state `root`, dropping the
    /// journal, every in-memory layer and all state history. The empty
    /// root wipes the persisted account trie root.
    pub fn reset(&self, root: H256) -> Result<()> {
        let root = trie_root(root);
        let mut tree = self.tree.write();
        self.modify_allowed()?;

        let mut batch = Batch::new();
        if root == EMPTY_ROOT {
            schema::delete_trie_node(&mut batch, &H256::zero(), &[]);
        } else {
            let persisted = persisted_root(self.diskdb.as_ref())?;
            if persisted != root {
                return Err(Error::invariant(format!(
                    "state is mismatched, local: {persisted:?}, target: {root:?}"
                )));
            }
        }
        schema::delete_trie_journal(&mut batch);
        schema::write_persistent_state_id(&mut batch, 0);
        self.diskdb.write_batch(batch)?;
        let pruned = history::reset(self.diskdb.as_ref())?;

        let disk = tree.bottom();
        disk.mark_stale();
        let buffer = NodeBuffer::empty(disk.buffer_limit());
        self.cleans.clear();
        let disk = DiskLayer::new(root, 0, Arc::clone(&self.diskdb), Arc::clone(&self.cleans), buffer);
        tree.reset(Arc::new(disk));
        info!(root = ?root, pruned, "rebuilt trie database");
        Ok(())
    }

    /// Returns true if `root` lies below the disk layer and every history
    /// entry needed to roll back to it is present and complete.
    pub fn recoverable(&self, root: H256) -> Result<bool> {
        let tree = self.tree.read();
        self.recoverable_from(&tree, trie_root(root))
    }

    fn recoverable_from(&self, tree: &LayerTree, root: H256) -> Result<bool> {
        let Some(id) = schema::read_state_id(self.diskdb.as_ref(), &root)? else {
            return Ok(false);
        };
        let disk = tree.bottom();
        if id >= disk.id() {
            return Ok(false);
        }
        let mut parent = root;
        for next in id + 1..=disk.id() {
            let Some(entry) = history::read(self.diskdb.as_ref(), next)? else {
                return Ok(false);
            };
            if entry.parent != parent || !entry.is_complete() {
                return Ok(false);
            }
            parent = entry.root;
        }
        Ok(parent == disk.root())
    }

    /// Rolls the database back to `target`.
    ///
    /// A target among the live layers only drops the layers above it.
    /// Otherwise the diff layers are dropped and state history is applied
    /// newest first, with `loader` producing the reverse node mutations of
    /// each step. The journal and the history above the new disk layer
    /// are deleted.
    pub fn recover(&self, target: H256, loader: &dyn TrieLoader) -> Result<()> {
        let target = trie_root(target);
        let start = Instant::now();
        let mut tree = self.tree.write();
        self.modify_allowed()?;

        if let Some(depth) = tree.depth(&target) {
            tree.truncate(depth);
            let mut batch = Batch::new();
            schema::delete_trie_journal(&mut batch);
            self.diskdb.write_batch(batch)?;
            debug!(root = ?target, "dropped layers above live state");
            return Ok(());
        }
        if !self.recoverable_from(&tree, target)? {
            return Err(Error::HistoryUnavailable(format!(
                "state {target:?} is not recoverable"
            )));
        }

        tree.truncate(0);
        let mut disk = Arc::clone(tree.bottom());
        while disk.root() != target {
            let entry = history::read(self.diskdb.as_ref(), disk.id())?.ok_or_else(|| {
                Error::HistoryUnavailable(format!("state history {} is missing", disk.id()))
            })?;
            disk = disk.revert(&entry, loader)?;
            tree.reset(Arc::clone(&disk));
        }

        let mut batch = Batch::new();
        schema::delete_trie_journal(&mut batch);
        self.diskdb.write_batch(batch)?;
        history::truncate_from_head(self.diskdb.as_ref(), disk.id())?;
        debug!(root = ?target, id = disk.id(), elapsed = ?start.elapsed(), "recovered state");
        Ok(())
    }

    /// Changes the node buffer size, capped at [`MAX_BUFFER_SIZE`]. The
    /// buffer is flushed if it no longer fits.
    pub fn set_buffer_size(&self, size: StorageSize) -> Result<()> {
        let size = if size > MAX_BUFFER_SIZE {
            info!(provided = %size, adjusted = %MAX_BUFFER_SIZE, "capped node buffer size");
            MAX_BUFFER_SIZE
        } else {
            size
        };
        let tree = self.tree.write();
        tree.bottom().set_buffer_size(size.as_u64())?;
        Ok(())
    }

    /// Returns `(diff layer memory, node buffer size)`.
    pub fn size(&self) -> (StorageSize, StorageSize) {
        self.tree.read().size()
    }

    /// Rejects further mutations and drops the clean cache.
    pub fn close(&self) -> Result<()> {
        let _tree = self.tree.write();
        self.read_only.store(true, Ordering::Release);
        self.cleans.clear();
        Ok(())
    }
}

/// Root of the persisted account trie.
fn persisted_root(diskdb: &dyn KeyValueStore) -> Result<H256> {
    Ok(match schema::read_trie_node(diskdb, &H256::zero(), &[])? {
        Some(blob) if !blob.is_empty() => H256(keccak256(&blob)),
        _ => EMPTY_ROOT,
    })
}

fn fresh_tree(
    diskdb: &Arc<dyn KeyValueStore>,
    root: H256,
    config: &PathConfig,
    cleans: &Arc<CleanCache<Vec<u8>>>,
) -> Result<LayerTree> {
    let id = schema::read_persistent_state_id(diskdb.as_ref())?;
    let buffer = NodeBuffer::empty(config.dirty_buffer_size);
    let disk = DiskLayer::new(root, id, Arc::clone(diskdb), Arc::clone(cleans), buffer);
    Ok(LayerTree::new(Arc::new(disk)))
}

/// Reader bound to one layer.
///
/// Once the layer is flattened or dropped by a rollback, reads fail with
/// [`Error::StaleLayer`].
#[derive(Clone)]
pub struct PathReader {
    layer: Layer,
}

impl PathReader {
    fn new(layer: Layer) -> Self {
        Self { layer }
    }

    /// Root of the state this reader is bound to.
    pub fn root(&self) -> H256 {
        self.layer.root()
    }

    /// Returns the node at `path` in the trie of `owner`, which must hash
    /// to `hash`.
    pub fn node(&self, owner: H256, path: &[u8], hash: H256) -> Result<Vec<u8>> {
        self.layer.node(&owner, path, &hash)
    }
}
