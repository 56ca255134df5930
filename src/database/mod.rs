//! The trie database facade.
//!
//! [`Database`] owns the preimage cache and exactly one node backend,
//! chosen by [`Config`]. Operations common to every backend are forwarded
//! as they are; the remaining ones are tied to one backend and fail with
//! [`Error::Unsupported`] on the others.

mod config;
mod reader;


pub use config::{Config, Scheme};
pub use reader::Reader;

use std::sync::Arc;

use parking_lot::RwLock;
use primitive_types::{H256, U256};
use tracing::{error, info};

use crate::data::{MergedNodeSet, StateSet, StorageSize};
use crate::error::{ConfigError, Error, Result};
use crate::hashdb::{HashConfig, HashDatabase, ZkDatabase};
use crate::merkle::{ChildResolver, MptResolver, EMPTY_CODE_HASH, EMPTY_ROOT};
use crate::pathdb::{PathDatabase, TrieLoader};
use crate::preimage::PreimageStore;
use crate::store::KeyValueStore;

/// The active node backend.
enum Backend {
    Hash(Arc<HashDatabase>),
    Zk(Arc<ZkDatabase>),
    Path(PathDatabase),
}

impl Backend {
    fn open(
        diskdb: &Arc<dyn KeyValueStore>,
        config: &Config,
        resolver: &Arc<dyn ChildResolver>,
    ) -> std::result::Result<Self, ConfigError> {
        if let Err(err) = config.validate() {
            error!(error = %err, "invalid trie database configuration");
            return Err(err);
        }
        if let Some(path) = &config.path {
            let db = PathDatabase::new(Arc::clone(diskdb), path).map_err(|err| {
                error!(error = %err, "failed to open path-scheme database");
                ConfigError::Open(err)
            })?;
            return Ok(Backend::Path(db));
        }
        let hash = config.hash.clone().unwrap_or_default();
        Ok(if config.zktrie {
            Backend::Zk(Arc::new(ZkDatabase::new(Arc::clone(diskdb), &hash)))
        } else {
            Backend::Hash(Arc::new(HashDatabase::new(
                Arc::clone(diskdb),
                &hash,
                Arc::clone(resolver),
            )))
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Backend::Hash(_) => "hash",
            Backend::Zk(_) => "zktrie",
            Backend::Path(_) => "path",
        }
    }

    fn unsupported(&self, op: &'static str) -> Error {
        Error::Unsupported {
            op,
            backend: self.name(),
        }
    }
}

struct Inner {
    config: Config,
    backend: Backend,
}

/// Entry point for storing and reading trie nodes and key preimages.
pub struct Database {
    diskdb: Arc<dyn KeyValueStore>,
    resolver: Arc<dyn ChildResolver>,
    preimages: Option<PreimageStore>,
    inner: RwLock<Inner>,
}

impl Database {
    /// Opens a database over `diskdb` with the backend selected by `config`.
    pub fn new(
        diskdb: Arc<dyn KeyValueStore>,
        config: Config,
    ) -> std::result::Result<Self, ConfigError> {
        Self::with_resolver(diskdb, config, Arc::new(MptResolver))
    }

    /// Like [`new`](Self::new), with a custom child resolver for the hash
    /// scheme.
    pub fn with_resolver(
        diskdb: Arc<dyn KeyValueStore>,
        config: Config,
        resolver: Arc<dyn ChildResolver>,
    ) -> std::result::Result<Self, ConfigError> {
        let backend = Backend::open(&diskdb, &config, &resolver)?;
        let preimages = config
            .preimages
            .then(|| PreimageStore::new(Arc::clone(&diskdb)));
        Ok(Self {
            diskdb,
            resolver,
            preimages,
            inner: RwLock::new(Inner { config, backend }),
        })
    }

    /// Returns a reader for the state rooted at `root`.
    pub fn reader(&self, root: H256) -> Result<Reader> {
        if root == self.empty_root() {
            return Ok(Reader::Empty(root));
        }
        match &self.inner.read().backend {
            Backend::Hash(db) => db.reader(root).map(Reader::Hash),
            Backend::Zk(db) => db.reader(root).map(Reader::Zk),
            Backend::Path(db) => db.reader(root).map(Reader::Path),
        }
    }

    /// Applies the transition `parent -> root`. Preimages are flushed
    /// first if the cache is over its threshold.
    pub fn update(
        &self,
        root: H256,
        parent: H256,
        block: u64,
        nodes: MergedNodeSet,
        states: StateSet,
    ) -> Result<()> {
        if let Some(preimages) = &self.preimages {
            preimages.commit(false)?;
        }
        match &self.inner.read().backend {
            Backend::Hash(db) => db.update(root, parent, block, nodes, states),
            Backend::Zk(db) => db.update(root, parent, block, nodes, states),
            Backend::Path(db) => db.update(root, parent, block, nodes, states),
        }
    }

    /// Flushes every preimage, then makes the state `root` durable.
    /// `verbose` raises the log level of the summary.
    pub fn commit(&self, root: H256, verbose: bool) -> Result<()> {
        self.write_preimages()?;
        match &self.inner.read().backend {
            Backend::Hash(db) => db.commit(root, verbose),
            Backend::Zk(db) => db.commit(root, verbose),
            Backend::Path(db) => db.commit(root, verbose),
        }
    }

    /// Returns `(diff layers, dirty or buffered nodes, preimages)`.
    pub fn size(&self) -> (StorageSize, StorageSize, StorageSize) {
        let (diffs, nodes) = match &self.inner.read().backend {
            Backend::Hash(db) => db.size(),
            Backend::Zk(db) => db.size(),
            Backend::Path(db) => db.size(),
        };
        let preimages = self
            .preimages
            .as_ref()
            .map_or(StorageSize::ZERO, PreimageStore::size);
        (diffs, nodes, preimages)
    }

    /// Flushes every preimage and releases the backend.
    pub fn close(&self) -> Result<()> {
        self.write_preimages()?;
        match &self.inner.read().backend {
            Backend::Hash(db) => db.close(),
            Backend::Zk(db) => db.close(),
            Backend::Path(db) => db.close(),
        }
    }

    /// Switches between the standard and the circuit-friendly hash
    /// backend. Pending nodes of the replaced backend are dropped.
    pub fn switch_variant(&self, want_zk: bool) -> std::result::Result<(), ConfigError> {
        let mut inner = self.inner.write();
        if inner.config.zktrie == want_zk {
            return Ok(());
        }
        let config = Config {
            zktrie: want_zk,
            ..inner.config.clone()
        };
        let backend = Backend::open(&self.diskdb, &config, &self.resolver)?;
        info!(from = inner.backend.name(), to = backend.name(), "switched trie backend");
        *inner = Inner { config, backend };
        Ok(())
    }

    /// Node storage scheme of the active backend.
    pub fn scheme(&self) -> Scheme {
        match self.inner.read().backend {
            Backend::Path(_) => Scheme::Path,
            Backend::Hash(_) | Backend::Zk(_) => Scheme::Hash,
        }
    }

    /// Returns true if the state data has been initialized.
    pub fn initialized(&self, genesis_root: H256) -> Result<bool> {
        match &self.inner.read().backend {
            Backend::Hash(db) => db.initialized(genesis_root),
            Backend::Zk(db) => db.initialized(genesis_root),
            Backend::Path(db) => Ok(db.initialized(genesis_root)),
        }
    }

    /// Root of the empty state for the active trie variant.
    pub fn empty_root(&self) -> H256 {
        let inner = self.inner.read();
        match (inner.config.zktrie, inner.config.experimental_zktrie) {
            (true, true) => EMPTY_CODE_HASH,
            (true, false) => H256::zero(),
            (false, _) => EMPTY_ROOT,
        }
    }

    /// Whether the circuit-friendly trie backend is active.
    pub fn is_zk(&self) -> bool {
        self.inner.read().config.zktrie
    }

    /// Whether the zk trie also stores the state, which changes the empty root.
    pub fn is_zk_state_trie(&self) -> bool {
        let inner = self.inner.read();
        inner.config.zktrie && inner.config.experimental_zktrie
    }

    /// Forces every buffered preimage to disk.
    pub fn write_preimages(&self) -> Result<()> {
        match &self.preimages {
            Some(preimages) => preimages.commit(true),
            None => Ok(()),
        }
    }

    /// Returns the preimage of `hash`; `None` if unknown or not recorded.
    pub fn preimage(&self, hash: &H256) -> Result<Option<Vec<u8>>> {
        match &self.preimages {
            Some(preimages) => preimages.preimage(hash),
            None => Ok(None),
        }
    }

    /// Buffers preimages if recording is enabled.
    pub fn insert_preimages(&self, preimages: impl IntoIterator<Item = (H256, Vec<u8>)>) {
        if let Some(store) = &self.preimages {
            store.insert(preimages);
        }
    }

    // Hash scheme.

    /// Shrinks the dirty node cache to `limit`, flushing preimages over
    /// their threshold first.
    pub fn cap(&self, limit: StorageSize) -> Result<()> {
        if let Some(preimages) = &self.preimages {
            preimages.commit(false)?;
        }
        match &self.inner.read().backend {
            Backend::Hash(db) => db.cap(limit),
            Backend::Zk(db) => db.cap(limit),
            backend => Err(backend.unsupported("cap")),
        }
    }

    /// Adds a reference from `parent` to `root`; a zero parent holds `root`
    /// as a live state. Fails if `root` was released and part of its
    /// subtree has been evicted. A no-op for the zk trie.
    pub fn reference(&self, root: H256, parent: H256) -> Result<()> {
        match &self.inner.read().backend {
            Backend::Hash(db) => db.reference(root, parent)?,
            Backend::Zk(db) => db.reference(root, parent),
            backend => return Err(backend.unsupported("reference")),
        }
        Ok(())
    }

    /// Drops a root hold. Released nodes stay readable until [`cap`](Self::cap)
    /// evicts them.
    pub fn dereference(&self, root: H256) -> Result<()> {
        match &self.inner.read().backend {
            Backend::Hash(db) => db.dereference(root),
            Backend::Zk(db) => db.dereference(root),
            backend => return Err(backend.unsupported("dereference")),
        }
        Ok(())
    }

    /// Returns the blob of the node with `hash`.
    pub fn node(&self, hash: H256) -> Result<Vec<u8>> {
        match &self.inner.read().backend {
            Backend::Hash(db) => db.node(hash),
            Backend::Zk(db) => db.node(hash),
            backend => Err(backend.unsupported("node")),
        }
    }

    // Path scheme.

    /// Rolls the state back to `target`; see [`PathDatabase::recover`].
    pub fn recover(&self, target: H256, loader: &dyn TrieLoader) -> Result<()> {
        match &self.inner.read().backend {
            Backend::Path(db) => db.recover(target, loader),
            backend => Err(backend.unsupported("recover")),
        }
    }

    /// Whether the state can be rolled back to `root` using stored history.
    pub fn recoverable(&self, root: H256) -> Result<bool> {
        match &self.inner.read().backend {
            Backend::Path(db) => db.recoverable(root),
            backend => Err(backend.unsupported("recoverable")),
        }
    }

    /// Rebuilds the path backend on the persisted state `root`, dropping
    /// every in-memory layer and all state history.
    pub fn reset(&self, root: H256) -> Result<()> {
        match &self.inner.read().backend {
            Backend::Path(db) => db.reset(root),
            backend => Err(backend.unsupported("reset")),
        }
    }

    /// Persists the in-memory layers up to `root` so they survive a restart.
    /// The database rejects further mutations afterwards.
    pub fn journal(&self, root: H256) -> Result<()> {
        match &self.inner.read().backend {
            Backend::Path(db) => db.journal(root),
            backend => Err(backend.unsupported("journal")),
        }
    }

    /// Resizes the dirty node buffer, flushing if it no longer fits.
    pub fn set_buffer_size(&self, size: StorageSize) -> Result<()> {
        match &self.inner.read().backend {
            Backend::Path(db) => db.set_buffer_size(size),
            backend => Err(backend.unsupported("set_buffer_size")),
        }
    }

    // Circuit-friendly trie.

    /// Buffers a raw key-value pair in the zk trie backend.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        match &self.inner.read().backend {
            Backend::Zk(db) => db.put(key, value),
            backend => Err(backend.unsupported("put")),
        }
    }

    /// Reads a raw key written through [`put`](Self::put) or committed earlier.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        match &self.inner.read().backend {
            Backend::Zk(db) => db.get(key),
            backend => Err(backend.unsupported("get")),
        }
    }

    /// Records `preimage` under the key hash carried by the zk trie as a
    /// field element.
    pub fn update_preimage(&self, preimage: &[u8], hash_field: U256) -> Result<()> {
        let inner = self.inner.read();
        if !matches!(inner.backend, Backend::Zk(_)) {
            error!(backend = inner.backend.name(), "update_preimage requires the zktrie backend");
            return Err(inner.backend.unsupported("update_preimage"));
        }
        if let Some(preimages) = &self.preimages {
            let hash = H256(hash_field.to_big_endian());
            preimages.insert([(hash, preimage.to_vec())]);
        }
        Ok(())
    }
}
