//! Node storage for the circuit-friendly trie.
//!
//! The zk trie manages its own node keys, so this backend is a write-behind
//! cache of raw `key → value` pairs. There is no reference counting: nodes
//! are never collected in memory, only flushed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::RwLock;
use primitive_types::H256;
use rustc_hash::FxBuildHasher;
use tracing::{debug, info};

use super::HashConfig;
use crate::cache::CleanCache;
use crate::data::{FastHashMap, MergedNodeSet, StateSet, StorageSize};
use crate::error::{Error, ErrorKind, Result};
use crate::store::{schema, Batch, KeyValueStore};

struct Entry {
    seq: u64,
    value: Vec<u8>,
}

struct ZkDirties {
    entries: FastHashMap<Vec<u8>, Entry>,
    order: BTreeMap<u64, Vec<u8>>,
    next_seq: u64,
    size: StorageSize,
}

impl ZkDirties {
    fn new() -> Self {
        Self {
            entries: HashMap::with_hasher(FxBuildHasher),
            order: BTreeMap::new(),
            next_seq: 0,
            size: StorageSize::ZERO,
        }
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.size += StorageSize::from(key.len() + value.len());
        self.order.insert(seq, key.clone());
        if let Some(prev) = self.entries.insert(key.clone(), Entry { seq, value }) {
            self.order.remove(&prev.seq);
            self.size -= StorageSize::from(key.len() + prev.value.len());
        }
    }

    fn take_all(&mut self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.order.clear();
        self.size = StorageSize::ZERO;
        self.entries
            .drain()
            .map(|(key, entry)| (key, entry.value))
            .collect()
    }

    /// Removes the oldest entries until the cache fits in `limit`.
    fn take_oldest(&mut self, limit: StorageSize) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut taken = Vec::new();
        while self.size > limit {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&key) {
                self.size -= StorageSize::from(key.len() + entry.value.len());
                taken.push((key, entry.value));
            }
        }
        taken
    }
}

/// Raw key-value node database for the circuit-friendly trie.
pub struct ZkDatabase {
    diskdb: Arc<dyn KeyValueStore>,
    cleans: CleanCache<Vec<u8>>,
    dirties: RwLock<ZkDirties>,
}

impl ZkDatabase {
    /// Creates a database over `diskdb`.
    pub fn new(diskdb: Arc<dyn KeyValueStore>, config: &HashConfig) -> Self {
        Self {
            diskdb,
            cleans: CleanCache::new(config.clean_cache_nodes),
            dirties: RwLock::new(ZkDirties::new()),
        }
    }

    /// Returns true if the genesis root node is on disk.
    pub fn initialized(&self, genesis_root: H256) -> Result<bool> {
        Ok(self
            .diskdb
            .has(&schema::zk_node_key(genesis_root.as_bytes()))?)
    }

    /// Buffers a raw key-value pair.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.dirties.write().put(key.to_vec(), value.to_vec());
        Ok(())
    }

    /// Reads a raw key from the dirty cache, the clean cache or disk.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if let Some(entry) = self.dirties.read().entries.get(key) {
            return Ok(entry.value.clone());
        }
        let key = key.to_vec();
        if let Some(value) = self.cleans.get(&key) {
            return Ok(value);
        }
        match schema::read_zk_node(self.diskdb.as_ref(), &key)? {
            Some(value) => {
                self.cleans.insert(key, value.clone());
                Ok(value)
            }
            None => Err(Error::MissingKey(key)),
        }
    }

    /// Buffers every non-deleted node of the set under its hash.
    pub fn update(
        &self,
        root: H256,
        _parent: H256,
        block: u64,
        nodes: MergedNodeSet,
        _states: StateSet,
    ) -> Result<()> {
        let mut dirties = self.dirties.write();
        let mut count = 0;
        for set in nodes.into_ordered() {
            let (sorted, _) = set.into_sorted();
            for (_, node) in sorted {
                if node.is_deleted() {
                    continue;
                }
                dirties.put(node.hash.as_bytes().to_vec(), node.blob);
                count += 1;
            }
        }
        debug!(block, root = ?root, count, "inserted zk trie nodes");
        Ok(())
    }

    /// Writes every buffered entry in one batch.
    pub fn commit(&self, root: H256, verbose: bool) -> Result<()> {
        let start = Instant::now();
        let mut dirties = self.dirties.write();
        let entries = dirties.take_all();
        let (count, size) = match self.flush(entries) {
            Ok(done) => done,
            Err((err, entries)) => {
                // Put everything back; nothing was written.
                for (key, value) in entries {
                    dirties.put(key, value);
                }
                return Err(err);
            }
        };
        let elapsed = start.elapsed();
        if verbose {
            info!(root = ?root, count, size = %size, ?elapsed, "persisted zk trie from memory database");
        } else {
            debug!(root = ?root, count, size = %size, ?elapsed, "persisted zk trie from memory database");
        }
        Ok(())
    }

    /// Flushes the oldest entries until the buffer fits in `limit`.
    pub fn cap(&self, limit: StorageSize) -> Result<()> {
        let mut dirties = self.dirties.write();
        let entries = dirties.take_oldest(limit);
        match self.flush(entries) {
            Ok((count, size)) => {
                debug!(count, size = %size, live = %dirties.size, "capped zk trie memory database");
                Ok(())
            }
            Err((err, entries)) => {
                for (key, value) in entries {
                    dirties.put(key, value);
                }
                Err(err)
            }
        }
    }

    fn flush(
        &self,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> std::result::Result<(usize, StorageSize), (Error, Vec<(Vec<u8>, Vec<u8>)>)> {
        if entries.is_empty() {
            return Ok((0, StorageSize::ZERO));
        }
        let mut batch = Batch::new();
        for (key, value) in &entries {
            schema::write_zk_node(&mut batch, key, value);
        }
        let size = StorageSize::from(batch.value_size());
        if let Err(err) = self.diskdb.write_batch(batch) {
            return Err((err.into(), entries));
        }
        let count = entries.len();
        for (key, value) in entries {
            self.cleans.insert(key, value);
        }
        Ok((count, size))
    }

    /// Zk nodes are not reference counted; accepted for interface parity.
    pub fn reference(&self, _child: H256, _parent: H256) {}

    /// Zk nodes are not reference counted; accepted for interface parity.
    pub fn dereference(&self, _root: H256) {}

    /// Returns the node stored under `hash`.
    pub fn node(&self, hash: H256) -> Result<Vec<u8>> {
        self.get(hash.as_bytes())
    }

    /// Returns `(0, buffered bytes)`.
    pub fn size(&self) -> (StorageSize, StorageSize) {
        (StorageSize::ZERO, self.dirties.read().size)
    }

    /// Returns a reader for the state rooted at `root`.
    pub fn reader(self: &Arc<Self>, root: H256) -> Result<ZkReader> {
        match self.node(root) {
            Ok(_) => Ok(ZkReader {
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

/// Reader over a zk trie state.
#[derive(Clone)]
pub struct ZkReader {
    db: Arc<ZkDatabase>,
}

impl ZkReader {
    /// Returns the node stored under `hash`.
    pub fn node(&self, owner: H256, path: &[u8], hash: H256) -> Result<Vec<u8>> {
        self.db.node(hash).map_err(|err| match err {
            Error::MissingKey(_) => Error::MissingNode {
                owner,
                path: path.to_vec(),
                hash,
            },
            err => err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{NodeSet, TrieNode};
    use crate::store::MemoryDb;

    fn setup() -> (Arc<MemoryDb>, Arc<ZkDatabase>) {
        let disk = Arc::new(MemoryDb::new());
        let db = Arc::new(ZkDatabase::new(disk.clone(), &HashConfig::default()));
        (disk, db)
    }

    #[test]
    fn test_put_get_commit() {
        let (disk, db) = setup();
        db.put(b"k1", b"v1").unwrap();
        db.put(b"k1", b"v2").unwrap();
        assert_eq!(db.get(b"k1").unwrap(), b"v2".to_vec());
        assert_eq!(db.size().1, StorageSize::from(4));
        assert!(disk.is_empty());

        db.commit(H256::zero(), false).unwrap();
        assert_eq!(db.size().1, StorageSize::ZERO);
        assert_eq!(disk.get(b"zk-k1").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(db.get(b"k1").unwrap(), b"v2".to_vec());

        let err = db.get(b"absent").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_cap_flushes_oldest() {
        let (disk, db) = setup();
        db.put(b"a", &[0; 9]).unwrap();
        db.put(b"b", &[0; 9]).unwrap();
        db.put(b"c", &[0; 9]).unwrap();

        db.cap(StorageSize::from(20)).unwrap();
        assert_eq!(db.size().1, StorageSize::from(20));
        assert!(disk.has(b"zk-a").unwrap());
        assert!(!disk.has(b"zk-b").unwrap());
    }

    #[test]
    fn test_update_and_reader() {
        let (_, db) = setup();
        let node = TrieNode::from_blob(vec![7; 40]);
        let mut set = NodeSet::new(H256::zero());
        set.add_node(vec![], node.clone());
        set.add_node(vec![1], TrieNode::deleted());
        db.update(node.hash, H256::zero(), 1, MergedNodeSet::with_set(set), StateSet::new())
            .unwrap();

        let reader = db.reader(node.hash).unwrap();
        assert_eq!(reader.node(H256::zero(), &[], node.hash).unwrap(), node.blob);
        assert!(matches!(
            reader.node(H256::zero(), &[2], H256::repeat_byte(2)),
            Err(Error::MissingNode { .. })
        ));
        assert!(matches!(db.reader(H256::repeat_byte(9)), Err(Error::MissingRoot(_))));
    }
}
