//! Integration tests for triedb.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use primitive_types::H256;
use triedb::merkle::{keccak256, ChildRef, Node, EMPTY_ROOT};
use triedb::pathdb::PathReader;
use triedb::store::Batch;
use triedb::{
    Config, ConfigError, Database, ErrorKind, FileDb, HashConfig, KeyValueStore, MemoryDb,
    MergedNodeSet, NodeSet, PathConfig, Result, StateSet, StorageSize, TrieLoader, TrieNode,
};

/// Wraps a store and fails every batch write while `fail` is set, and
/// every read while `fail_reads` is.
struct FlakyStore {
    inner: MemoryDb,
    fail: AtomicBool,
    fail_reads: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryDb::new(),
            fail: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn set_failing_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &[u8]) -> io::Result<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
        }
        self.inner.get(key)
    }

    fn write_batch(&self, batch: Batch) -> io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        self.inner.write_batch(batch)
    }
}

/// Account trie with one branch over the given leaves.
fn hash_trie(leaves: &[u8]) -> (H256, MergedNodeSet) {
    let mut set = NodeSet::new(H256::zero());
    let mut branch = Node::branch();
    for &seed in leaves {
        let leaf = Node::leaf(vec![seed], vec![seed; 40]);
        set.add_node(vec![seed], TrieNode::new(leaf.hash(), leaf.encode()));
        branch = branch.with_child(seed as usize, leaf.reference());
    }
    let root = branch.hash();
    set.add_node(vec![], TrieNode::new(root, branch.encode()));
    (root, MergedNodeSet::with_set(set))
}

fn path_root_blob(seed: u8) -> Vec<u8> {
    vec![seed; 48]
}

fn path_root(seed: u8) -> H256 {
    H256(keccak256(&path_root_blob(seed)))
}

/// Path-scheme transition into state `seed`.
fn path_transition(seed: u8) -> MergedNodeSet {
    let mut set = NodeSet::new(H256::zero());
    set.add_node(vec![], TrieNode::from_blob(path_root_blob(seed)));
    set.add_node(vec![seed], TrieNode::from_blob(vec![seed; 33]));
    MergedNodeSet::with_set(set)
}

struct Loader {
    seeds: HashMap<H256, u8>,
}

impl TrieLoader for Loader {
    fn revert(
        &self,
        _reader: &PathReader,
        parent: H256,
        root: H256,
        _states: &StateSet,
    ) -> Result<MergedNodeSet> {
        let mut set = NodeSet::new(H256::zero());
        let parent_blob = self.seeds.get(&parent).map(|seed| path_root_blob(*seed));
        set.add_node(
            vec![],
            parent_blob.map_or_else(TrieNode::deleted, TrieNode::from_blob),
        );
        set.add_node(vec![self.seeds[&root]], TrieNode::deleted());
        Ok(MergedNodeSet::with_set(set))
    }
}

#[test]
fn test_conflicting_configuration_is_fatal() {
    let disk = Arc::new(MemoryDb::new());
    let config = Config {
        hash: Some(HashConfig::default()),
        path: Some(PathConfig::default()),
        ..Config::default()
    };
    assert!(matches!(
        Database::new(disk.clone(), config),
        Err(ConfigError::ConflictingSchemes)
    ));
    let config = Config {
        zktrie: true,
        ..Config::path_defaults()
    };
    assert!(matches!(
        Database::new(disk, config),
        Err(ConfigError::ZkPathScheme)
    ));
}

#[test]
fn test_hash_scheme_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trie.log");

    let (root, nodes) = hash_trie(&[1, 2, 3]);
    {
        let disk = Arc::new(FileDb::open(&path).unwrap());
        let db = Database::new(disk, Config::hash_defaults()).unwrap();
        db.update(root, EMPTY_ROOT, 1, nodes, StateSet::new()).unwrap();
        db.reference(root, H256::zero()).unwrap();
        db.commit(root, true).unwrap();
        db.close().unwrap();
    }

    let disk = Arc::new(FileDb::open(&path).unwrap());
    let db = Database::new(disk, Config::hash_defaults()).unwrap();
    assert!(db.initialized(root).unwrap());
    let reader = db.reader(root).unwrap();
    let leaf = Node::leaf(vec![2], vec![2; 40]);
    assert_eq!(reader.node(H256::zero(), &[2], leaf.hash()).unwrap(), leaf.encode());
}

#[test]
fn test_hash_scheme_garbage_collection() {
    let disk = Arc::new(MemoryDb::new());
    let db = Database::new(disk.clone(), Config::hash_defaults()).unwrap();

    let (old_root, nodes) = hash_trie(&[1, 2]);
    db.update(old_root, EMPTY_ROOT, 1, nodes, StateSet::new()).unwrap();
    db.reference(old_root, H256::zero()).unwrap();
    let (new_root, nodes) = hash_trie(&[1, 2, 3]);
    db.update(new_root, old_root, 2, nodes, StateSet::new()).unwrap();
    db.reference(new_root, H256::zero()).unwrap();

    // Dropping the old root releases only the old branch; leaves are shared.
    db.dereference(old_root).unwrap();
    assert!(db.node(old_root).is_ok());

    db.cap(StorageSize::ZERO).unwrap();
    assert_eq!(db.size().1, StorageSize::ZERO);
    assert_eq!(db.node(old_root).unwrap_err().kind(), ErrorKind::NotFound);
    let leaf = Node::leaf(vec![1], vec![1; 40]);
    assert_eq!(db.node(leaf.hash()).unwrap(), leaf.encode());
    assert!(db.reader(new_root).is_ok());
}

#[test]
fn test_path_scheme_journal_and_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trie.log");
    let loader = Loader {
        seeds: (1..=4).map(|seed| (path_root(seed), seed)).collect(),
    };
    let parent = |seed: u8| if seed == 1 { EMPTY_ROOT } else { path_root(seed - 1) };

    {
        let disk = Arc::new(FileDb::open(&path).unwrap());
        let db = Database::new(disk, Config::path_defaults()).unwrap();
        for seed in 1..=3 {
            db.update(path_root(seed), parent(seed), seed as u64, path_transition(seed), StateSet::new())
                .unwrap();
        }
        db.commit(path_root(2), false).unwrap();
        db.journal(path_root(3)).unwrap();
        assert_eq!(
            db.update(path_root(4), path_root(3), 4, path_transition(4), StateSet::new())
                .unwrap_err()
                .kind(),
            ErrorKind::InvariantViolation
        );
    }

    let disk = Arc::new(FileDb::open(&path).unwrap());
    let db = Database::new(disk, Config::path_defaults()).unwrap();
    let reader = db.reader(path_root(3)).unwrap();
    assert_eq!(
        reader.node(H256::zero(), &[], path_root(3)).unwrap(),
        path_root_blob(3)
    );

    db.update(path_root(4), path_root(3), 4, path_transition(4), StateSet::new())
        .unwrap();
    db.commit(path_root(4), false).unwrap();
    assert!(db.recoverable(path_root(1)).unwrap());

    db.recover(path_root(1), &loader).unwrap();
    let reader = db.reader(path_root(1)).unwrap();
    assert_eq!(
        reader.node(H256::zero(), &[1], H256(keccak256(&[1; 33]))).unwrap(),
        vec![1; 33]
    );
    assert!(db.reader(path_root(4)).is_err());
    assert!(!db.recoverable(path_root(2)).unwrap());
    assert_eq!(db.recover(path_root(3), &loader).unwrap_err().kind(), ErrorKind::HistoryUnavailable);
}

#[test]
fn test_preimages_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trie.log");
    let config = Config {
        preimages: true,
        ..Config::hash_defaults()
    };
    let hash = H256(keccak256(b"slot key"));
    {
        let disk = Arc::new(FileDb::open(&path).unwrap());
        let db = Database::new(disk, config.clone()).unwrap();
        db.insert_preimages([(hash, b"slot key".to_vec())]);
        assert!(db.size().2 > StorageSize::ZERO);
        db.close().unwrap();
    }

    let disk = Arc::new(FileDb::open(&path).unwrap());
    let db = Database::new(disk, config).unwrap();
    assert_eq!(db.preimage(&hash).unwrap(), Some(b"slot key".to_vec()));
}

#[test]
fn test_write_failure_propagates_from_hash_commit() {
    let disk = Arc::new(FlakyStore::new());
    let db = Database::new(disk.clone(), Config::hash_defaults()).unwrap();
    let (root, nodes) = hash_trie(&[4, 5]);
    db.update(root, EMPTY_ROOT, 1, nodes, StateSet::new()).unwrap();
    db.reference(root, H256::zero()).unwrap();

    disk.set_failing(true);
    assert_eq!(db.commit(root, false).unwrap_err().kind(), ErrorKind::Io);
    assert!(!db.initialized(root).unwrap());

    // Nothing was marked durable, so a retry writes everything.
    disk.set_failing(false);
    db.commit(root, false).unwrap();
    assert!(db.initialized(root).unwrap());
}

#[test]
fn test_write_failure_propagates_from_path_commit() {
    let disk = Arc::new(FlakyStore::new());
    let db = Database::new(disk.clone(), Config::path_defaults()).unwrap();
    db.update(path_root(1), EMPTY_ROOT, 1, path_transition(1), StateSet::new())
        .unwrap();

    disk.set_failing(true);
    assert_eq!(db.commit(path_root(1), false).unwrap_err().kind(), ErrorKind::Io);
    let reader = db.reader(path_root(1)).unwrap();
    assert_eq!(
        reader.node(H256::zero(), &[], path_root(1)).unwrap(),
        path_root_blob(1)
    );

    disk.set_failing(false);
    db.commit(path_root(1), false).unwrap();
    assert!(db.initialized(path_root(1)).unwrap());
}

#[test]
fn test_embedded_children_are_not_tracked() {
    let disk = Arc::new(MemoryDb::new());
    let db = Database::new(disk, Config::hash_defaults()).unwrap();
    let small = Node::leaf(vec![1], vec![7]);
    assert!(matches!(small.reference(), ChildRef::Embedded(_)));
    let branch = Node::branch().with_child(1, small.reference());
    let mut set = NodeSet::new(H256::zero());
    set.add_node(vec![], TrieNode::new(branch.hash(), branch.encode()));
    db.update(branch.hash(), EMPTY_ROOT, 1, MergedNodeSet::with_set(set), StateSet::new())
        .unwrap();
    assert_eq!(db.node(branch.hash()).unwrap(), branch.encode());
}

#[test]
fn test_failed_hash_update_leaves_no_trace() {
    let disk = Arc::new(FlakyStore::new());
    let db = Database::new(disk.clone(), Config::hash_defaults()).unwrap();
    let (root, nodes) = hash_trie(&[1, 2]);
    let unknown_parent = H256::repeat_byte(0x42);

    disk.set_failing_reads(true);
    let err = db
        .update(root, unknown_parent, 1, nodes.clone(), StateSet::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(db.size().1, StorageSize::ZERO);
    disk.set_failing_reads(false);
    assert_eq!(db.node(root).unwrap_err().kind(), ErrorKind::NotFound);

    db.update(root, unknown_parent, 1, nodes, StateSet::new()).unwrap();
    assert!(db.node(root).is_ok());
}

#[test]
fn test_failed_path_update_can_be_retried() {
    let disk = Arc::new(FlakyStore::new());
    let config = Config {
        path: Some(PathConfig {
            max_diff_layers: 0,
            ..PathConfig::default()
        }),
        ..Config::default()
    };
    let db = Database::new(disk.clone(), config).unwrap();

    // With no diff layers allowed, the update writes history right away.
    disk.set_failing(true);
    let err = db
        .update(path_root(1), EMPTY_ROOT, 1, path_transition(1), StateSet::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(db.reader(path_root(1)).is_err());
    assert_eq!(db.size().0, StorageSize::ZERO);

    disk.set_failing(false);
    db.update(path_root(1), EMPTY_ROOT, 1, path_transition(1), StateSet::new())
        .unwrap();
    let reader = db.reader(path_root(1)).unwrap();
    assert_eq!(
        reader.node(H256::zero(), &[], path_root(1)).unwrap(),
        path_root_blob(1)
    );
}

#[test]
fn test_partially_evicted_root_stays_released() {
    let disk = Arc::new(MemoryDb::new());
    let db = Database::new(disk.clone(), Config::hash_defaults()).unwrap();
    let (root, nodes) = hash_trie(&[1, 2]);
    db.update(root, EMPTY_ROOT, 1, nodes, StateSet::new()).unwrap();
    db.reference(root, H256::zero()).unwrap();
    db.dereference(root).unwrap();

    // Evict a single released node, leaving the root cached.
    let (_, total, _) = db.size();
    db.cap(total - StorageSize::from(1u64)).unwrap();
    assert!(db.node(root).is_ok());

    assert_eq!(db.reference(root, H256::zero()).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(db.reader(root).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(db.commit(root, false).unwrap_err().kind(), ErrorKind::NotFound);

    let reopened = Database::new(disk, Config::hash_defaults()).unwrap();
    assert!(!reopened.initialized(root).unwrap());
}
