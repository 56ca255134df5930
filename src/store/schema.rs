//! Key layout of everything the trie database persists.
//!
//! | data                | key                               |
//! |---------------------|-----------------------------------|
//! | hash-scheme node    | 32-byte node hash                 |
//! | zk trie node        | `"zk-"` + raw key                 |
//! | account trie node   | `"A"` + path                      |
//! | storage trie node   | `"O"` + owner + path              |
//! | trie journal        | `"TrieJournal"`                   |
//! | persistent state id | `"LastStateID"`                   |
//! | state id lookup     | `"L"` + state root                |
//! | state history       | `"h"` + id (u64 big-endian)       |
//! | history tail        | `"HistoryTail"`                   |
//! | preimage            | `"secure-key-"` + hash            |
//!
//! Readers take the store, writers queue into a [`Batch`].

use std::io;

use primitive_types::H256;

use super::{Batch, KeyValueStore};

pub const ZK_NODE_PREFIX: &[u8] = b"zk-";
pub const ACCOUNT_TRIE_PREFIX: &[u8] = b"A";
pub const STORAGE_TRIE_PREFIX: &[u8] = b"O";
pub const STATE_ID_PREFIX: &[u8] = b"L";
pub const HISTORY_PREFIX: &[u8] = b"h";
pub const PREIMAGE_PREFIX: &[u8] = b"secure-key-";

pub const TRIE_JOURNAL_KEY: &[u8] = b"TrieJournal";
pub const PERSISTENT_STATE_ID_KEY: &[u8] = b"LastStateID";
pub const HISTORY_TAIL_KEY: &[u8] = b"HistoryTail";

fn prefixed(prefix: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let len = prefix.len() + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.extend_from_slice(prefix);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

fn decode_u64(value: &[u8], what: &str) -> io::Result<u64> {
    let bytes: [u8; 8] = value.try_into().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{what}: expected 8 bytes, got {}", value.len()),
        )
    })?;
    Ok(u64::from_be_bytes(bytes))
}

// Hash scheme.

pub fn read_legacy_node(db: &dyn KeyValueStore, hash: &H256) -> io::Result<Option<Vec<u8>>> {
    db.get(hash.as_bytes())
}

pub fn has_legacy_node(db: &dyn KeyValueStore, hash: &H256) -> io::Result<bool> {
    db.has(hash.as_bytes())
}

pub fn write_legacy_node(batch: &mut Batch, hash: &H256, blob: &[u8]) {
    batch.put(hash.as_bytes(), blob);
}

pub fn zk_node_key(key: &[u8]) -> Vec<u8> {
    prefixed(ZK_NODE_PREFIX, &[key])
}

pub fn read_zk_node(db: &dyn KeyValueStore, key: &[u8]) -> io::Result<Option<Vec<u8>>> {
    db.get(&zk_node_key(key))
}

pub fn write_zk_node(batch: &mut Batch, key: &[u8], value: &[u8]) {
    batch.put(zk_node_key(key), value);
}

// Path scheme.

/// Key of the node at `path` in the trie of `owner` (zero = account trie).
pub fn trie_node_key(owner: &H256, path: &[u8]) -> Vec<u8> {
    if owner.is_zero() {
        prefixed(ACCOUNT_TRIE_PREFIX, &[path])
    } else {
        prefixed(STORAGE_TRIE_PREFIX, &[owner.as_bytes(), path])
    }
}

pub fn read_trie_node(
    db: &dyn KeyValueStore,
    owner: &H256,
    path: &[u8],
) -> io::Result<Option<Vec<u8>>> {
    db.get(&trie_node_key(owner, path))
}

pub fn write_trie_node(batch: &mut Batch, owner: &H256, path: &[u8], blob: &[u8]) {
    batch.put(trie_node_key(owner, path), blob);
}

pub fn delete_trie_node(batch: &mut Batch, owner: &H256, path: &[u8]) {
    batch.delete(trie_node_key(owner, path));
}

pub fn read_trie_journal(db: &dyn KeyValueStore) -> io::Result<Option<Vec<u8>>> {
    db.get(TRIE_JOURNAL_KEY)
}

pub fn write_trie_journal(batch: &mut Batch, journal: &[u8]) {
    batch.put(TRIE_JOURNAL_KEY, journal);
}

pub fn delete_trie_journal(batch: &mut Batch) {
    batch.delete(TRIE_JOURNAL_KEY);
}

/// Id of the state persisted on disk; 0 when nothing was ever flushed.
pub fn read_persistent_state_id(db: &dyn KeyValueStore) -> io::Result<u64> {
    match db.get(PERSISTENT_STATE_ID_KEY)? {
        Some(value) => decode_u64(&value, "persistent state id"),
        None => Ok(0),
    }
}

pub fn write_persistent_state_id(batch: &mut Batch, id: u64) {
    batch.put(PERSISTENT_STATE_ID_KEY, id.to_be_bytes());
}

pub fn state_id_key(root: &H256) -> Vec<u8> {
    prefixed(STATE_ID_PREFIX, &[root.as_bytes()])
}

pub fn read_state_id(db: &dyn KeyValueStore, root: &H256) -> io::Result<Option<u64>> {
    db.get(&state_id_key(root))?
        .map(|value| decode_u64(&value, "state id"))
        .transpose()
}

pub fn write_state_id(batch: &mut Batch, root: &H256, id: u64) {
    batch.put(state_id_key(root), id.to_be_bytes());
}

pub fn delete_state_id(batch: &mut Batch, root: &H256) {
    batch.delete(state_id_key(root));
}

pub fn history_key(id: u64) -> Vec<u8> {
    prefixed(HISTORY_PREFIX, &[&id.to_be_bytes()])
}

pub fn read_history(db: &dyn KeyValueStore, id: u64) -> io::Result<Option<Vec<u8>>> {
    db.get(&history_key(id))
}

pub fn write_history(batch: &mut Batch, id: u64, blob: &[u8]) {
    batch.put(history_key(id), blob);
}

pub fn delete_history(batch: &mut Batch, id: u64) {
    batch.delete(history_key(id));
}

/// Id of the newest pruned history entry; entries `tail+1..` may exist.
pub fn read_history_tail(db: &dyn KeyValueStore) -> io::Result<u64> {
    match db.get(HISTORY_TAIL_KEY)? {
        Some(value) => decode_u64(&value, "history tail"),
        None => Ok(0),
    }
}

pub fn write_history_tail(batch: &mut Batch, tail: u64) {
    batch.put(HISTORY_TAIL_KEY, tail.to_be_bytes());
}

// Preimages.

pub fn preimage_key(hash: &H256) -> Vec<u8> {
    prefixed(PREIMAGE_PREFIX, &[hash.as_bytes()])
}

pub fn read_preimage(db: &dyn KeyValueStore, hash: &H256) -> io::Result<Option<Vec<u8>>> {
    db.get(&preimage_key(hash))
}

pub fn write_preimage(batch: &mut Batch, hash: &H256, preimage: &[u8]) {
    batch.put(preimage_key(hash), preimage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDb;

    #[test]
    fn test_trie_node_keys() {
        assert_eq!(trie_node_key(&H256::zero(), &[1, 2]), b"A\x01\x02".to_vec());

        let owner = H256::repeat_byte(0xaa);
        let key = trie_node_key(&owner, &[3]);
        assert_eq!(key.len(), 1 + 32 + 1);
        assert_eq!(key[0], b'O');
        assert_eq!(&key[1..33], owner.as_bytes());
    }

    #[test]
    fn test_history_keys_sort_by_id() {
        assert!(history_key(1) < history_key(2));
        assert!(history_key(255) < history_key(256));
    }

    #[test]
    fn test_u64_values() {
        let db = MemoryDb::new();
        assert_eq!(read_persistent_state_id(&db).unwrap(), 0);
        assert_eq!(read_state_id(&db, &H256::zero()).unwrap(), None);

        let mut batch = Batch::new();
        write_persistent_state_id(&mut batch, 42);
        write_state_id(&mut batch, &H256::repeat_byte(1), 7);
        db.write_batch(batch).unwrap();

        assert_eq!(read_persistent_state_id(&db).unwrap(), 42);
        assert_eq!(read_state_id(&db, &H256::repeat_byte(1)).unwrap(), Some(7));

        db.put(HISTORY_TAIL_KEY, b"bad").unwrap();
        let err = read_history_tail(&db).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
