#![no_main]

use std::fs;

use libfuzzer_sys::fuzz_target;
use triedb::store::FileDb;

fuzz_target!(|data: &[u8]| {
    // Replaying an arbitrary log keeps the valid prefix and drops the rest.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trie.log");
    fs::write(&path, data).unwrap();

    let db = FileDb::open(&path).unwrap();
    assert!(db.file_size() <= data.len() as u64);
});
