#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use primitive_types::H256;
use triedb::pathdb::{PathConfig, PathDatabase};
use triedb::store::schema;
use triedb::store::Batch;
use triedb::{KeyValueStore, MemoryDb};

fuzz_target!(|data: &[u8]| {
    // A corrupt journal is discarded at startup, never fatal.
    let disk = Arc::new(MemoryDb::new());
    let mut batch = Batch::new();
    schema::write_trie_journal(&mut batch, data);
    disk.write_batch(batch).unwrap();

    let db = PathDatabase::new(disk, &PathConfig::default()).unwrap();
    let _ = db.reader(H256::zero());
});
