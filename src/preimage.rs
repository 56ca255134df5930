//! Preimage cache.
//!
//! Buffers `hash → original key` pairs in memory and writes them to the
//! byte store in one batch, either once the buffer grows past
//! [`PREIMAGE_FLUSH_THRESHOLD`] or when a flush is forced by a commit.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use primitive_types::H256;
use rustc_hash::FxBuildHasher;
use tracing::debug;

use crate::data::{FastHashMap, StorageSize};
use crate::error::Result;
use crate::merkle::HASH_SIZE;
use crate::store::{schema, Batch, KeyValueStore};

/// Buffer size above which a non-forced commit flushes.
pub const PREIMAGE_FLUSH_THRESHOLD: StorageSize = StorageSize::mib(4);

struct Pending {
    preimages: FastHashMap<H256, Vec<u8>>,
    size: StorageSize,
}

impl Pending {
    fn new() -> Self {
        Self {
            preimages: HashMap::with_hasher(FxBuildHasher),
            size: StorageSize::ZERO,
        }
    }
}

/// Write-behind cache of trie key preimages.
pub struct PreimageStore {
    disk: Arc<dyn KeyValueStore>,
    pending: RwLock<Pending>,
}

impl PreimageStore {
    /// Creates an empty cache over `disk`.
    pub fn new(disk: Arc<dyn KeyValueStore>) -> Self {
        Self {
            disk,
            pending: RwLock::new(Pending::new()),
        }
    }

    /// Buffers preimages. A pending entry for the same hash is replaced.
    pub fn insert(&self, preimages: impl IntoIterator<Item = (H256, Vec<u8>)>) {
        let mut pending = self.pending.write();
        for (hash, preimage) in preimages {
            let added = StorageSize::from(HASH_SIZE + preimage.len());
            if let Some(prev) = pending.preimages.insert(hash, preimage) {
                pending.size -= StorageSize::from(HASH_SIZE + prev.len());
            }
            pending.size += added;
        }
    }

    /// Returns the preimage of `hash`, looking at the buffer first.
    pub fn preimage(&self, hash: &H256) -> Result<Option<Vec<u8>>> {
        if let Some(preimage) = self.pending.read().preimages.get(hash) {
            return Ok(Some(preimage.clone()));
        }
        Ok(schema::read_preimage(self.disk.as_ref(), hash)?)
    }

    /// Flushes the buffer if it exceeds the threshold or `force` is set.
    ///
    /// The buffer is only cleared once the batch has been written.
    pub fn commit(&self, force: bool) -> Result<()> {
        let mut pending = self.pending.write();
        if pending.preimages.is_empty() || (!force && pending.size <= PREIMAGE_FLUSH_THRESHOLD) {
            return Ok(());
        }

        let mut batch = Batch::new();
        for (hash, preimage) in &pending.preimages {
            schema::write_preimage(&mut batch, hash, preimage);
        }
        self.disk.write_batch(batch)?;

        debug!(
            count = pending.preimages.len(),
            size = %pending.size,
            force,
            "flushed preimages"
        );
        *pending = Pending::new();
        Ok(())
    }

    /// Bytes held by unflushed preimages.
    pub fn size(&self) -> StorageSize {
        self.pending.read().size
    }

    /// Number of unflushed preimages.
    pub fn len(&self) -> usize {
        self.pending.read().preimages.len()
    }

    /// Returns true if nothing is waiting to be flushed.
    pub fn is_empty(&self) -> bool {
        self.pending.read().preimages.is_empty()
    }
}
