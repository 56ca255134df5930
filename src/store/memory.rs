//! In-memory byte store.

use std::collections::BTreeMap;
use std::io;

use parking_lot::RwLock;

use super::{Batch, BatchOp, KeyValueStore, StoreMetrics};

/// An ordered in-memory key-value store.
///
/// Cloning the surrounding `Arc` and reopening a database on it simulates
/// a process restart that keeps everything written so far.
#[derive(Debug, Default)]
pub struct MemoryDb {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    metrics: StoreMetrics,
}

impl MemoryDb {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns all keys starting with `prefix`, in order.
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.data
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Returns the store's metrics.
    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }
}

impl KeyValueStore for MemoryDb {
    fn get(&self, key: &[u8]) -> io::Result<Option<Vec<u8>>> {
        let value = self.data.read().get(key).cloned();
        self.metrics.record_read(value.as_ref().map(Vec::len));
        Ok(value)
    }

    fn write_batch(&self, batch: Batch) -> io::Result<()> {
        let bytes = batch.value_size() as u64;
        let (mut writes, mut deletes) = (0, 0);

        let mut data = self.data.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                    writes += 1;
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                    deletes += 1;
                }
            }
        }
        drop(data);

        self.metrics.record_batch(writes, deletes, bytes);
        Ok(())
    }
}
