//! Byte-oriented key-value storage underneath the trie database.
//!
//! Both node backends, the preimage cache, the journal and the state
//! history persist through the [`KeyValueStore`] trait. Every group of
//! writes that must land together goes through a single [`Batch`], which
//! implementations apply atomically.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryDb`]: an in-process ordered map, shareable through `Arc`.
//! - [`FileDb`]: an append-only log file of checksummed batch records.

mod file;
mod memory;
mod metrics;
pub mod schema;

pub use file::{FileDb, SyncMode};
pub use memory::MemoryDb;
pub use metrics::{MetricsSnapshot, StoreMetrics};

use std::io;

use serde::{Deserialize, Serialize};

/// A single write inside a [`Batch`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    /// Insert or overwrite a key.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Remove a key.
    Delete { key: Vec<u8> },
}

/// An ordered group of writes applied atomically.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
    size: usize,
}

impl Batch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        let key = key.into();
        let value = value.into();
        self.size += key.len() + value.len();
        self.ops.push(BatchOp::Put { key, value });
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        let key = key.into();
        self.size += key.len();
        self.ops.push(BatchOp::Delete { key });
    }

    /// Bytes queued so far, keys included.
    pub fn value_size(&self) -> usize {
        self.size
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The queued writes, in order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consumes the batch, returning its writes.
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    /// Drops all queued writes.
    pub fn reset(&mut self) {
        self.ops.clear();
        self.size = 0;
    }
}

/// Persistent byte storage.
///
/// Implementations must apply a [`Batch`] atomically: after a crash either
/// every write of the batch is visible or none is.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &[u8]) -> io::Result<Option<Vec<u8>>>;

    /// Applies all writes of `batch` atomically.
    fn write_batch(&self, batch: Batch) -> io::Result<()>;

    /// Returns true if `key` is present.
    fn has(&self, key: &[u8]) -> io::Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Writes a single value.
    fn put(&self, key: &[u8], value: &[u8]) -> io::Result<()> {
        let mut batch = Batch::new();
        batch.put(key, value);
        self.write_batch(batch)
    }

    /// Removes a single value.
    fn delete(&self, key: &[u8]) -> io::Result<()> {
        let mut batch = Batch::new();
        batch.delete(key);
        self.write_batch(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_accounting() {
        let mut batch = Batch::new();
        assert!(batch.is_empty());

        batch.put(b"key".to_vec(), vec![0u8; 10]);
        batch.delete(b"gone".to_vec());
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.value_size(), 3 + 10 + 4);

        batch.reset();
        assert!(batch.is_empty());
        assert_eq!(batch.value_size(), 0);
    }

    #[test]
    fn test_default_methods() {
        let db = MemoryDb::new();
        db.put(b"a", b"1").unwrap();
        assert!(db.has(b"a").unwrap());
        assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));

        db.delete(b"a").unwrap();
        assert!(!db.has(b"a").unwrap());
    }
}
