//! # triedb
//!
//! Storage layer for Ethereum state tries.
//!
//! ## Architecture
//!
//! A single [`Database`] facade owns the preimage cache and one node
//! backend, selected by [`Config`]:
//!
//! 1. **Hash scheme** - nodes keyed by their hash, reference counted in
//!    memory, garbage collected and capped before they reach disk
//! 2. **Circuit-friendly hash scheme** - raw key/value nodes of the zk
//!    trie, buffered and flushed in insertion order
//! 3. **Path scheme** - nodes keyed by owner and path, with in-memory
//!    diff layers, a shutdown journal and reversible state history
//!
//! ## Modules
//!
//! - `database` - Facade, configuration and readers
//! - `hashdb` - Hash-scheme backends
//! - `pathdb` - Path-scheme backend
//! - `preimage` - Trie key preimage cache
//! - `data` - Node sets, state sets and sizes
//! - `merkle` - Node encoding and child resolution
//! - `store` - Byte stores and the on-disk key layout

mod cache;
pub mod data;
pub mod database;
pub mod error;
pub mod hashdb;
pub mod merkle;
pub mod pathdb;
pub mod preimage;
pub mod store;

pub use data::{MergedNodeSet, NodeSet, StateSet, StorageSize, TrieNode};
pub use database::{Config, Database, Reader, Scheme};
pub use error::{ConfigError, Error, ErrorKind, Result};
pub use hashdb::HashConfig;
pub use pathdb::{PathConfig, TrieLoader};
pub use store::{FileDb, KeyValueStore, MemoryDb};
