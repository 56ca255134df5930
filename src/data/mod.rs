//! Mutation types exchanged between the trie layer and the database.

mod node_set;
mod state_set;
mod storage_size;


pub use node_set::{Leaf, MergedNodeSet, NodeSet, TrieNode};
pub use state_set::StateSet;
pub use storage_size::StorageSize;

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

/// Hash map with the Fx hasher, used for all in-memory node indexes.
pub type FastHashMap<K, V> = HashMap<K, V, FxBuildHasher>;
