use primitive_types::H256;

use crate::error::{Error, Result};
use crate::hashdb::{HashReader, ZkReader};
use crate::pathdb::PathReader;

/// Read-only view of one state, served by the active backend.
#[derive(Clone)]
pub enum Reader {
    Hash(HashReader),
    Zk(ZkReader),
    Path(PathReader),
    /// The empty state: it holds no nodes.
    Empty(H256),
}

impl Reader {
    /// Returns the node at `path` in the trie of `owner`, which must hash
    /// to `hash`. Hash-scheme backends only use `hash`.
    pub fn node(&self, owner: H256, path: &[u8], hash: H256) -> Result<Vec<u8>> {
        match self {
            Reader::Hash(reader) => reader.node(owner, path, hash),
            Reader::Zk(reader) => reader.node(owner, path, hash),
            Reader::Path(reader) => reader.node(owner, path, hash),
            Reader::Empty(_) => Err(Error::MissingNode {
                owner,
                path: path.to_vec(),
                hash,
            }),
        }
    }
}
