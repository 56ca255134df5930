//! Discovery of parent → child edges inside encoded trie nodes.
//!
//! The hash scheme keeps reference counts on nodes, so when a node is
//! inserted it has to know which stored nodes the blob points at. Nodes
//! shorter than a hash are embedded in their parent and never stored on
//! their own; resolvers walk through them.

use primitive_types::H256;

use super::account::Account;
use super::node::HASH_SIZE;
use super::rlp_decode::{RlpError, RlpItem};

/// Extracts references from encoded trie nodes.
pub trait ChildResolver: Send + Sync {
    /// Calls `f` with the hash of every separately stored child of `blob`.
    fn for_each_child(&self, blob: &[u8], f: &mut dyn FnMut(H256)) -> Result<(), RlpError>;

    /// Returns the storage trie root held in an account leaf value.
    fn storage_root(&self, account: &[u8]) -> Result<H256, RlpError>;

    /// Collects the children of `blob`.
    fn children(&self, blob: &[u8]) -> Result<Vec<H256>, RlpError> {
        let mut children = Vec::new();
        self.for_each_child(blob, &mut |hash| children.push(hash))?;
        Ok(children)
    }
}

/// Resolver for the RLP encoded Merkle Patricia trie.
#[derive(Clone, Copy, Debug, Default)]
pub struct MptResolver;

impl MptResolver {
    fn walk_node(item: &RlpItem<'_>, f: &mut dyn FnMut(H256)) -> Result<(), RlpError> {
        let items = item.items()?;
        match items.len() {
            17 => {
                for child in &items[..16] {
                    Self::walk_ref(child, f)?;
                }
                Ok(())
            }
            2 => {
                let key = items[0].bytes()?;
                let is_leaf = key.first().map_or(false, |b| b >> 4 & 0x2 != 0);
                if is_leaf {
                    Ok(())
                } else {
                    Self::walk_ref(&items[1], f)
                }
            }
            _ => Err(RlpError::ExpectedList),
        }
    }

    fn walk_ref(item: &RlpItem<'_>, f: &mut dyn FnMut(H256)) -> Result<(), RlpError> {
        if item.is_list() {
            // Each level of embedding is strictly shorter than a hash, which
            // bounds the recursion.
            if item.raw.len() >= HASH_SIZE {
                return Err(RlpError::OversizedEmbed(item.raw.len()));
            }
            return Self::walk_node(item, f);
        }
        match item.payload.len() {
            0 => Ok(()),
            HASH_SIZE => {
                f(H256::from_slice(item.payload));
                Ok(())
            }
            _ => Err(RlpError::ExpectedBytes),
        }
    }
}

impl ChildResolver for MptResolver {
    fn for_each_child(&self, blob: &[u8], f: &mut dyn FnMut(H256)) -> Result<(), RlpError> {
        Self::walk_node(&RlpItem::decode(blob)?, f)
    }

    fn storage_root(&self, account: &[u8]) -> Result<H256, RlpError> {
        Ok(Account::decode(account)?.storage_root)
    }
}
