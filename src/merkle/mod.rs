//! Node codec boundary.
//!
//! The database treats node blobs as opaque bytes except in two places:
//! the hash scheme resolves the children of a node to maintain reference
//! counts, and links storage tries to the account leaves that hold their
//! roots. This module provides the hash function, the RLP codec for the
//! standard Merkle Patricia encoding, and the [`ChildResolver`] seam.

mod account;
mod node;
mod resolver;
mod rlp_decode;
mod rlp_encode;

#[cfg(test)]
mod tests;

pub use account::Account;
pub use node::{keccak256, ChildRef, Node, EMPTY_CODE_HASH, EMPTY_ROOT, HASH_SIZE};
pub use resolver::{ChildResolver, MptResolver};
pub use rlp_decode::{ItemKind, RlpError, RlpItem};
pub use rlp_encode::RlpEncoder;
