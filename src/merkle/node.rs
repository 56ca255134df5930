//! Merkle Patricia trie node types.
//!
//! The database never builds nodes itself; these types exist so callers
//! and tests can produce correctly encoded node blobs.

use primitive_types::H256;
use tiny_keccak::{Hasher, Keccak};

use super::rlp_encode::RlpEncoder;

/// Hash size (Keccak-256).
pub const HASH_SIZE: usize = 32;

/// Reference from a node to one of its children.
///
/// Children whose encoding is shorter than a hash are embedded in the
/// parent instead of being stored separately.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChildRef {
    /// Hash of a separately stored child.
    Hash(H256),
    /// RLP encoding of an embedded child.
    Embedded(Vec<u8>),
}

/// A node in the Merkle Patricia Trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// Empty node (null).
    Empty,

    /// Leaf node: contains the remainder of the key and the value.
    Leaf {
        /// Remaining nibbles of the key.
        path: Vec<u8>,
        /// The value stored at this leaf.
        value: Vec<u8>,
    },

    /// Extension node: contains a shared path prefix and a child.
    Extension {
        /// Shared path prefix (nibbles).
        path: Vec<u8>,
        /// The child.
        child: ChildRef,
    },

    /// Branch node: has up to 16 children (one for each nibble) and an optional value.
    Branch {
        /// Children (16 slots, one per nibble).
        children: Box<[Option<ChildRef>; 16]>,
        /// Optional value stored at this branch.
        value: Option<Vec<u8>>,
    },
}

impl Node {
    /// Creates a leaf node.
    pub fn leaf(path: Vec<u8>, value: Vec<u8>) -> Self {
        Node::Leaf { path, value }
    }

    /// Creates an extension node pointing at a hashed child.
    pub fn extension(path: Vec<u8>, child: H256) -> Self {
        Node::Extension {
            path,
            child: ChildRef::Hash(child),
        }
    }

    /// Creates an empty branch node.
    pub fn branch() -> Self {
        Node::Branch {
            children: Box::default(),
            value: None,
        }
    }

    /// Sets child `index` of a branch node; other node types are left alone.
    pub fn with_child(mut self, index: usize, child: ChildRef) -> Self {
        if let Node::Branch { children, .. } = &mut self {
            children[index & 0x0f] = Some(child);
        }
        self
    }

    /// RLP encodes the node.
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = RlpEncoder::new();
        self.encode_to(&mut encoder);
        encoder.into_bytes()
    }

    /// RLP encodes the node to the given encoder.
    pub fn encode_to(&self, encoder: &mut RlpEncoder) {
        match self {
            Node::Empty => {
                encoder.encode_empty();
            }
            Node::Leaf { path, value } => {
                encoder.encode_list(|e| {
                    e.encode_nibbles(path, true);
                    e.encode_bytes(value);
                });
            }
            Node::Extension { path, child } => {
                encoder.encode_list(|e| {
                    e.encode_nibbles(path, false);
                    encode_child(e, child);
                });
            }
            Node::Branch { children, value } => {
                encoder.encode_list(|e| {
                    for child in children.iter() {
                        match child {
                            Some(child) => encode_child(e, child),
                            None => e.encode_empty(),
                        }
                    }
                    match value {
                        Some(v) => e.encode_bytes(v),
                        None => e.encode_empty(),
                    }
                });
            }
        }
    }

    /// Keccak-256 of the encoded node.
    pub fn hash(&self) -> H256 {
        H256(keccak256(&self.encode()))
    }

    /// How a parent refers to this node: embedded when the encoding is
    /// shorter than a hash, by hash otherwise.
    pub fn reference(&self) -> ChildRef {
        let encoded = self.encode();
        if encoded.len() < HASH_SIZE {
            ChildRef::Embedded(encoded)
        } else {
            ChildRef::Hash(H256(keccak256(&encoded)))
        }
    }
}

fn encode_child(encoder: &mut RlpEncoder, child: &ChildRef) {
    match child {
        ChildRef::Hash(hash) => encoder.encode_bytes(hash.as_bytes()),
        ChildRef::Embedded(raw) => encoder.append_raw(raw),
    }
}

/// Computes Keccak-256 hash of data.
pub fn keccak256(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut hash = [0u8; HASH_SIZE];
    hasher.finalize(&mut hash);
    hash
}

/// The empty trie root hash (keccak of RLP empty string).
pub const EMPTY_ROOT: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6,
    0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0,
    0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
]);

/// Keccak-256 of empty input; the code hash of accounts without code.
pub const EMPTY_CODE_HASH: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c,
    0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b,
    0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_node() {
        let node = Node::leaf(vec![1, 2, 3], vec![0xAB, 0xCD]);
        let encoded = node.encode();
        // [0x82 0x31 0x23] path, [0x82 0xab 0xcd] value, list header 0xc6.
        assert_eq!(encoded, vec![0xc6, 0x82, 0x31, 0x23, 0x82, 0xab, 0xcd]);
        assert!(matches!(node.reference(), ChildRef::Embedded(_)));
    }

    #[test]
    fn test_branch_embeds_small_child() {
        let small = Node::leaf(vec![5], vec![1]);
        let branch = Node::branch().with_child(3, small.reference());
        let encoded = branch.encode();
        let small_encoded = small.encode();
        assert!(encoded
            .windows(small_encoded.len())
            .any(|w| w == small_encoded.as_slice()));
    }

    #[test]
    fn test_empty_root_hash() {
        // Empty trie root is keccak256(RLP(""))
        assert_eq!(H256(keccak256(&[0x80])), EMPTY_ROOT);
        assert_eq!(Node::Empty.hash(), EMPTY_ROOT);
        assert_eq!(H256(keccak256(&[])), EMPTY_CODE_HASH);
    }

    #[test]
    fn test_node_reference_by_hash() {
        let node = Node::leaf(vec![1, 2, 3, 4, 5, 6, 7, 8], vec![0u8; 100]);
        assert_eq!(node.reference(), ChildRef::Hash(node.hash()));
    }
}
