//! Property-based tests for the node codec.

#[cfg(test)]
mod proptest_tests {
    use proptest::prelude::*;
    use primitive_types::H256;
    use crate::merkle::{ChildRef, ChildResolver, MptResolver, Node, RlpItem};

    proptest! {
        #[test]
        fn resolver_finds_every_hashed_child(
            slots in proptest::collection::btree_map(0usize..16, any::<[u8; 32]>(), 0..16),
            value in proptest::option::of(proptest::collection::vec(any::<u8>(), 1..40)),
        ) {
            let mut node = Node::branch();
            for (slot, hash) in &slots {
                node = node.with_child(*slot, ChildRef::Hash(H256(*hash)));
            }
            if let Node::Branch { value: v, .. } = &mut node {
                *v = value;
            }

            let children = MptResolver.children(&node.encode()).unwrap();
            let expected: Vec<H256> = slots.values().map(|h| H256(*h)).collect();
            prop_assert_eq!(children, expected);
        }

        #[test]
        fn decoder_never_panics(data in proptest::collection::vec(any::<u8>(), 0..128)) {
            if let Ok(item) = RlpItem::decode(&data) {
                prop_assert_eq!(item.raw.len(), data.len());
                let _ = item.items();
            }
            let _ = MptResolver.children(&data);
        }

        #[test]
        fn leaf_hash_matches_reference(
            path in proptest::collection::vec(0u8..16, 0..10),
            value in proptest::collection::vec(any::<u8>(), 0..80),
        ) {
            let leaf = Node::leaf(path, value);
            match leaf.reference() {
                ChildRef::Hash(hash) => prop_assert_eq!(hash, leaf.hash()),
                ChildRef::Embedded(raw) => prop_assert!(raw.len() < 32),
            }
        }
    }
}
