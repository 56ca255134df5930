#![no_main]

use libfuzzer_sys::fuzz_target;
use triedb::merkle::{ChildResolver, MptResolver, RlpItem};

fuzz_target!(|data: &[u8]| {
    // Decoding and child resolution must reject garbage without panicking.
    if let Ok(item) = RlpItem::decode(data) {
        if let Ok(items) = item.items() {
            for item in items {
                let _ = item.bytes();
                let _ = item.as_u64();
            }
        }
    }

    let resolver = MptResolver;
    let _ = resolver.children(data);
    let _ = resolver.storage_root(data);
});
