//! Serialized snapshot of the in-memory layers, written on shutdown and
//! loaded on the next start.

use std::sync::Arc;

use hashbrown::HashMap;
use primitive_types::H256;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::buffer::NodeBuffer;
use super::disk::DiskLayer;
use super::layer::DiffLayer;
use super::tree::LayerTree;
use super::NodeMap;
use crate::cache::CleanCache;
use crate::data::{StateSet, TrieNode};
use crate::error::{Error, Result};
use crate::store::{schema, KeyValueStore};

const JOURNAL_VERSION: u64 = 0;

#[derive(Serialize, Deserialize)]
struct JournalNodes {
    owner: H256,
    /// `(path, blob)`; an empty blob marks a deletion.
    nodes: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Serialize, Deserialize)]
struct DiskJournal {
    root: H256,
    id: u64,
    nodes: Vec<JournalNodes>,
}

#[derive(Serialize, Deserialize)]
struct DiffJournal {
    root: H256,
    block: u64,
    nodes: Vec<JournalNodes>,
    states: StateSet,
}

#[derive(Serialize, Deserialize)]
struct Journal {
    version: u64,
    /// Root of the state persisted on disk when the journal was written.
    persisted_root: H256,
    disk: DiskJournal,
    diffs: Vec<DiffJournal>,
}

fn encode_nodes(nodes: &NodeMap) -> Vec<JournalNodes> {
    let mut out: Vec<JournalNodes> = nodes
        .iter()
        .map(|(owner, subset)| {
            let mut nodes: Vec<_> = subset
                .iter()
                .map(|(path, node)| (path.clone(), node.blob.clone()))
                .collect();
            nodes.sort();
            JournalNodes { owner: *owner, nodes }
        })
        .collect();
    out.sort_by_key(|entry| entry.owner);
    out
}

fn decode_nodes(entries: Vec<JournalNodes>) -> NodeMap {
    let mut nodes: NodeMap = HashMap::with_hasher(FxBuildHasher);
    for entry in entries {
        let subset = nodes
            .entry(entry.owner)
            .or_insert_with(|| HashMap::with_hasher(FxBuildHasher));
        for (path, blob) in entry.nodes {
            let node = if blob.is_empty() {
                TrieNode::deleted()
            } else {
                TrieNode::from_blob(blob)
            };
            subset.insert(path, node);
        }
    }
    nodes
}

/// Serializes the disk layer and the `depth` oldest diff layers.
pub(super) fn encode(tree: &LayerTree, persisted_root: H256, depth: usize) -> Result<Vec<u8>> {
    let disk = tree.bottom();
    let disk = DiskJournal {
        root: disk.root(),
        id: disk.id(),
        nodes: disk.with_buffer(|buffer| encode_nodes(buffer.nodes()))?,
    };
    let diffs = tree
        .diffs()
        .take(depth)
        .map(|diff| DiffJournal {
            root: diff.root,
            block: diff.block,
            nodes: encode_nodes(&diff.nodes),
            states: diff.states.clone(),
        })
        .collect();
    let journal = Journal {
        version: JOURNAL_VERSION,
        persisted_root,
        disk,
        diffs,
    };
    bincode::serialize(&journal)
        .map_err(|err| Error::invariant(format!("failed to encode trie journal: {err}")))
}

/// Rebuilds the layer tree from the stored journal.
///
/// Returns `None` if there is no journal. A journal that cannot be
/// decoded or does not sit on top of `persisted_root` is an error.
pub(super) fn load(
    diskdb: &Arc<dyn KeyValueStore>,
    persisted_root: H256,
    buffer_limit: u64,
    cleans: &Arc<CleanCache<Vec<u8>>>,
) -> Result<Option<LayerTree>> {
    let Some(blob) = schema::read_trie_journal(diskdb.as_ref())? else {
        return Ok(None);
    };
    let journal: Journal =
        bincode::deserialize(&blob).map_err(|err| Error::decode("trie journal", err))?;
    if journal.version != JOURNAL_VERSION {
        return Err(Error::Corrupted(format!(
            "unexpected journal version: want {JOURNAL_VERSION}, got {}",
            journal.version
        )));
    }
    if journal.persisted_root != persisted_root {
        return Err(Error::Corrupted(format!(
            "journal built on {:?}, disk holds {persisted_root:?}",
            journal.persisted_root
        )));
    }
    let stored = schema::read_persistent_state_id(diskdb.as_ref())?;
    if stored > journal.disk.id {
        return Err(Error::Corrupted(format!(
            "invalid state id: stored {stored}, journaled {}",
            journal.disk.id
        )));
    }

    let buffer = NodeBuffer::new(
        buffer_limit,
        decode_nodes(journal.disk.nodes),
        journal.disk.id - stored,
    );
    let disk = DiskLayer::new(
        journal.disk.root,
        journal.disk.id,
        Arc::clone(diskdb),
        Arc::clone(cleans),
        buffer,
    );
    let mut tree = LayerTree::new(Arc::new(disk));
    for diff in journal.diffs {
        let layer = DiffLayer::new(
            tree.top(),
            diff.root,
            diff.block,
            decode_nodes(diff.nodes),
            diff.states,
        );
        tree.push(Arc::new(layer));
    }
    debug!(
        disk_root = ?journal.disk.root,
        head = ?tree.top().root(),
        layers = tree.diff_count(),
        "loaded layer journal"
    );
    Ok(Some(tree))
}
