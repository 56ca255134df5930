//! The layer tree: one disk layer with a linear stack of diff layers.

use std::collections::VecDeque;
use std::sync::Arc;

use primitive_types::H256;
use tracing::warn;

use super::disk::DiskLayer;
use super::history;
use super::layer::{DiffLayer, Layer};
use crate::data::StorageSize;
use crate::error::Result;
use crate::store::schema;

pub(super) struct LayerTree {
    disk: Arc<DiskLayer>,
    /// Oldest first; the last entry is the head state.
    diffs: VecDeque<Arc<DiffLayer>>,
}

impl LayerTree {
    pub(super) fn new(disk: Arc<DiskLayer>) -> Self {
        Self {
            disk,
            diffs: VecDeque::new(),
        }
    }

    pub(super) fn bottom(&self) -> &Arc<DiskLayer> {
        &self.disk
    }

    pub(super) fn top(&self) -> Layer {
        match self.diffs.back() {
            Some(diff) => Layer::Diff(Arc::clone(diff)),
            None => Layer::Disk(Arc::clone(&self.disk)),
        }
    }

    pub(super) fn diffs(&self) -> impl Iterator<Item = &Arc<DiffLayer>> {
        self.diffs.iter()
    }

    pub(super) fn diff_count(&self) -> usize {
        self.diffs.len()
    }

    pub(super) fn get(&self, root: &H256) -> Option<Layer> {
        if self.disk.root() == *root {
            return Some(Layer::Disk(Arc::clone(&self.disk)));
        }
        self.diffs
            .iter()
            .find(|diff| diff.root == *root)
            .map(|diff| Layer::Diff(Arc::clone(diff)))
    }

    /// Number of diff layers at or below `root`; 0 for the disk layer.
    pub(super) fn depth(&self, root: &H256) -> Option<usize> {
        if self.disk.root() == *root {
            return Some(0);
        }
        self.diffs
            .iter()
            .position(|diff| diff.root == *root)
            .map(|pos| pos + 1)
    }

    pub(super) fn push(&mut self, diff: Arc<DiffLayer>) {
        self.diffs.push_back(diff);
    }

    /// Drops every diff layer above the first `keep`.
    pub(super) fn truncate(&mut self, keep: usize) {
        self.diffs.truncate(keep);
    }

    /// Replaces the whole tree with a single disk layer.
    pub(super) fn reset(&mut self, disk: Arc<DiskLayer>) {
        self.diffs.clear();
        self.disk = disk;
    }

    /// Memory held by diff layers and by the node buffer.
    pub(super) fn size(&self) -> (StorageSize, StorageSize) {
        let diffs = self.diffs.iter().map(|diff| diff.memory()).sum();
        (diffs, self.disk.size())
    }

    /// Flattens the `count` oldest diff layers into the disk layer, one
    /// at a time. The layer above each flattened one is re-pointed to the
    /// new disk layer while its parent lock is held, so readers never see
    /// a dangling link.
    pub(super) fn flatten(&mut self, count: usize, state_history: u64) -> Result<()> {
        for _ in 0..count {
            let Some(bottom) = self.diffs.front().cloned() else {
                break;
            };
            let next = self.diffs.get(1).cloned();
            let mut link = next.as_ref().map(|diff| diff.parent.write());

            let (disk, oldest) = self.disk.commit(&bottom, state_history)?;
            if let Some(parent) = link.as_mut() {
                **parent = Layer::Disk(Arc::clone(&disk));
            }
            drop(link);
            self.diffs.pop_front();
            self.disk = Arc::clone(&disk);

            // The merge already happened; a failed flush leaves the nodes
            // buffered for the next one.
            if let Err(err) = settle(&disk, oldest) {
                warn!(id = disk.id(), error = %err, "deferred node buffer flush");
            }
        }
        Ok(())
    }

    /// Removes the head layer if its root is `root`.
    pub(super) fn pop_head(&mut self, root: &H256) -> bool {
        if self.diffs.back().map_or(false, |diff| diff.root == *root) {
            self.diffs.pop_back();
            return true;
        }
        false
    }
}

/// Flushes the buffer if due and prunes history older than `oldest`.
/// The buffer must not outlive the history that covers it, so nothing is
/// pruned unless the flush went through.
fn settle(disk: &DiskLayer, oldest: Option<u64>) -> Result<()> {
    let overdue = match oldest {
        Some(oldest) => schema::read_persistent_state_id(disk.diskdb())? < oldest,
        None => false,
    };
    disk.flush(overdue)?;
    if let Some(oldest) = oldest {
        history::truncate_from_tail(disk.diskdb(), oldest - 1)?;
    }
    Ok(())
}
