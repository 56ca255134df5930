//! State history: one record per flattened transition.
//!
//! Entry `id` describes the transition from state `id - 1` (`parent`) to
//! state `id` (`root`) and carries the prior values touched by it. The
//! `HistoryTail` marker holds the id of the newest pruned entry, so the
//! retained entries are `tail + 1 ..= head`.

use primitive_types::H256;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::StateSet;
use crate::error::{Error, Result};
use crate::store::{schema, Batch, KeyValueStore};

const HISTORY_VERSION: u8 = 0;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct History {
    version: u8,
    pub(super) parent: H256,
    pub(super) root: H256,
    pub(super) block: u64,
    pub(super) states: StateSet,
}

impl History {
    pub(super) fn new(parent: H256, root: H256, block: u64, states: StateSet) -> Self {
        Self {
            version: HISTORY_VERSION,
            parent,
            root,
            block,
            states,
        }
    }

    pub(super) fn is_complete(&self) -> bool {
        self.states.incomplete.is_empty()
    }

    fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|err| Error::invariant(format!("failed to encode state history: {err}")))
    }

    fn decode(blob: &[u8]) -> Result<Self> {
        let history: Self =
            bincode::deserialize(blob).map_err(|err| Error::decode("state history", err))?;
        if history.version != HISTORY_VERSION {
            return Err(Error::Corrupted(format!(
                "unknown state history version {}",
                history.version
            )));
        }
        Ok(history)
    }
}

/// Reads entry `id`; `None` if it was never written or has been pruned.
pub(super) fn read(db: &dyn KeyValueStore, id: u64) -> Result<Option<History>> {
    match schema::read_history(db, id)? {
        Some(blob) => History::decode(&blob).map(Some),
        None => Ok(None),
    }
}

/// Queues entry `id` along with its `root -> id` lookup.
pub(super) fn write(batch: &mut Batch, id: u64, history: &History) -> Result<()> {
    schema::write_history(batch, id, &history.encode()?);
    schema::write_state_id(batch, &history.root, id);
    Ok(())
}

/// Deletes every entry above `head` and the lookups of the states they
/// produced. Returns the number of deleted entries.
pub(super) fn truncate_from_head(db: &dyn KeyValueStore, head: u64) -> Result<u64> {
    let mut batch = Batch::new();
    let mut id = head + 1;
    while let Some(history) = read(db, id)? {
        schema::delete_history(&mut batch, id);
        schema::delete_state_id(&mut batch, &history.root);
        id += 1;
    }
    let pruned = id - head - 1;
    if pruned > 0 {
        db.write_batch(batch)?;
    }
    Ok(pruned)
}

/// Deletes every entry up to and including `tail` and moves the tail
/// marker. The states those entries started from can no longer be
/// recovered, so their lookups go as well. Returns the number of pruned
/// entries.
pub(super) fn truncate_from_tail(db: &dyn KeyValueStore, tail: u64) -> Result<u64> {
    let old = schema::read_history_tail(db)?;
    if old >= tail {
        return Ok(0);
    }
    let mut batch = Batch::new();
    for id in old + 1..=tail {
        if let Some(history) = read(db, id)? {
            schema::delete_state_id(&mut batch, &history.parent);
        }
        schema::delete_history(&mut batch, id);
    }
    schema::write_history_tail(&mut batch, tail);
    db.write_batch(batch)?;
    debug!(items = tail - old, tail, "pruned state history");
    Ok(tail - old)
}

/// Deletes every retained entry with its lookups and clears the tail.
pub(super) fn reset(db: &dyn KeyValueStore) -> Result<u64> {
    let tail = schema::read_history_tail(db)?;
    let mut batch = Batch::new();
    let mut id = tail + 1;
    while let Some(history) = read(db, id)? {
        schema::delete_history(&mut batch, id);
        schema::delete_state_id(&mut batch, &history.parent);
        schema::delete_state_id(&mut batch, &history.root);
        id += 1;
    }
    schema::write_history_tail(&mut batch, 0);
    db.write_batch(batch)?;
    Ok(id - tail - 1)
}
