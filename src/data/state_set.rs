//! Prior state values of a state transition.

use std::collections::{BTreeMap, BTreeSet};

use primitive_types::H256;
use serde::{Deserialize, Serialize};

/// Account and storage values as they were before a state transition.
///
/// `None` means the entry did not exist. The hash scheme ignores this
/// set; the path scheme persists it as state history so the transition
/// can be reverted later.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSet {
    /// Prior encoded accounts, keyed by account hash.
    pub accounts: BTreeMap<H256, Option<Vec<u8>>>,
    /// Prior storage slot values, keyed by account hash then slot hash.
    pub storages: BTreeMap<H256, BTreeMap<H256, Option<Vec<u8>>>>,
    /// Accounts whose storage was too large to record completely.
    pub incomplete: BTreeSet<H256>,
}

impl StateSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the prior value of an account. The first recorded value wins.
    pub fn record_account(&mut self, account: H256, prior: Option<Vec<u8>>) {
        self.accounts.entry(account).or_insert(prior);
    }

    /// Records the prior value of a storage slot. The first recorded value wins.
    pub fn record_storage(&mut self, account: H256, slot: H256, prior: Option<Vec<u8>>) {
        self.storages
            .entry(account)
            .or_default()
            .entry(slot)
            .or_insert(prior);
    }

    /// Marks the storage of `account` as incompletely recorded.
    pub fn mark_incomplete(&mut self, account: H256) {
        self.incomplete.insert(account);
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.storages.is_empty() && self.incomplete.is_empty()
    }

    /// Approximate memory held by the recorded values.
    pub fn size(&self) -> usize {
        let value = |v: &Option<Vec<u8>>| v.as_ref().map_or(0, Vec::len);
        let accounts: usize = self.accounts.values().map(|v| 32 + value(v)).sum();
        let storages: usize = self
            .storages
            .values()
            .map(|slots| 32 + slots.values().map(|v| 32 + value(v)).sum::<usize>())
            .sum();
        accounts + storages + self.incomplete.len() * 32
    }
}
