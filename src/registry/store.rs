//! In-memory registry store
//!
//! Two sharded indices: nick -> record, and account -> set of nicks. Every
//! mutation holds the nick's primary shard for its whole duration and updates
//! the secondary index inside that window, so both indices move together.
//! Lock order is always primary shard, then secondary shard.

use super::record::{now, NickRecord, NickUpdate, Timestamp};
use super::resolver::{resolve, Resolution};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// A violation of the primary/secondary index correspondence
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("nick {name} owned by {account} is missing from the account index")]
    Unindexed { name: String, account: String },

    #[error("account index lists {name} under {account}, but the nick is not held by it")]
    Orphan { account: String, name: String },

    #[error("account {0} has an empty nick set")]
    EmptyAccount(String),
}

/// Bidirectional nick ownership index
#[derive(Debug, Default)]
pub struct RegistryStore {
    /// Primary index: nick -> record
    nicks: DashMap<String, NickRecord>,
    /// Secondary index: account -> nicks it owns
    owners: DashMap<String, BTreeSet<String>>,
}

impl RegistryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the record for a nick
    pub fn lookup(&self, name: &str) -> Option<NickRecord> {
        self.nicks.get(name).map(|record| record.value().clone())
    }

    /// Nicks owned by an account, in sorted order
    pub fn owned_names(&self, account: &str) -> Vec<String> {
        self.owners
            .get(account)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Mark a nick as used now
    pub fn touch(&self, name: &str) {
        self.touch_at(name, now());
    }

    /// Mark a nick as used at `at`. No-op if nobody owns it.
    pub fn touch_at(&self, name: &str, at: Timestamp) {
        if let Some(mut record) = self.nicks.get_mut(name) {
            record.last_used = at;
        }
    }

    /// Merge an update into the store. Returns whether visible state changed.
    pub fn apply(&self, incoming: &NickUpdate) -> bool {
        self.apply_then(incoming, || {})
    }

    /// Merge an update and, if it changed visible state, run `on_change`
    /// before the nick's lock is released.
    ///
    /// Changes to one nick are serialized, so `on_change` observes them in
    /// the order they were applied. It must not touch this store.
    pub fn apply_then<F: FnOnce()>(&self, incoming: &NickUpdate, on_change: F) -> bool {
        match self.nicks.entry(incoming.name.clone()) {
            Entry::Vacant(slot) => match resolve(None, incoming) {
                Resolution::Store(record) => {
                    self.link(&record.account, &record.name);
                    debug!("Registered {} to {}", record.name, record.account);
                    let _held = slot.insert(record);
                    on_change();
                    true
                }
                Resolution::Remove | Resolution::Unchanged => false,
            },
            Entry::Occupied(mut slot) => match resolve(Some(slot.get()), incoming) {
                Resolution::Store(record) => {
                    let previous = &slot.get().account;
                    if *previous != record.account {
                        debug!(
                            "Ownership of {} moved from {} to {}",
                            record.name, previous, record.account
                        );
                        self.unlink(previous, &record.name);
                        self.link(&record.account, &record.name);
                    }
                    slot.insert(record);
                    on_change();
                    true
                }
                Resolution::Remove => {
                    let current = slot.get();
                    debug!("Unregistered {} from {}", current.name, current.account);
                    self.unlink(&current.account, &current.name);
                    on_change();
                    slot.remove();
                    true
                }
                Resolution::Unchanged => false,
            },
        }
    }

    /// Remove a nick unconditionally
    pub fn purge(&self, name: &str) -> Option<NickRecord> {
        match self.nicks.entry(name.to_string()) {
            Entry::Occupied(slot) => {
                self.unlink(&slot.get().account, name);
                Some(slot.remove())
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Remove a nick only if it is still stale relative to `cutoff`.
    ///
    /// The staleness check happens under the nick's lock, so a touch or a
    /// fresh claim that landed after the candidate scan keeps the record.
    pub fn purge_if_stale(&self, name: &str, cutoff: Timestamp) -> bool {
        match self.nicks.entry(name.to_string()) {
            Entry::Occupied(slot) if slot.get().is_stale(cutoff) => {
                self.unlink(&slot.get().account, name);
                slot.remove();
                true
            }
            _ => false,
        }
    }

    /// Nicks whose `last_used` is older than `cutoff`
    pub fn stale_names(&self, cutoff: Timestamp) -> Vec<String> {
        self.nicks
            .iter()
            .filter(|entry| entry.value().is_stale(cutoff))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Copy of every record, sorted by nick
    pub fn snapshot(&self) -> Vec<NickRecord> {
        let mut records: Vec<NickRecord> =
            self.nicks.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Hash of the ownership state (nick, account, claim time).
    ///
    /// `last_used` is excluded: touches are local and replicas are not
    /// expected to agree on it.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for record in self.snapshot() {
            hasher.update(record.name.as_bytes());
            hasher.update(&[0]);
            hasher.update(record.account.as_bytes());
            hasher.update(&[0]);
            hasher.update(&record.claim_time.to_le_bytes());
        }
        *hasher.finalize().as_bytes()
    }

    /// Number of registered nicks
    pub fn len(&self) -> usize {
        self.nicks.len()
    }

    /// Whether no nick is registered
    pub fn is_empty(&self) -> bool {
        self.nicks.is_empty()
    }

    /// Number of accounts owning at least one nick
    pub fn account_count(&self) -> usize {
        self.owners.len()
    }

    /// Verify that the two indices are exact inverses of each other.
    ///
    /// Only meaningful while no mutation is in flight.
    pub fn check_consistency(&self) -> Result<(), IndexError> {
        for entry in self.nicks.iter() {
            let record = entry.value();
            let indexed = self
                .owners
                .get(&record.account)
                .map(|names| names.contains(&record.name))
                .unwrap_or(false);
            if !indexed {
                return Err(IndexError::Unindexed {
                    name: record.name.clone(),
                    account: record.account.clone(),
                });
            }
        }

        let owners: Vec<(String, BTreeSet<String>)> = self
            .owners
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (account, names) in owners {
            if names.is_empty() {
                return Err(IndexError::EmptyAccount(account));
            }
            for name in names {
                let held = self
                    .nicks
                    .get(&name)
                    .map(|record| record.account == account)
                    .unwrap_or(false);
                if !held {
                    return Err(IndexError::Orphan { account, name });
                }
            }
        }

        Ok(())
    }

    fn link(&self, account: &str, name: &str) {
        self.owners
            .entry(account.to_string())
            .or_default()
            .insert(name.to_string());
    }

    fn unlink(&self, account: &str, name: &str) {
        if let Entry::Occupied(mut names) = self.owners.entry(account.to_string()) {
            names.get_mut().remove(name);
            if names.get().is_empty() {
                names.remove();
            }
        }
    }
}
