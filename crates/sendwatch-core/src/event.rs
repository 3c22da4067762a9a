//! Bulk change events published once per committed transaction.

use std::collections::HashSet;
use std::hash::Hash;

/// Everything inserted, updated or deleted by a single committed transaction.
///
/// Keys are stable entity identities. A key listed in `deleted` is treated as
/// deleted even if the same transaction also inserted or updated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent<K: Eq + Hash> {
    /// Entities created by the transaction.
    pub inserted: HashSet<K>,
    /// Entities modified by the transaction.
    pub updated: HashSet<K>,
    /// Entities removed by the transaction.
    pub deleted: HashSet<K>,
}

impl<K: Eq + Hash> ChangeEvent<K> {
    /// Create an empty change event.
    pub fn new() -> Self {
        Self {
            inserted: HashSet::new(),
            updated: HashSet::new(),
            deleted: HashSet::new(),
        }
    }

    /// Add an inserted key.
    pub fn with_inserted(mut self, key: K) -> Self {
        self.inserted.insert(key);
        self
    }

    /// Add an updated key.
    pub fn with_updated(mut self, key: K) -> Self {
        self.updated.insert(key);
        self
    }

    /// Add a deleted key.
    pub fn with_deleted(mut self, key: K) -> Self {
        self.deleted.insert(key);
        self
    }

    /// Whether the transaction touched nothing.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Whether `key` is part of the union of all three sets.
    pub fn contains(&self, key: &K) -> bool {
        self.deleted.contains(key) || self.updated.contains(key) || self.inserted.contains(key)
    }

    /// Whether `key` was deleted by this transaction.
    pub fn is_deleted(&self, key: &K) -> bool {
        self.deleted.contains(key)
    }

    /// Iterate over the distinct keys touched by the transaction.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        let updated = self
            .updated
            .iter()
            .filter(move |k| !self.deleted.contains(*k));
        let inserted = self
            .inserted
            .iter()
            .filter(move |k| !self.deleted.contains(*k) && !self.updated.contains(*k));
        self.deleted.iter().chain(updated).chain(inserted)
    }

    /// Number of distinct keys touched by the transaction.
    pub fn len(&self) -> usize {
        self.keys().count()
    }
}

impl<K: Eq + Hash> Default for ChangeEvent<K> {
    fn default() -> Self {
        Self::new()
    }
}
