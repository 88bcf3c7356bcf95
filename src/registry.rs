//! Child registry: an ordered, single-writer map of key → (ref, spec).
//!
//! Order is significant for `RestartAll`, so entries are kept in insertion
//! order with an index for O(1) lookup. Internal to the supervisor actor —
//! single-writer, so no locking.

use crate::spec_types::{ChildKey, ChildRef, ChildSpec, Direction};
use std::collections::HashMap;

/// One registry entry.
pub struct Entry {
    pub key: ChildKey,
    pub child_ref: ChildRef,
    pub spec: ChildSpec,
}

/// Ordered sequence of children, indexed by key for O(1) lookup.
///
/// `entries` holds `Some` for live slots and `None` for removed ones so
/// that indices recorded in `index` remain valid without a full
/// reindex on every removal; `list`/`iter_ordered` skip the tombstones.
#[derive(Default)]
pub struct Registry {
    entries: Vec<Option<Entry>>,
    index: HashMap<ChildKey, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new spec with ref `Stopped`-equivalent (caller supplies the
    /// initial ref). Returns the existing ref if the key is already present.
    pub fn insert(&mut self, spec: ChildSpec, child_ref: ChildRef) -> Result<(), ChildRef> {
        if let Some(&i) = self.index.get(&spec.key) {
            let existing = self.entries[i]
                .as_ref()
                .expect("index never points at a tombstone for a present key");
            return Err(existing.child_ref.clone());
        }

        let key = spec.key.clone();
        let idx = self.entries.len();
        self.entries.push(Some(Entry { key: key.clone(), child_ref, spec }));
        self.index.insert(key, idx);
        Ok(())
    }

    pub fn remove(&mut self, key: &ChildKey) -> Option<Entry> {
        let idx = self.index.remove(key)?;
        self.entries[idx].take()
    }

    pub fn update_ref(&mut self, key: &ChildKey, new_ref: ChildRef) -> bool {
        if let Some(&idx) = self.index.get(key) {
            if let Some(entry) = self.entries[idx].as_mut() {
                entry.child_ref = new_ref;
                return true;
            }
        }
        false
    }

    pub fn get(&self, key: &ChildKey) -> Option<&Entry> {
        let &idx = self.index.get(key)?;
        self.entries[idx].as_ref()
    }

    pub fn contains(&self, key: &ChildKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// All present entries in insertion order.
    pub fn list(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter_map(|e| e.as_ref())
    }

    /// All present keys, in the order dictated by `dir`.
    pub fn ordered_keys(&self, dir: Direction) -> Vec<ChildKey> {
        let mut keys: Vec<ChildKey> = self.list().map(|e| e.key.clone()).collect();
        if dir == Direction::RightToLeft {
            keys.reverse();
        }
        keys
    }

    pub fn keys_in_insertion_order(&self) -> Vec<ChildKey> {
        self.list().map(|e| e.key.clone()).collect()
    }
}
