//! In-memory `identity → label` view of the durable records.
//!
//! Rebuilt from [`PersistentRecordStore::load_all`][crate::PersistentRecordStore::load_all]
//! when saved anchors are loaded, and kept in step with every successful
//! append, rename and removal afterwards.  Anchors reloaded from storage use
//! it to name themselves before any generic default would apply.

use std::collections::HashMap;

use hearth_types::AnchorIdentity;

use crate::records::PersistedRecord;

#[derive(Debug, Default, Clone)]
pub struct SavedNameIndex {
    names: HashMap<AnchorIdentity, String>,
}

impl SavedNameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole index with `records`.
    pub fn rebuild(&mut self, records: &[PersistedRecord]) {
        self.names = records
            .iter()
            .map(|r| (r.identity, r.label.clone()))
            .collect();
    }

    pub fn get(&self, identity: &AnchorIdentity) -> Option<&str> {
        self.names.get(identity).map(String::as_str)
    }

    pub fn insert(&mut self, identity: AnchorIdentity, label: impl Into<String>) {
        self.names.insert(identity, label.into());
    }

    pub fn remove(&mut self, identity: &AnchorIdentity) -> Option<String> {
        self.names.remove(identity)
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
